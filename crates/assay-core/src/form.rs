//! # Operator Form State
//!
//! Raw, unparsed operator input for the active tab. The UI writes these
//! strings as the operator types; the workflow validates them only when a
//! command is issued.
//!
//! `has_tried_submit` exists purely so the UI knows when to start showing
//! inline field errors. It is set by a rejected submit and cleared by reset.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{Gender, Tab};

/// Catalyst tab input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CatalystForm {
    pub powder_weight_total: String,
    pub pt_weight: String,
    pub pd_weight: String,
    pub rh_weight: String,
    pub currency_code: String,
    pub phone: String,
    pub full_name: String,
    pub gender: Gender,
    pub notes: String,
    pub has_tried_submit: bool,
}

impl CatalystForm {
    /// True when the operator typed anything worth warning about on a tab switch.
    pub fn is_dirty(&self) -> bool {
        [
            &self.powder_weight_total,
            &self.pt_weight,
            &self.pd_weight,
            &self.rh_weight,
            &self.phone,
            &self.full_name,
            &self.notes,
        ]
        .iter()
        .any(|s| !s.trim().is_empty())
    }
}

/// One raw line of the iron tab.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct IronLineInput {
    pub catalog_item_id: Option<String>,
    pub weight: String,
    pub price: String,
}

/// Iron tab input: several catalog lines bought in one go.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct IronForm {
    pub lines: Vec<IronLineInput>,
    pub phone: String,
    pub has_tried_submit: bool,
}

impl IronForm {
    pub fn is_dirty(&self) -> bool {
        !self.phone.trim().is_empty()
            || self.lines.iter().any(|l| {
                l.catalog_item_id.is_some() || !l.weight.trim().is_empty() || !l.price.trim().is_empty()
            })
    }
}

/// Form state, one-to-one with the active tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "tab", rename_all = "snake_case")]
pub enum OperatorFormState {
    Catalyst(CatalystForm),
    Iron(IronForm),
}

impl OperatorFormState {
    /// A pristine form for the given tab.
    pub fn for_tab(tab: Tab, default_currency: &str) -> Self {
        match tab {
            Tab::Catalyst => OperatorFormState::Catalyst(CatalystForm {
                currency_code: default_currency.to_string(),
                ..Default::default()
            }),
            Tab::Iron => OperatorFormState::Iron(IronForm::default()),
        }
    }

    pub fn tab(&self) -> Tab {
        match self {
            OperatorFormState::Catalyst(_) => Tab::Catalyst,
            OperatorFormState::Iron(_) => Tab::Iron,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            OperatorFormState::Catalyst(f) => f.is_dirty(),
            OperatorFormState::Iron(f) => f.is_dirty(),
        }
    }

    pub fn has_tried_submit(&self) -> bool {
        match self {
            OperatorFormState::Catalyst(f) => f.has_tried_submit,
            OperatorFormState::Iron(f) => f.has_tried_submit,
        }
    }

    pub(crate) fn mark_tried_submit(&mut self) {
        match self {
            OperatorFormState::Catalyst(f) => f.has_tried_submit = true,
            OperatorFormState::Iron(f) => f.has_tried_submit = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_form_is_clean() {
        let form = OperatorFormState::for_tab(Tab::Catalyst, "AMD");
        assert!(!form.is_dirty());
        assert!(!form.has_tried_submit());
        assert_eq!(form.tab(), Tab::Catalyst);
        match form {
            OperatorFormState::Catalyst(f) => assert_eq!(f.currency_code, "AMD"),
            OperatorFormState::Iron(_) => panic!("expected catalyst form"),
        }
    }

    #[test]
    fn test_iron_line_selection_makes_form_dirty() {
        let mut form = IronForm::default();
        form.lines.push(IronLineInput::default());
        assert!(!form.is_dirty());
        form.lines[0].catalog_item_id = Some("steel-a".into());
        assert!(form.is_dirty());
    }

    #[test]
    fn test_serializes_with_tab_tag() {
        let form = OperatorFormState::for_tab(Tab::Iron, "AMD");
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["tab"], "iron");
    }
}
