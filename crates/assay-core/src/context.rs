//! # Context Resolution
//!
//! Decides which reference data the terminal must (re)load for the current
//! tab, customer and intake. Pure: it produces a [`ContextPlan`], the
//! terminal crate executes it.
//!
//! Also holds the tab-switch confirmation gate. A switch that would throw
//! away intake progress is parked in `pending` until the operator confirms
//! or cancels it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{CustomerTier, Tab};

// =============================================================================
// Planning
// =============================================================================

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextInputs {
    pub tab: Tab,
    /// Tier of the customer attached to the current intake.
    pub attached_tier: Option<CustomerTier>,
    /// Tier from the most recent ad-hoc customer lookup.
    pub looked_up_tier: Option<CustomerTier>,
    pub exchange_rates_loaded: bool,
    pub iron_catalog_loaded: bool,
    pub metal_rate_loaded: bool,
    pub languages_loaded: bool,
}

impl ContextInputs {
    /// The attached customer wins over an ad-hoc lookup.
    pub fn resolved_tier(&self) -> Option<CustomerTier> {
        self.attached_tier.or(self.looked_up_tier)
    }
}

/// What to do with register-specific exchange rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRateAction {
    Fetch,
    Clear,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPlan {
    pub exchange_rates: ExchangeRateAction,
    pub load_iron_catalog: bool,
    pub load_metal_rate: bool,
    pub load_languages: bool,
}

impl ContextPlan {
    /// True when executing the plan would not touch anything.
    pub fn is_noop(&self) -> bool {
        self.exchange_rates == ExchangeRateAction::Keep
            && !self.load_iron_catalog
            && !self.load_metal_rate
            && !self.load_languages
    }
}

/// Only customers of a non-default tier are priced with exchange rates.
pub fn needs_exchange_rates(tier: Option<CustomerTier>) -> bool {
    matches!(tier, Some(tier) if !tier.is_default())
}

/// Derives the plan for the given inputs.
///
/// ```text
/// tier present and not Standard ──► Fetch rates (unless already loaded)
/// tier absent or Standard       ──► Clear rates (if any are loaded)
/// tab Iron, catalog missing     ──► load iron catalog
/// tab Catalyst, rate missing    ──► load active metal rate
/// languages missing             ──► load languages
/// ```
pub fn plan(inputs: &ContextInputs) -> ContextPlan {
    let needs_rates = needs_exchange_rates(inputs.resolved_tier());

    let exchange_rates = match (needs_rates, inputs.exchange_rates_loaded) {
        (true, false) => ExchangeRateAction::Fetch,
        (false, true) => ExchangeRateAction::Clear,
        _ => ExchangeRateAction::Keep,
    };

    ContextPlan {
        exchange_rates,
        load_iron_catalog: inputs.tab == Tab::Iron && !inputs.iron_catalog_loaded,
        load_metal_rate: inputs.tab == Tab::Catalyst && !inputs.metal_rate_loaded,
        load_languages: !inputs.languages_loaded,
    }
}

// =============================================================================
// Tab Gate
// =============================================================================

/// Outcome of a tab switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", content = "tab", rename_all = "snake_case")]
pub enum TabSwitch {
    /// Already on that tab.
    Unchanged,
    /// The switch took effect.
    Committed(Tab),
    /// Progress would be lost; waiting for confirm/cancel.
    NeedsConfirmation(Tab),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TabGate {
    active: Tab,
    pending: Option<Tab>,
}

impl TabGate {
    pub fn new(active: Tab) -> Self {
        TabGate {
            active,
            pending: None,
        }
    }

    pub fn active(&self) -> Tab {
        self.active
    }

    pub fn pending(&self) -> Option<Tab> {
        self.pending
    }

    /// Requests a switch. A newer request replaces an unconfirmed one.
    pub fn request(&mut self, tab: Tab, has_progress: bool) -> TabSwitch {
        if tab == self.active {
            self.pending = None;
            return TabSwitch::Unchanged;
        }
        if has_progress {
            self.pending = Some(tab);
            TabSwitch::NeedsConfirmation(tab)
        } else {
            self.pending = None;
            self.active = tab;
            TabSwitch::Committed(tab)
        }
    }

    /// Commits the parked switch, if any.
    pub fn confirm(&mut self) -> Option<Tab> {
        let tab = self.pending.take()?;
        self.active = tab;
        Some(tab)
    }

    /// Drops the parked switch and returns it.
    pub fn cancel(&mut self) -> Option<Tab> {
        self.pending.take()
    }
}
