//! # Validation Module
//!
//! Local, synchronous validation of operator input.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Operator UI                                                  │
//! │  └── Inline errors, shown once has_tried_submit is set                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Weights: numeric, finite, at most 3 decimals                      │
//! │  ├── Phone: length gate on submit, regional format on attach/accept    │
//! │  └── Iron lines: catalog selection, weight, price                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Back office (pricing, customer registry)                     │
//! │                                                                         │
//! │  A failure here NEVER reaches the network.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use assay_core::validation::{parse_weight, validate_phone, PhoneRegion};
//!
//! let w = parse_weight("powder_weight_total", "12.5").unwrap();
//! assert_eq!(w.milligrams(), 12_500);
//!
//! let phone = validate_phone("099 12-34-56", PhoneRegion::Am).unwrap();
//! assert_eq!(phone, "+37499123456");
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::form::{CatalystForm, IronForm};
use crate::money::Money;
use crate::types::{Customer, CustomerTier, IronPurchaseLine, MetalWeights, Weight};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Default minimum phone length (exclusive) required to submit an intake.
pub const MIN_SUBMIT_PHONE_LENGTH: usize = 7;

// =============================================================================
// Numeric Parsing
// =============================================================================

/// Parses a non-negative decimal string into an integer with `scale`
/// implied decimals. Accepts `,` as the decimal separator.
fn parse_fixed(raw: &str, scale: u32) -> Option<i64> {
    let normalized = raw.trim().replace(',', ".");
    let (whole, frac) = match normalized.split_once('.') {
        Some((w, f)) => (w, f),
        None => (normalized.as_str(), ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > scale as usize {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_value: i64 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    for _ in frac.len()..scale as usize {
        frac_value = frac_value.checked_mul(10)?;
    }

    whole.checked_mul(10_i64.pow(scale))?.checked_add(frac_value)
}

/// Parses a weight in grams (up to three decimals).
///
/// ## Rules
/// - Must not be empty
/// - Must be a plain non-negative decimal ("12.5", "0,3"); `NaN`, `inf`,
///   signs and exponents are rejected
pub fn parse_weight(field: &str, raw: &str) -> ValidationResult<Weight> {
    if raw.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    parse_fixed(raw, 3)
        .map(Weight::from_milligrams)
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be a number of grams with at most 3 decimals".to_string(),
        })
}

/// Parses a weight that must be strictly positive.
pub fn parse_positive_weight(field: &str, raw: &str) -> ValidationResult<Weight> {
    let weight = parse_weight(field, raw)?;
    if weight.is_zero() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(weight)
}

/// Parses a money amount in major units with up to two decimals.
pub fn parse_amount(field: &str, raw: &str) -> ValidationResult<Money> {
    if raw.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let minor = parse_fixed(raw, 2).ok_or_else(|| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be an amount with at most 2 decimals".to_string(),
    })?;

    if minor == 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(Money::from_minor(minor))
}

// =============================================================================
// Phone Validation
// =============================================================================

/// Region whose numbering plan is used to validate customer phones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhoneRegion {
    /// Armenia: +374, 8-digit national number, trunk prefix 0.
    #[default]
    Am,
    /// Georgia: +995, 9-digit national number, trunk prefix 0.
    Ge,
    /// Russia: +7, 10-digit national number, trunk prefix 8.
    Ru,
}

impl PhoneRegion {
    pub fn calling_code(&self) -> &'static str {
        match self {
            PhoneRegion::Am => "374",
            PhoneRegion::Ge => "995",
            PhoneRegion::Ru => "7",
        }
    }

    pub fn national_length(&self) -> usize {
        match self {
            PhoneRegion::Am => 8,
            PhoneRegion::Ge => 9,
            PhoneRegion::Ru => 10,
        }
    }

    pub fn trunk_prefix(&self) -> char {
        match self {
            PhoneRegion::Am | PhoneRegion::Ge => '0',
            PhoneRegion::Ru => '8',
        }
    }
}

impl FromStr for PhoneRegion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AM" => Ok(PhoneRegion::Am),
            "GE" => Ok(PhoneRegion::Ge),
            "RU" => Ok(PhoneRegion::Ru),
            other => Err(ValidationError::InvalidFormat {
                field: "phone_region".to_string(),
                reason: format!("unknown region '{}'", other),
            }),
        }
    }
}

/// Submit-level phone gate: the number only has to be long enough.
///
/// The full regional check happens on `attach_customer` and `accept`,
/// where the phone identifies the customer record.
pub fn validate_submit_phone(raw: &str, min_length: usize) -> ValidationResult<()> {
    let phone = raw.trim();
    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }
    if phone.chars().count() <= min_length {
        return Err(ValidationError::TooShort {
            field: "phone".to_string(),
            min: min_length,
        });
    }
    Ok(())
}

/// Validates a phone for the region and returns it in E.164 form.
///
/// ## Accepted Inputs (Armenia)
/// ```text
/// +374 99 123456   → +37499123456
/// 37499123456      → +37499123456
/// 099-12-34-56     → +37499123456   (trunk prefix)
/// 99123456         → +37499123456   (national number)
/// ```
pub fn validate_phone(raw: &str, region: PhoneRegion) -> ValidationResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }

    let has_plus = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {}
            ' ' | '-' | '(' | ')' => {}
            _ => {
                return Err(ValidationError::InvalidFormat {
                    field: "phone".to_string(),
                    reason: format!("unexpected character '{}'", c),
                })
            }
        }
    }

    let code = region.calling_code();
    let national_len = region.national_length();

    let national = if has_plus {
        digits.strip_prefix(code).unwrap_or("")
    } else if digits.len() == code.len() + national_len && digits.starts_with(code) {
        &digits[code.len()..]
    } else if digits.len() == national_len + 1 && digits.starts_with(region.trunk_prefix()) {
        &digits[1..]
    } else {
        digits.as_str()
    };

    if national.len() != national_len {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: format!(
                "expected +{} followed by {} digits",
                code, national_len
            ),
        });
    }

    Ok(format!("+{}{}", code, national))
}

// =============================================================================
// Form Validators
// =============================================================================

/// Validated catalyst submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalystSubmission {
    pub weights: MetalWeights,
    pub customer: Customer,
    pub currency_code: String,
}

/// Validates the catalyst form for `submit`.
///
/// ## Rules
/// - `powder_weight_total` is numeric and positive
/// - metal weights are numeric (an empty metal weight counts as zero)
/// - the phone is longer than `min_phone_length`
/// - a currency is selected
pub fn validate_catalyst_form(
    form: &CatalystForm,
    min_phone_length: usize,
) -> ValidationResult<CatalystSubmission> {
    let powder_total = parse_positive_weight("powder_weight_total", &form.powder_weight_total)?;
    let optional = |field: &str, raw: &str| -> ValidationResult<Weight> {
        if raw.trim().is_empty() {
            Ok(Weight::default())
        } else {
            parse_weight(field, raw)
        }
    };
    let pt = optional("pt_weight", &form.pt_weight)?;
    let pd = optional("pd_weight", &form.pd_weight)?;
    let rh = optional("rh_weight", &form.rh_weight)?;

    validate_submit_phone(&form.phone, min_phone_length)?;

    if form.currency_code.trim().is_empty() {
        return Err(ValidationError::MissingSelection {
            field: "currency_code".to_string(),
        });
    }

    let notes = form.notes.trim();
    Ok(CatalystSubmission {
        weights: MetalWeights {
            powder_total,
            pt,
            pd,
            rh,
        },
        customer: Customer {
            phone: form.phone.trim().to_string(),
            full_name: form.full_name.trim().to_string(),
            gender: form.gender,
            notes: (!notes.is_empty()).then(|| notes.to_string()),
            tier: CustomerTier::Standard,
        },
        currency_code: form.currency_code.trim().to_string(),
    })
}

/// Validates the iron form into purchase lines.
///
/// Empty trailing lines (nothing selected, nothing typed) are skipped; at
/// least one line must remain.
pub fn validate_iron_form(form: &IronForm) -> ValidationResult<Vec<IronPurchaseLine>> {
    let mut lines = Vec::with_capacity(form.lines.len());

    for (i, line) in form.lines.iter().enumerate() {
        let untouched = line.catalog_item_id.is_none()
            && line.weight.trim().is_empty()
            && line.price.trim().is_empty();
        if untouched {
            continue;
        }

        let catalog_item_id =
            line.catalog_item_id
                .clone()
                .ok_or_else(|| ValidationError::MissingSelection {
                    field: format!("lines[{}].catalog_item", i),
                })?;
        let weight = parse_positive_weight(&format!("lines[{}].weight", i), &line.weight)?;
        let price = parse_amount(&format!("lines[{}].price", i), &line.price)?;

        lines.push(IronPurchaseLine {
            catalog_item_id,
            weight,
            price,
        });
    }

    if lines.is_empty() {
        return Err(ValidationError::MissingSelection {
            field: "lines".to_string(),
        });
    }

    Ok(lines)
}

// =============================================================================
// Unit Tests
// =============================================================================
