//! # Domain Types
//!
//! Core domain types for the operator terminal.
//!
//! ## Type Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Domain Model                                     │
//! │                                                                         │
//! │  ┌──────────────┐ 1     0..1 ┌────────────────────┐                    │
//! │  │   Session    │───────────►│ PendingTransaction │  (pushed by hub)   │
//! │  │ register_id  │            │ single slot        │                    │
//! │  │ status       │            └────────────────────┘                    │
//! │  │ balance      │                                                       │
//! │  └──────┬───────┘                                                       │
//! │         │ gates                                                         │
//! │         ▼                                                               │
//! │  ┌──────────────┐ 0..1  ┌──────────┐                                   │
//! │  │    Intake    │──────►│ Customer │                                   │
//! │  │ weights      │       │ tier     │                                   │
//! │  │ offer_price  │       └──────────┘                                   │
//! │  │ status       │                                                       │
//! │  └──────────────┘                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Session
// =============================================================================

/// Open/closed state of a cash register's operating period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Closed => write!(f, "closed"),
            SessionStatus::Open => write!(f, "open"),
        }
    }
}

/// A cash register session.
///
/// The hub channel may only be connected while `status` is `Open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub cash_register_id: String,
    pub status: SessionStatus,
    pub balance: Money,
    pub open_session_id: Option<String>,
}

impl Session {
    /// A closed session for the given register with a zero balance.
    pub fn closed(cash_register_id: impl Into<String>) -> Self {
        Session {
            cash_register_id: cash_register_id.into(),
            status: SessionStatus::Closed,
            balance: Money::zero(),
            open_session_id: None,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

// =============================================================================
// Pending Transaction
// =============================================================================

/// Status of the pending cash-in slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    #[default]
    None,
    Pending,
    /// Returned to the caller of a successful confirmation; the slot itself
    /// is already back to `None` at that point.
    Confirmed,
}

/// A cash-in initiated by another actor, awaiting operator confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: String,
    pub cash_register_id: String,
    pub amount: Money,
    pub status: PendingStatus,
}

// =============================================================================
// Intake
// =============================================================================

/// Progress of one purchase.
///
/// ## Transitions
/// ```text
/// None ──submit──► Created ──offer──► Offered
///                    │  ▲                │
///          recalculate└──┘                │
///                    │                    │
///                    ├──accept────────────┴──► Accepted
///                    └──reject────────────────► Rejected ──(auto)──► None
///
/// any ──reset──► None
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    #[default]
    None,
    Created,
    Offered,
    Accepted,
    Rejected,
}

impl IntakeStatus {
    /// True once the server has assigned an identity to the intake.
    pub fn has_identity(&self) -> bool {
        !matches!(self, IntakeStatus::None)
    }

    /// True for statuses that accept recalculate/offer/accept/reject.
    pub fn is_active(&self) -> bool {
        matches!(self, IntakeStatus::Created | IntakeStatus::Offered)
    }
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeStatus::None => write!(f, "none"),
            IntakeStatus::Created => write!(f, "created"),
            IntakeStatus::Offered => write!(f, "offered"),
            IntakeStatus::Accepted => write!(f, "accepted"),
            IntakeStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Pricing tier of a customer. Non-standard tiers are priced with
/// register-specific exchange rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    #[default]
    Standard,
    Preferred,
    Dealer,
}

impl CustomerTier {
    #[inline]
    pub fn is_default(&self) -> bool {
        *self == CustomerTier::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unspecified,
}

/// A walk-in customer attached to an intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub phone: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tier: CustomerTier,
}

/// A weight in milligrams.
///
/// Scales report grams with up to three decimals, so milligrams keep
/// every reading exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct Weight(i64);

impl Weight {
    #[inline]
    pub const fn from_milligrams(mg: i64) -> Self {
        Weight(mg)
    }

    #[inline]
    pub const fn milligrams(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} g", self.0 / 1000, (self.0 % 1000).abs())
    }
}

/// Weights of one catalyst intake: total powder plus the assayed
/// platinum, palladium and rhodium content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MetalWeights {
    pub powder_total: Weight,
    pub pt: Weight,
    pub pd: Weight,
    pub rh: Weight,
}

/// One purchase transaction as tracked by the terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Intake {
    pub id: Option<String>,
    pub shop_id: String,
    pub customer: Option<Customer>,
    pub weights: MetalWeights,
    pub currency_code: String,
    pub offer_price: Option<Money>,
    pub status: IntakeStatus,
}

impl Intake {
    /// An empty intake bound to a shop.
    pub fn empty(shop_id: impl Into<String>) -> Self {
        Intake {
            shop_id: shop_id.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Tabs
// =============================================================================

/// The purchasing tab the operator is working in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    Catalyst,
    Iron,
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tab::Catalyst => write!(f, "catalyst"),
            Tab::Iron => write!(f, "iron"),
        }
    }
}

// =============================================================================
// Server Records
// =============================================================================

/// Response of `open session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedSession {
    pub session_id: String,
    #[serde(default)]
    pub balance: Option<Money>,
}

/// Intake as returned by create/fetch/recalculate/offer/accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRecord {
    pub id: String,
    pub shop_id: String,
    #[serde(default)]
    pub customer: Option<Customer>,
    pub offer_price: Money,
    pub currency_code: String,
}

/// Request body of `create intake`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntakeRequest {
    pub shop_id: String,
    pub cash_register_id: String,
    pub weights: MetalWeights,
    pub currency_code: String,
    pub customer: Customer,
}

/// Authoritative snapshot of a pending cash-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCashIn {
    pub id: String,
    pub cash_register_id: String,
    pub amount: Money,
}

/// Exchange rate used for non-standard customer tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub currency_code: String,
    pub buy: Money,
    pub sell: Money,
}

/// Active per-gram metal rate for the catalyst tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MetalRate {
    pub currency_code: String,
    pub pt: Money,
    pub pd: Money,
    pub rh: Money,
}

/// A priced iron category of a register's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct IronCatalogItem {
    pub id: String,
    pub name: String,
    pub price_per_kg: Money,
}

/// An alternative offer the operator may present for a created intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OfferOption {
    pub id: String,
    pub label: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub code: String,
    pub name: String,
}

/// One validated line of a bulk iron purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IronPurchaseLine {
    pub catalog_item_id: String,
    pub weight: Weight,
    pub price: Money,
}

/// Request body of `submit bulk iron purchase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IronPurchaseRequest {
    pub shop_id: String,
    pub cash_register_id: String,
    pub customer_phone: Option<String>,
    pub lines: Vec<IronPurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IronPurchaseReceipt {
    pub id: String,
    pub total: Money,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_closed() {
        let session = Session::closed("reg-1");
        assert!(!session.is_open());
        assert!(session.balance.is_zero());
        assert_eq!(session.open_session_id, None);
    }

    #[test]
    fn test_intake_status_predicates() {
        assert!(!IntakeStatus::None.has_identity());
        assert!(IntakeStatus::Created.is_active());
        assert!(IntakeStatus::Offered.is_active());
        assert!(!IntakeStatus::Accepted.is_active());
    }

    #[test]
    fn test_weight_display() {
        assert_eq!(Weight::from_milligrams(12_500).to_string(), "12.500 g");
        assert_eq!(Weight::from_milligrams(100).to_string(), "0.100 g");
    }

    #[test]
    fn test_intake_record_wire_format() {
        let json = r#"{
            "id": "41",
            "shopId": "shop-7",
            "offerPrice": 1250050,
            "currencyCode": "AMD"
        }"#;
        let record: IntakeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "41");
        assert_eq!(record.offer_price, Money::from_minor(1_250_050));
        assert!(record.customer.is_none());
    }

    #[test]
    fn test_customer_tier_default() {
        assert!(CustomerTier::default().is_default());
        assert!(!CustomerTier::Dealer.is_default());
    }
}
