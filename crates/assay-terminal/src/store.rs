//! # Domain Store
//!
//! Every REST-shaped operation the terminal consumes, behind one trait.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DomainStore                                      │
//! │                                                                         │
//! │  Session        open_session, close_session, fetch_balance             │
//! │  Pending        fetch_pending_cash_in, confirm_pending_cash_in         │
//! │  Intake         create, fetch, recalculate, attach_customer,           │
//! │                 offer, accept, reject, fetch_offer_options             │
//! │  Reference      fetch_exchange_rates, fetch_iron_catalog,              │
//! │                 fetch_active_metal_rate, fetch_languages,              │
//! │                 lookup_customer                                        │
//! │  Iron           submit_iron_purchase                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`HttpStore`] is the reqwest implementation. Tests use a scripted store.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use assay_core::{
    CreateIntakeRequest, Customer, ExchangeRate, IntakeRecord, IronCatalogItem,
    IronPurchaseReceipt, IronPurchaseRequest, Language, MetalRate, Money, OfferOption,
    OpenedSession, PendingCashIn,
};

use crate::auth::AccessToken;
use crate::error::{TerminalError, TerminalResult};

/// Request/response contract of the back office.
#[async_trait]
pub trait DomainStore: Send + Sync {
    // Session
    async fn open_session(&self, cash_register_id: &str) -> TerminalResult<OpenedSession>;
    async fn close_session(&self, cash_register_id: &str, session_id: &str) -> TerminalResult<()>;
    async fn fetch_balance(&self, cash_register_id: &str) -> TerminalResult<Money>;

    // Pending cash-in
    async fn fetch_pending_cash_in(&self, cash_register_id: &str)
        -> TerminalResult<Option<PendingCashIn>>;
    async fn confirm_pending_cash_in(&self, cash_register_id: &str, id: &str) -> TerminalResult<()>;

    // Intake
    async fn create_intake(&self, request: &CreateIntakeRequest) -> TerminalResult<IntakeRecord>;
    async fn fetch_intake(&self, id: &str) -> TerminalResult<IntakeRecord>;
    async fn recalculate_intake(&self, id: &str) -> TerminalResult<IntakeRecord>;
    async fn attach_customer(&self, id: &str, phone: &str) -> TerminalResult<IntakeRecord>;
    async fn offer_intake(&self, id: &str) -> TerminalResult<IntakeRecord>;
    async fn accept_intake(&self, id: &str, phone: &str) -> TerminalResult<IntakeRecord>;
    async fn reject_intake(&self, id: &str) -> TerminalResult<()>;
    async fn fetch_offer_options(&self, id: &str) -> TerminalResult<Vec<OfferOption>>;

    // Reference data
    async fn lookup_customer(&self, phone: &str) -> TerminalResult<Option<Customer>>;
    async fn fetch_exchange_rates(&self, cash_register_id: &str) -> TerminalResult<Vec<ExchangeRate>>;
    async fn fetch_iron_catalog(&self, cash_register_id: &str) -> TerminalResult<Vec<IronCatalogItem>>;
    async fn fetch_active_metal_rate(&self, shop_id: &str) -> TerminalResult<MetalRate>;
    async fn fetch_languages(&self) -> TerminalResult<Vec<Language>>;

    // Iron
    async fn submit_iron_purchase(
        &self,
        request: &IronPurchaseRequest,
    ) -> TerminalResult<IronPurchaseReceipt>;
}

// =============================================================================
// HTTP Store
// =============================================================================

#[derive(Debug, Deserialize)]
struct BalanceBody {
    balance: Money,
}

#[derive(Debug, Serialize)]
struct PhoneBody<'a> {
    phone: &'a str,
}

/// [`DomainStore`] over the back office REST API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: Url,
    token: AccessToken,
}

impl HttpStore {
    pub fn new(base_url: &str, token: AccessToken, timeout: Duration) -> TerminalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TerminalError::InvalidConfig(e.to_string()))?;
        Ok(HttpStore {
            client,
            base_url: Url::parse(base_url)?,
            token,
        })
    }

    /// Appends path segments to the base URL, percent-encoding each.
    fn url(&self, segments: &[&str]) -> TerminalResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TerminalError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> TerminalResult<reqwest::Response> {
        let url = self.url(segments)?;
        debug!(operation, %url, "REST request");

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(self.token.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| TerminalError::RequestFailed {
                operation,
                message: e.to_string(),
            })
    }

    async fn rejected(operation: &'static str, response: reqwest::Response) -> TerminalError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        TerminalError::Rejected {
            operation,
            status,
            message,
        }
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> TerminalResult<T> {
        if !response.status().is_success() {
            return Err(Self::rejected(operation, response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TerminalError::RequestFailed {
                operation,
                message: e.to_string(),
            })
    }

    /// Like `decode`, but 404/204 mean "nothing there".
    async fn decode_optional<T: DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> TerminalResult<Option<T>> {
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            _ => Self::decode(operation, response).await.map(Some),
        }
    }

    async fn expect_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> TerminalResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejected(operation, response).await)
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        segments: &[&str],
    ) -> TerminalResult<T> {
        let response = self.send::<()>(operation, Method::GET, segments, None).await?;
        Self::decode(operation, response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        segments: &[&str],
        body: Option<&B>,
    ) -> TerminalResult<T> {
        let response = self.send(operation, Method::POST, segments, body).await?;
        Self::decode(operation, response).await
    }
}

#[async_trait]
impl DomainStore for HttpStore {
    async fn open_session(&self, cash_register_id: &str) -> TerminalResult<OpenedSession> {
        let operation = "open session";
        let response = self
            .send::<()>(operation, Method::POST, &["cash-registers", cash_register_id, "sessions"], None)
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(TerminalError::RegisterBusy(cash_register_id.to_string()));
        }
        Self::decode(operation, response).await
    }

    async fn close_session(&self, cash_register_id: &str, session_id: &str) -> TerminalResult<()> {
        let operation = "close session";
        let response = self
            .send::<()>(
                operation,
                Method::POST,
                &["cash-registers", cash_register_id, "sessions", session_id, "close"],
                None,
            )
            .await?;
        Self::expect_success(operation, response).await
    }

    async fn fetch_balance(&self, cash_register_id: &str) -> TerminalResult<Money> {
        let body: BalanceBody = self
            .get("fetch balance", &["cash-registers", cash_register_id, "balance"])
            .await?;
        Ok(body.balance)
    }

    async fn fetch_pending_cash_in(
        &self,
        cash_register_id: &str,
    ) -> TerminalResult<Option<PendingCashIn>> {
        let operation = "fetch pending cash-in";
        let response = self
            .send::<()>(
                operation,
                Method::GET,
                &["cash-registers", cash_register_id, "pending-cash-in"],
                None,
            )
            .await?;
        Self::decode_optional(operation, response).await
    }

    async fn confirm_pending_cash_in(&self, cash_register_id: &str, id: &str) -> TerminalResult<()> {
        let operation = "confirm pending cash-in";
        let response = self
            .send::<()>(
                operation,
                Method::POST,
                &["cash-registers", cash_register_id, "pending-cash-in", id, "confirm"],
                None,
            )
            .await?;
        Self::expect_success(operation, response).await
    }

    async fn create_intake(&self, request: &CreateIntakeRequest) -> TerminalResult<IntakeRecord> {
        self.post("create intake", &["intakes"], Some(request)).await
    }

    async fn fetch_intake(&self, id: &str) -> TerminalResult<IntakeRecord> {
        self.get("fetch intake", &["intakes", id]).await
    }

    async fn recalculate_intake(&self, id: &str) -> TerminalResult<IntakeRecord> {
        self.post::<(), _>("recalculate intake", &["intakes", id, "recalculate"], None)
            .await
    }

    async fn attach_customer(&self, id: &str, phone: &str) -> TerminalResult<IntakeRecord> {
        self.post("attach customer", &["intakes", id, "customer"], Some(&PhoneBody { phone }))
            .await
    }

    async fn offer_intake(&self, id: &str) -> TerminalResult<IntakeRecord> {
        self.post::<(), _>("offer intake", &["intakes", id, "offer"], None)
            .await
    }

    async fn accept_intake(&self, id: &str, phone: &str) -> TerminalResult<IntakeRecord> {
        self.post("accept intake", &["intakes", id, "accept"], Some(&PhoneBody { phone }))
            .await
    }

    async fn reject_intake(&self, id: &str) -> TerminalResult<()> {
        let operation = "reject intake";
        let response = self
            .send::<()>(operation, Method::POST, &["intakes", id, "reject"], None)
            .await?;
        Self::expect_success(operation, response).await
    }

    async fn fetch_offer_options(&self, id: &str) -> TerminalResult<Vec<OfferOption>> {
        self.get("fetch offer options", &["intakes", id, "offer-options"])
            .await
    }

    async fn lookup_customer(&self, phone: &str) -> TerminalResult<Option<Customer>> {
        let operation = "lookup customer";
        let response = self
            .send::<()>(operation, Method::GET, &["customers", phone], None)
            .await?;
        Self::decode_optional(operation, response).await
    }

    async fn fetch_exchange_rates(&self, cash_register_id: &str) -> TerminalResult<Vec<ExchangeRate>> {
        self.get(
            "fetch exchange rates",
            &["cash-registers", cash_register_id, "exchange-rates"],
        )
        .await
    }

    async fn fetch_iron_catalog(&self, cash_register_id: &str) -> TerminalResult<Vec<IronCatalogItem>> {
        self.get(
            "fetch iron catalog",
            &["cash-registers", cash_register_id, "iron-catalog"],
        )
        .await
    }

    async fn fetch_active_metal_rate(&self, shop_id: &str) -> TerminalResult<MetalRate> {
        self.get(
            "fetch active metal rate",
            &["shops", shop_id, "metal-rates", "active"],
        )
        .await
    }

    async fn fetch_languages(&self) -> TerminalResult<Vec<Language>> {
        self.get("fetch languages", &["languages"]).await
    }

    async fn submit_iron_purchase(
        &self,
        request: &IronPurchaseRequest,
    ) -> TerminalResult<IronPurchaseReceipt> {
        self.post("submit iron purchase", &["iron-purchases"], Some(request))
            .await
    }
}
