//! # Context Resolver
//!
//! Keeps the reference data the current workflow needs and nothing more.
//! Deciding what to load is the pure [`assay_core::context::plan`]; this
//! module executes the plan against the store and holds the results.
//!
//! It also owns the tab gate: a switch that would discard intake progress
//! is parked until the operator confirms or cancels it.
//!
//! ## Customer Generations
//! Exchange rates belong to one customer. Every change of the resolved
//! customer (lookup, forgotten lookup, other attached tier) bumps a
//! generation. A rate or lookup answer that comes back under an older
//! generation is dropped, so dealer pricing cannot survive a reset.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use assay_core::context::{
    needs_exchange_rates, plan, ContextInputs, ContextPlan, ExchangeRateAction, TabGate, TabSwitch,
};
use assay_core::validation::{validate_phone, PhoneRegion};
use assay_core::{Customer, CustomerTier, ExchangeRate, IronCatalogItem, Language, MetalRate, Tab};

use crate::error::{TerminalError, TerminalResult};
use crate::store::DomainStore;

/// Reference data currently loaded for the terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    pub exchange_rates: Option<Vec<ExchangeRate>>,
    pub iron_catalog: Option<Vec<IronCatalogItem>>,
    pub metal_rate: Option<MetalRate>,
    pub languages: Option<Vec<Language>>,
    /// Result of the last ad-hoc customer lookup.
    pub looked_up: Option<Customer>,
}

#[derive(Debug, Default)]
struct Loaded {
    data: ReferenceData,
    attached_tier: Option<CustomerTier>,
    generation: u64,
}

impl Loaded {
    fn resolved_tier(&self) -> Option<CustomerTier> {
        self.attached_tier
            .or(self.data.looked_up.as_ref().map(|c| c.tier))
    }
}

pub struct ContextResolver {
    cash_register_id: String,
    shop_id: String,
    region: PhoneRegion,
    store: Arc<dyn DomainStore>,
    state: RwLock<Loaded>,
    gate: Mutex<TabGate>,
}

impl ContextResolver {
    pub fn new(
        cash_register_id: impl Into<String>,
        shop_id: impl Into<String>,
        region: PhoneRegion,
        tab: Tab,
        store: Arc<dyn DomainStore>,
    ) -> Self {
        ContextResolver {
            cash_register_id: cash_register_id.into(),
            shop_id: shop_id.into(),
            region,
            store,
            state: RwLock::new(Loaded::default()),
            gate: Mutex::new(TabGate::new(tab)),
        }
    }

    pub async fn data(&self) -> ReferenceData {
        self.state.read().await.data.clone()
    }

    pub async fn active_tab(&self) -> Tab {
        self.gate.lock().await.active()
    }

    pub async fn pending_tab(&self) -> Option<Tab> {
        self.gate.lock().await.pending()
    }

    /// Records the attached tier and returns the inputs with the current
    /// customer generation.
    async fn observe(&self, tab: Tab, attached_tier: Option<CustomerTier>) -> (ContextInputs, u64) {
        let mut state = self.state.write().await;
        if state.attached_tier != attached_tier {
            state.attached_tier = attached_tier;
            state.generation += 1;
        }
        let data = &state.data;
        let inputs = ContextInputs {
            tab,
            attached_tier,
            looked_up_tier: data.looked_up.as_ref().map(|c| c.tier),
            exchange_rates_loaded: data.exchange_rates.is_some(),
            iron_catalog_loaded: data.iron_catalog.is_some(),
            metal_rate_loaded: data.metal_rate.is_some(),
            languages_loaded: data.languages.is_some(),
        };
        (inputs, state.generation)
    }

    /// Re-derives and loads what the current tab and customer need.
    ///
    /// Every step of the plan is attempted; the first failure is returned.
    pub async fn resolve(
        &self,
        tab: Tab,
        attached_tier: Option<CustomerTier>,
    ) -> TerminalResult<ContextPlan> {
        let (inputs, generation) = self.observe(tab, attached_tier).await;
        let plan = plan(&inputs);
        if plan.is_noop() {
            return Ok(plan);
        }
        debug!(?plan, "Resolving context");

        let mut first_error: Option<TerminalError> = None;
        let mut note = |result: TerminalResult<()>| {
            if let Err(e) = result {
                warn!(error = %e, "Reference data load failed");
                first_error.get_or_insert(e);
            }
        };

        match plan.exchange_rates {
            ExchangeRateAction::Fetch => note(self.load_exchange_rates(generation).await),
            ExchangeRateAction::Clear => {
                self.state.write().await.data.exchange_rates = None;
                debug!("Exchange rates cleared");
            }
            ExchangeRateAction::Keep => {}
        }
        if plan.load_iron_catalog {
            note(self.load_iron_catalog().await);
        }
        if plan.load_metal_rate {
            note(self.load_metal_rate().await);
        }
        if plan.load_languages {
            note(self.load_languages().await);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(plan),
        }
    }

    async fn load_exchange_rates(&self, generation: u64) -> TerminalResult<()> {
        let rates = self.store.fetch_exchange_rates(&self.cash_register_id).await?;
        let mut state = self.state.write().await;
        if state.generation != generation || !needs_exchange_rates(state.resolved_tier()) {
            debug!(
                generation,
                current = state.generation,
                "Discarding exchange rates of a previous customer"
            );
            return Ok(());
        }
        info!(count = rates.len(), "Exchange rates loaded");
        state.data.exchange_rates = Some(rates);
        Ok(())
    }

    async fn load_iron_catalog(&self) -> TerminalResult<()> {
        let catalog = self.store.fetch_iron_catalog(&self.cash_register_id).await?;
        info!(count = catalog.len(), "Iron catalog loaded");
        self.state.write().await.data.iron_catalog = Some(catalog);
        Ok(())
    }

    async fn load_metal_rate(&self) -> TerminalResult<()> {
        let rate = self.store.fetch_active_metal_rate(&self.shop_id).await?;
        self.state.write().await.data.metal_rate = Some(rate);
        Ok(())
    }

    async fn load_languages(&self) -> TerminalResult<()> {
        let languages = self.store.fetch_languages().await?;
        self.state.write().await.data.languages = Some(languages);
        Ok(())
    }

    /// Looks a customer up by phone and remembers the result.
    ///
    /// A lookup overtaken by `forget_lookup` is returned but not remembered.
    pub async fn lookup_customer(&self, phone: &str) -> TerminalResult<Option<Customer>> {
        let phone = validate_phone(phone, self.region)?;
        let generation = self.state.read().await.generation;
        let customer = self.store.lookup_customer(&phone).await?;
        debug!(%phone, found = customer.is_some(), "Customer lookup");

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!(%phone, "Customer lookup overtaken by a reset");
            return Ok(customer);
        }
        state.data.looked_up = customer.clone();
        state.generation += 1;
        Ok(customer)
    }

    /// Forgets the ad-hoc lookup, as after a workflow reset. Rate answers
    /// still in flight for the old customer are dropped.
    pub async fn forget_lookup(&self) {
        let mut state = self.state.write().await;
        state.data.looked_up = None;
        state.generation += 1;
    }

    // =========================================================================
    // Tab Gate
    // =========================================================================

    pub async fn request_tab(&self, tab: Tab, has_progress: bool) -> TabSwitch {
        self.gate.lock().await.request(tab, has_progress)
    }

    pub async fn confirm_tab(&self) -> Option<Tab> {
        self.gate.lock().await.confirm()
    }

    pub async fn cancel_tab(&self) -> Option<Tab> {
        self.gate.lock().await.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{customer, ScriptedStore};
    use std::time::Duration;

    fn resolver(store: Arc<ScriptedStore>) -> ContextResolver {
        ContextResolver::new("reg-1", "shop-7", PhoneRegion::Am, Tab::Catalyst, store)
    }

    #[tokio::test]
    async fn test_first_resolve_loads_languages_and_rate_once() {
        let store = Arc::new(ScriptedStore::default());
        let resolver = resolver(store.clone());

        resolver.resolve(Tab::Catalyst, None).await.unwrap();
        resolver.resolve(Tab::Catalyst, None).await.unwrap();

        assert_eq!(store.calls("fetch_languages"), 1);
        assert_eq!(store.calls("fetch_active_metal_rate"), 1);
        assert_eq!(store.calls("fetch_exchange_rates"), 0);
        assert_eq!(store.calls("fetch_iron_catalog"), 0);
    }

    #[tokio::test]
    async fn test_iron_tab_loads_catalog() {
        let store = Arc::new(ScriptedStore::default());
        let resolver = resolver(store.clone());

        resolver.resolve(Tab::Iron, None).await.unwrap();
        resolver.resolve(Tab::Iron, None).await.unwrap();
        assert_eq!(store.calls("fetch_iron_catalog"), 1);
        assert!(resolver.data().await.iron_catalog.is_some());
    }

    #[tokio::test]
    async fn test_dealer_lookup_fetches_then_standard_clears() {
        let store = Arc::new(ScriptedStore::default());
        let resolver = resolver(store.clone());

        store.set_customer(Some(customer("+37499000111", CustomerTier::Dealer)));
        resolver.lookup_customer("+374 99 000111").await.unwrap();
        resolver.resolve(Tab::Catalyst, None).await.unwrap();
        assert!(resolver.data().await.exchange_rates.is_some());

        // An attached standard customer wins over the lookup.
        resolver
            .resolve(Tab::Catalyst, Some(CustomerTier::Standard))
            .await
            .unwrap();
        assert!(resolver.data().await.exchange_rates.is_none());
        assert_eq!(store.calls("fetch_exchange_rates"), 1);
    }

    #[tokio::test]
    async fn test_failure_still_attempts_other_loads() {
        let store = Arc::new(ScriptedStore::default());
        store.fail("fetch_languages");
        let resolver = resolver(store.clone());

        let err = resolver.resolve(Tab::Catalyst, None).await.unwrap_err();
        assert!(matches!(err, TerminalError::Rejected { operation: "fetch_languages", .. }));
        assert!(resolver.data().await.metal_rate.is_some());

        store.recover("fetch_languages");
        resolver.resolve(Tab::Catalyst, None).await.unwrap();
        assert_eq!(store.calls("fetch_languages"), 2);
        assert_eq!(store.calls("fetch_active_metal_rate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forgotten_lookup_drops_rates_in_flight() {
        let store = Arc::new(ScriptedStore::default());
        store.set_customer(Some(customer("+37499000111", CustomerTier::Dealer)));
        store.delay_exchange_rates(Duration::from_millis(100));
        let resolver = resolver(store.clone());
        resolver.lookup_customer("+374 99 000111").await.unwrap();

        let (resolved, ()) = tokio::join!(resolver.resolve(Tab::Catalyst, None), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.forget_lookup().await;
        });
        resolved.unwrap();

        assert_eq!(store.calls("fetch_exchange_rates"), 1);
        assert!(resolver.data().await.exchange_rates.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_change_drops_rates_in_flight() {
        let store = Arc::new(ScriptedStore::default());
        store.delay_exchange_rates(Duration::from_millis(100));
        let resolver = resolver(store.clone());

        let (dealer, standard) = tokio::join!(
            resolver.resolve(Tab::Catalyst, Some(CustomerTier::Dealer)),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                resolver
                    .resolve(Tab::Catalyst, Some(CustomerTier::Standard))
                    .await
            }
        );
        dealer.unwrap();
        standard.unwrap();
        assert!(resolver.data().await.exchange_rates.is_none());

        // The next dealer resolve fetches and keeps them.
        store.delay_exchange_rates(Duration::ZERO);
        resolver
            .resolve(Tab::Catalyst, Some(CustomerTier::Dealer))
            .await
            .unwrap();
        assert!(resolver.data().await.exchange_rates.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_overtaken_by_reset_is_not_remembered() {
        let store = Arc::new(ScriptedStore::default());
        store.set_customer(Some(customer("+37499000111", CustomerTier::Dealer)));
        store.delay_lookups(Duration::from_millis(100));
        let resolver = resolver(store.clone());

        let (found, ()) = tokio::join!(resolver.lookup_customer("+374 99 000111"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.forget_lookup().await;
        });
        assert!(found.unwrap().is_some());
        assert!(resolver.data().await.looked_up.is_none());
    }

    #[tokio::test]
    async fn test_invalid_lookup_phone_never_reaches_store() {
        let store = Arc::new(ScriptedStore::default());
        let resolver = resolver(store.clone());

        assert!(resolver.lookup_customer("12").await.is_err());
        assert_eq!(store.calls("lookup_customer"), 0);
    }
}
