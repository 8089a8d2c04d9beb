//! Tiered identity resolution
//!
//! Cache, then registry, then the replica. A replica-only hit is confirmed on
//! the log with a sampled `ASSERT` so other services learn the binding
//! through replay.

use std::sync::Arc;
use std::time::Duration;

use binding_ledger::ReplicaQuery;
use binding_registry::BindingRegistry;
use binding_types::{AccountId, Chain, EvmAddress, IdentityEvent, Subject};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::cache::{CacheStats, TtlCache};
use crate::error::{Result, ServiceError};
use crate::publisher::EventPublisher;

/// `ASSERT` reason for bindings learned from the replica.
pub const MIRROR_RESOLUTION_REASON: &str = "mirror-resolution";

/// Resolver settings
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub cache_ttl: Duration,
    /// Probability, 0.0 to 1.0, of emitting an `ASSERT` on a replica hit.
    pub assert_sampling: f64,
    pub chain: Chain,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(15 * 60),
            assert_sampling: 1.0,
            chain: Chain::Testnet,
        }
    }
}

/// Tier that answered a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cache,
    Reducer,
    Replica,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub account_id: AccountId,
    pub tier: Tier,
}

/// Identity resolver
pub struct Resolver {
    registry: Arc<BindingRegistry>,
    replica: Arc<dyn ReplicaQuery>,
    publisher: EventPublisher,
    cache: TtlCache<Subject, AccountId>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        registry: Arc<BindingRegistry>,
        replica: Arc<dyn ReplicaQuery>,
        publisher: EventPublisher,
        config: ResolverConfig,
    ) -> Self {
        Self {
            registry,
            replica,
            publisher,
            cache: TtlCache::new(config.cache_ttl),
            config,
        }
    }

    /// Account bound to `identity`, if any tier knows it.
    pub async fn resolve(&self, identity: &str) -> Result<Option<AccountId>> {
        Ok(self
            .resolve_detailed(identity)
            .await?
            .map(|resolution| resolution.account_id))
    }

    /// Like [`Resolver::resolve`], reporting which tier answered.
    #[instrument(skip(self))]
    pub async fn resolve_detailed(&self, identity: &str) -> Result<Option<Resolution>> {
        let subject = Subject::new(identity);

        if let Some(account_id) = self.cache.get(&subject) {
            debug!(subject = %subject, account_id = %account_id, "Resolver cache hit");
            return Ok(Some(Resolution {
                account_id,
                tier: Tier::Cache,
            }));
        }

        if let Some(account_id) = self.registry.query(subject.as_str()) {
            debug!(subject = %subject, account_id = %account_id, "Registry hit");
            self.cache.insert(subject, account_id.clone());
            return Ok(Some(Resolution {
                account_id,
                tier: Tier::Reducer,
            }));
        }

        let Some(alias) = EvmAddress::from_did(subject.as_str()) else {
            debug!(subject = %subject, "Identity has no key alias; skipping replica");
            return Ok(None);
        };

        match self.lookup_replica(&alias).await? {
            Some(account_id) => {
                debug!(subject = %subject, account_id = %account_id, "Replica hit");
                self.cache.insert(subject.clone(), account_id.clone());
                self.sample_assert(subject, &account_id);
                Ok(Some(Resolution {
                    account_id,
                    tier: Tier::Replica,
                }))
            }
            None => {
                debug!(subject = %subject, "No binding at any tier");
                Ok(None)
            }
        }
    }

    /// Direct replica read, bypassing cache and registry.
    pub async fn lookup_replica(&self, alias: &EvmAddress) -> Result<Option<AccountId>> {
        self.replica
            .lookup_account(alias)
            .await
            .map_err(ServiceError::Replica)
    }

    fn sample_assert(&self, subject: Subject, account_id: &AccountId) {
        let rate = self.config.assert_sampling;
        if rate <= 0.0 || rand::thread_rng().gen::<f64>() >= rate {
            debug!(subject = %subject, rate, "ASSERT skipped by sampling");
            return;
        }

        let event = IdentityEvent::assert(
            self.config.chain,
            subject,
            account_id.clone(),
            MIRROR_RESOLUTION_REASON,
        );
        self.publisher.publish_async(event);
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn invalidate(&self, identity: &str) {
        self.cache.remove(&Subject::new(identity));
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
