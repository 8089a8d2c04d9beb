//! Resolve-or-provision entry point
//!
//! Composes the resolver and the provisioner behind one call. Provisioning
//! for a subject runs under that subject's lock and re-checks the replica
//! first, so concurrent first requests create one account.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use binding_registry::HistorySync;
use binding_types::{canonical_did, ensure_no_pii, AccountId, EvmAddress, Subject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::error::{Result, ServiceError};
use crate::lock::IdentityLocks;
use crate::provisioner::Provisioner;
use crate::resolver::{Resolver, Tier};

/// Orchestrator settings
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    /// Zero leaves caching to the resolver.
    pub cache_ttl: Duration,
    pub did_salt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: Duration::from_secs(5 * 60),
            did_salt: None,
        }
    }
}

/// Where a resolution came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Reducer,
    Replica,
    Provisioned,
}

impl From<Tier> for Source {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Cache => Source::Cache,
            Tier::Reducer => Source::Reducer,
            Tier::Replica => Source::Replica,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Cache => "cache",
            Source::Reducer => "reducer",
            Source::Replica => "replica",
            Source::Provisioned => "provisioned",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    pub did: Subject,
    pub account_id: AccountId,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

impl ResolutionResult {
    fn new(did: Subject, account_id: AccountId, source: Source) -> Self {
        Self {
            did,
            account_id,
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Single entry point for identity-to-account resolution.
pub struct Orchestrator {
    resolver: Arc<Resolver>,
    provisioner: Arc<Provisioner>,
    sync: Option<HistorySync>,
    locks: IdentityLocks,
    cache: TtlCache<Subject, AccountId>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<Resolver>,
        provisioner: Arc<Provisioner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver,
            provisioner,
            sync: None,
            locks: IdentityLocks::new(),
            cache: TtlCache::new(config.cache_ttl),
            config,
        }
    }

    /// Replay history before the first resolution.
    pub fn with_history_sync(mut self, sync: HistorySync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Resolve `issuer` to its account, creating one if none exists.
    #[instrument(skip(self))]
    pub async fn resolve_or_provision(&self, issuer: &str) -> Result<ResolutionResult> {
        if !self.config.enabled {
            return Err(ServiceError::Disabled);
        }

        let did = canonical_did(issuer, self.config.did_salt.as_deref())?;
        ensure_no_pii(did.as_str())?;

        if let Some(account_id) = self.cache.get(&did) {
            debug!(did = %did, account_id = %account_id, "Orchestrator cache hit");
            return Ok(ResolutionResult::new(did, account_id, Source::Cache));
        }

        self.warm_up().await;

        if let Some(resolution) = self.resolver.resolve_detailed(did.as_str()).await? {
            self.cache.insert(did.clone(), resolution.account_id.clone());
            return Ok(ResolutionResult::new(
                did,
                resolution.account_id,
                resolution.tier.into(),
            ));
        }

        let alias = EvmAddress::from_did(did.as_str())
            .ok_or_else(|| ServiceError::NoAlias(did.to_string()))?;

        let _guard = self.locks.acquire(&did).await;

        // Another caller may have provisioned while this one waited.
        if let Some(account_id) = self.resolver.registry().query(did.as_str()) {
            debug!(did = %did, account_id = %account_id, "Bound while waiting for lock");
            self.cache.insert(did.clone(), account_id.clone());
            return Ok(ResolutionResult::new(did, account_id, Source::Reducer));
        }
        if let Some(account_id) = self.resolver.lookup_replica(&alias).await? {
            debug!(did = %did, account_id = %account_id, "Replica hit under lock");
            self.cache.insert(did.clone(), account_id.clone());
            return Ok(ResolutionResult::new(did, account_id, Source::Replica));
        }

        let outcome = self.provisioner.provision(&alias, &did, None).await?;
        let source = if outcome.was_created {
            Source::Provisioned
        } else {
            Source::Replica
        };

        info!(did = %did, account_id = %outcome.account_id, source = %source, "Identity resolved");
        self.cache.insert(did.clone(), outcome.account_id.clone());
        Ok(ResolutionResult::new(did, outcome.account_id, source))
    }

    /// Lazy initial replay. Failure leaves the registry cold; the replica
    /// still answers and the next call retries.
    async fn warm_up(&self) {
        if let Some(sync) = &self.sync {
            if let Err(e) = sync.ensure_initialized().await {
                warn!(error = %e, "Resolving without history replay");
            }
        }
    }

    /// Drop cached resolutions for `issuer` at both cache levels.
    pub fn invalidate(&self, issuer: &str) -> Result<()> {
        let did = canonical_did(issuer, self.config.did_salt.as_deref())?;
        self.cache.remove(&did);
        self.resolver.invalidate(did.as_str());
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn locks(&self) -> &IdentityLocks {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binding_ledger::{InMemoryLedger, InMemoryLog};
    use binding_registry::BindingRegistry;
    use binding_types::DidError;

    use crate::provisioner::ProvisionConfig;
    use crate::publisher::EventPublisher;
    use crate::resolver::ResolverConfig;

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator {
        let log = Arc::new(InMemoryLog::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let registry = Arc::new(BindingRegistry::new());
        let publisher = EventPublisher::spawn(log, "0.0.9");
        let resolver = Arc::new(Resolver::new(
            registry.clone(),
            ledger.clone(),
            publisher.clone(),
            ResolverConfig::default(),
        ));
        let provisioner = Arc::new(Provisioner::new(
            ledger.clone(),
            ledger,
            registry,
            publisher,
            ProvisionConfig::default(),
        ));
        Orchestrator::new(resolver, provisioner, config)
    }

    #[tokio::test]
    async fn disabled_flag_short_circuits() {
        let orchestrator = orchestrator(OrchestratorConfig {
            enabled: false,
            ..Default::default()
        });
        let err = orchestrator
            .resolve_or_provision("did:ethr:0x1111111111111111111111111111111111111111")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Disabled));
    }

    #[tokio::test]
    async fn empty_issuer_is_rejected() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let err = orchestrator.resolve_or_provision("  ").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidIdentity(DidError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn email_issuers_resolve_under_a_hashed_did() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let result = orchestrator
            .resolve_or_provision("email:Alice@Example.com")
            .await
            .unwrap();
        assert!(result.did.as_str().starts_with("did:ethr:0x"));
        assert!(!result.did.as_str().contains('@'));
        assert_eq!(result.source, Source::Provisioned);

        let again = orchestrator
            .resolve_or_provision("alice@example.com")
            .await
            .unwrap();
        assert_eq!(again.did, result.did);
        assert_eq!(again.source, Source::Cache);
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Source::Provisioned).unwrap(), "\"provisioned\"");
        assert_eq!(Source::from(Tier::Replica).to_string(), "replica");
    }
}
