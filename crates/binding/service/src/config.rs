//! Configuration for the binding service

use std::time::Duration;

use binding_registry::SyncConfig;
use binding_types::Chain;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::orchestrator::OrchestratorConfig;
use crate::provisioner::ProvisionConfig;
use crate::resolver::ResolverConfig;

/// Binding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Feature flag
    #[serde(default)]
    pub enabled: bool,

    /// Consensus-log topic carrying identity events
    #[serde(default)]
    pub topic_id: String,

    /// Target ledger network
    #[serde(default)]
    pub network: Chain,

    /// Mirror node REST base URL
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,

    /// History window replayed when there is no watermark
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// Periodic resync interval in seconds (0 disables)
    #[serde(default)]
    pub resync_interval_secs: u64,

    /// Probability of emitting an ASSERT on a replica-only hit
    #[serde(default = "default_assert_sampling")]
    pub assert_sampling: f64,

    /// Messages requested per history fetch
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,

    /// Fetch calls per sync run
    #[serde(default = "default_sync_max_batches")]
    pub sync_max_batches: usize,

    /// Resolver cache TTL in seconds
    #[serde(default = "default_resolver_cache_ttl")]
    pub resolver_cache_ttl_secs: u64,

    /// Orchestrator cache TTL in seconds (0 disables)
    #[serde(default = "default_orchestrator_cache_ttl")]
    pub orchestrator_cache_ttl_secs: u64,

    /// Replica polls after the funding transfer
    #[serde(default = "default_poll_attempts")]
    pub provision_poll_attempts: u32,

    /// Delay before each replica poll in milliseconds
    #[serde(default = "default_poll_interval")]
    pub provision_poll_interval_ms: u64,

    /// Auto-create transfer amount in the smallest unit
    #[serde(default = "default_funding_amount")]
    pub funding_amount: u64,

    /// Salt for hashed contact DIDs
    #[serde(default)]
    pub did_salt: Option<String>,

    /// Mirror HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_id: String::new(),
            network: Chain::Testnet,
            mirror_url: default_mirror_url(),
            lookback_hours: default_lookback_hours(),
            resync_interval_secs: 0,
            assert_sampling: default_assert_sampling(),
            sync_batch_size: default_sync_batch_size(),
            sync_max_batches: default_sync_max_batches(),
            resolver_cache_ttl_secs: default_resolver_cache_ttl(),
            orchestrator_cache_ttl_secs: default_orchestrator_cache_ttl(),
            provision_poll_attempts: default_poll_attempts(),
            provision_poll_interval_ms: default_poll_interval(),
            funding_amount: default_funding_amount(),
            did_salt: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// Default value helpers
fn default_mirror_url() -> String {
    "https://testnet.mirrornode.hedera.com".to_string()
}

fn default_lookback_hours() -> u64 {
    7 * 24
}

fn default_assert_sampling() -> f64 {
    1.0
}

fn default_sync_batch_size() -> usize {
    500
}

fn default_sync_max_batches() -> usize {
    20
}

fn default_resolver_cache_ttl() -> u64 {
    15 * 60
}

fn default_orchestrator_cache_ttl() -> u64 {
    5 * 60
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    500
}

fn default_funding_amount() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    10
}

impl BindingConfig {
    /// Load configuration: defaults, then an optional file, then `BINDING_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&BindingConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Keys are flat, so only the prefix is separated.
        builder = builder.add_source(
            config::Environment::with_prefix("BINDING")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create a development configuration
    pub fn development() -> Self {
        Self {
            enabled: true,
            topic_id: "0.0.1001".to_string(),
            provision_poll_interval_ms: 50,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.topic_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "topic_id is required when binding is enabled".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.assert_sampling) {
            return Err(ConfigError::Invalid(format!(
                "assert_sampling must be between 0.0 and 1.0, got {}",
                self.assert_sampling
            )));
        }
        if self.sync_batch_size == 0 {
            return Err(ConfigError::Invalid("sync_batch_size must be positive".into()));
        }
        if self.provision_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "provision_poll_attempts must be positive".into(),
            ));
        }
        if self.funding_amount == 0 {
            return Err(ConfigError::Invalid("funding_amount must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            topic: self.topic_id.clone(),
            lookback: Duration::from_secs(self.lookback_hours * 60 * 60),
            batch_size: self.sync_batch_size,
            max_batches: self.sync_max_batches,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_ttl: Duration::from_secs(self.resolver_cache_ttl_secs),
            assert_sampling: self.assert_sampling,
            chain: self.network,
        }
    }

    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            poll_attempts: self.provision_poll_attempts,
            poll_interval: Duration::from_millis(self.provision_poll_interval_ms),
            funding_amount: self.funding_amount,
            chain: self.network,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            enabled: self.enabled,
            cache_ttl: Duration::from_secs(self.orchestrator_cache_ttl_secs),
            did_salt: self.did_salt.clone(),
        }
    }
}
