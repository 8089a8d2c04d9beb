//! Service wiring
//!
//! Builds every component from a [`BindingConfig`] and a set of collaborators
//! and owns their background tasks.

use std::sync::{Arc, Mutex, PoisonError};

use binding_ledger::{ConsensusTimestamp, LedgerTransfer, LogReader, LogWriter, ReplicaQuery};
use binding_registry::{BindingRegistry, HistorySync, RegistryStats};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::cache::CacheStats;
use crate::config::BindingConfig;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::provisioner::Provisioner;
use crate::publisher::{EventPublisher, PublisherStats};
use crate::resolver::Resolver;

/// External systems the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub log_reader: Arc<dyn LogReader>,
    pub log_writer: Arc<dyn LogWriter>,
    pub replica: Arc<dyn ReplicaQuery>,
    pub transfer: Arc<dyn LedgerTransfer>,
}

/// Point-in-time health view
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub enabled: bool,
    pub topic_id: String,
    pub initialized: bool,
    pub watermark: Option<ConsensusTimestamp>,
    pub registry: RegistryStats,
    pub publisher: PublisherStats,
    pub resolver_cache: CacheStats,
    pub orchestrator_cache: CacheStats,
    pub locks_held: usize,
}

/// Fully wired identity binding service.
pub struct BindingService {
    config: BindingConfig,
    registry: Arc<BindingRegistry>,
    sync: HistorySync,
    publisher: EventPublisher,
    orchestrator: Orchestrator,
    resync: Mutex<Option<JoinHandle<()>>>,
}

impl BindingService {
    /// Wire the service. Must be called inside a tokio runtime.
    pub fn new(config: BindingConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(BindingRegistry::new());
        let sync = HistorySync::new(
            collaborators.log_reader,
            registry.clone(),
            config.sync_config(),
        );
        let publisher = EventPublisher::spawn(collaborators.log_writer, config.topic_id.clone());

        let resolver = Arc::new(Resolver::new(
            registry.clone(),
            collaborators.replica.clone(),
            publisher.clone(),
            config.resolver_config(),
        ));
        let provisioner = Arc::new(Provisioner::new(
            collaborators.replica,
            collaborators.transfer,
            registry.clone(),
            publisher.clone(),
            config.provision_config(),
        ));
        let orchestrator = Orchestrator::new(resolver, provisioner, config.orchestrator_config())
            .with_history_sync(sync.clone());

        Ok(Self {
            config,
            registry,
            sync,
            publisher,
            orchestrator,
            resync: Mutex::new(None),
        })
    }

    /// Replay history and start periodic resync. A no-op when disabled.
    #[instrument(skip(self), fields(topic = %self.config.topic_id))]
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Identity binding disabled; not starting sync");
            return Ok(());
        }

        self.sync.ensure_initialized().await?;

        if let Some(handle) = self.sync.spawn_periodic(self.config.resync_interval()) {
            let mut slot = self.resync.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }

        info!(watermark = ?self.sync.watermark(), "Identity binding service started");
        Ok(())
    }

    /// Stop resync and drain queued events.
    pub async fn shutdown(&self) {
        let handle = self
            .resync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.publisher.flush().await;
        info!("Identity binding service stopped");
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            enabled: self.config.enabled,
            topic_id: self.config.topic_id.clone(),
            initialized: self.sync.is_initialized(),
            watermark: self.sync.watermark(),
            registry: self.registry.stats(),
            publisher: self.publisher.stats(),
            resolver_cache: self.orchestrator.resolver().cache_stats(),
            orchestrator_cache: self.orchestrator.cache_stats(),
            locks_held: self.orchestrator.locks().held(),
        }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        self.orchestrator.resolver()
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    pub fn sync(&self) -> &HistorySync {
        &self.sync
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }
}

impl Drop for BindingService {
    fn drop(&mut self) {
        if let Some(handle) = self
            .resync
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
