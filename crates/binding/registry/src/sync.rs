//! Consensus-log history sync
//!
//! Replays identity events from the log into a [`BindingRegistry`] and keeps
//! a watermark of the last folded consensus timestamp.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use binding_ledger::{ConsensusTimestamp, LogReader};
use binding_types::{EventError, IdentityEvent};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::reducer::BindingRegistry;

/// History sync settings
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Consensus-log topic carrying identity events.
    pub topic: String,
    /// How far back the first replay reaches when there is no watermark.
    pub lookback: Duration,
    /// Messages requested per fetch.
    pub batch_size: usize,
    /// Fetch calls per run.
    pub max_batches: usize,
}

impl SyncConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            batch_size: 500,
            max_batches: 20,
        }
    }
}

/// Outcome of one sync run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Messages read from the log.
    pub fetched: usize,
    /// Identity events handed to the registry.
    pub applied: usize,
    /// Messages that are not identity events.
    pub skipped: usize,
    /// Identity events that failed to decode.
    pub malformed: usize,
    pub batches: usize,
    pub watermark: Option<ConsensusTimestamp>,
}

type InitFuture = Shared<BoxFuture<'static, Result<SyncReport>>>;

/// Replays the consensus log into a registry.
///
/// Cheap to clone; clones share the watermark and initialization state.
#[derive(Clone)]
pub struct HistorySync {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    reader: Arc<dyn LogReader>,
    registry: Arc<BindingRegistry>,
    config: SyncConfig,
    watermark: RwLock<Option<ConsensusTimestamp>>,
    /// Serializes runs so the watermark only moves forward.
    run_lock: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<InitFuture>>,
    initialized: AtomicBool,
}

impl HistorySync {
    pub fn new(
        reader: Arc<dyn LogReader>,
        registry: Arc<BindingRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                reader,
                registry,
                config,
                watermark: RwLock::new(None),
                run_lock: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(None),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn watermark(&self) -> Option<ConsensusTimestamp> {
        self.inner.watermark()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Run the initial replay once.
    ///
    /// Concurrent callers await the same in-flight run. A failed run leaves
    /// the sync uninitialized so the next caller retries.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let run = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if self.is_initialized() {
                return Ok(());
            }

            match slot.as_ref() {
                Some(run) => run.clone(),
                None => {
                    let inner = self.inner.clone();
                    let run = async move {
                        let result = inner.run().await;
                        if result.is_ok() {
                            inner.initialized.store(true, Ordering::Release);
                        }
                        *inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(run.clone());
                    run
                }
            }
        };

        match run.await {
            Ok(report) => {
                info!(
                    topic = %self.inner.config.topic,
                    applied = report.applied,
                    skipped = report.skipped,
                    malformed = report.malformed,
                    "Identity history initialized"
                );
                Ok(())
            }
            Err(e) => {
                warn!(topic = %self.inner.config.topic, error = %e, "Identity history initialization failed");
                Err(e)
            }
        }
    }

    /// Catch up from the watermark.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.inner.run().await
    }

    /// Re-sync every `interval` in the background. `None` or zero disables.
    pub fn spawn_periodic(&self, interval: Option<Duration>) -> Option<JoinHandle<()>> {
        let interval = interval.filter(|d| !d.is_zero())?;
        let sync = self.clone();

        info!(interval_secs = interval.as_secs(), "Starting periodic identity resync");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match sync.sync().await {
                    Ok(report) => {
                        debug!(applied = report.applied, watermark = ?report.watermark, "Periodic resync complete")
                    }
                    Err(e) => warn!(error = %e, "Periodic resync failed"),
                }
            }
        }))
    }
}

impl SyncInner {
    fn watermark(&self) -> Option<ConsensusTimestamp> {
        *self.watermark.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, latest: ConsensusTimestamp) {
        let mut watermark = self.watermark.write().unwrap_or_else(PoisonError::into_inner);
        if watermark.map_or(true, |current| latest > current) {
            *watermark = Some(latest);
        }
    }

    fn lookback_start(&self) -> Option<ConsensusTimestamp> {
        chrono::Duration::from_std(self.config.lookback)
            .ok()
            .and_then(|lookback| Utc::now().checked_sub_signed(lookback))
            .map(ConsensusTimestamp::from_datetime)
    }

    #[instrument(skip(self), fields(topic = %self.config.topic))]
    async fn run(&self) -> Result<SyncReport> {
        if self.config.topic.is_empty() {
            return Err(SyncError::NotConfigured("topic id is empty".into()));
        }

        let _guard = self.run_lock.lock().await;

        let batch_size = self.config.batch_size.max(1);
        let mut report = SyncReport::default();
        let mut since = self.watermark().or_else(|| self.lookback_start());

        for _ in 0..self.config.max_batches.max(1) {
            let batch = self
                .reader
                .fetch(&self.config.topic, since, batch_size)
                .await?;
            report.batches += 1;
            report.fetched += batch.len();

            let mut latest: Option<ConsensusTimestamp> = None;
            for message in &batch {
                match IdentityEvent::decode(&message.contents) {
                    Ok(event) => {
                        self.registry.apply(&event);
                        report.applied += 1;
                    }
                    Err(EventError::UnknownKind(_)) => report.skipped += 1,
                    Err(e) => {
                        report.malformed += 1;
                        debug!(
                            sequence = message.sequence,
                            consensus_timestamp = %message.consensus_timestamp,
                            error = %e,
                            "Skipping malformed identity event"
                        );
                    }
                }
                latest = latest.max(Some(message.consensus_timestamp));
            }

            if let Some(latest) = latest {
                self.advance(latest);
                since = self.watermark();
            }

            if batch.len() < batch_size {
                break;
            }
        }

        report.watermark = self.watermark();
        debug!(
            fetched = report.fetched,
            applied = report.applied,
            batches = report.batches,
            "Sync run complete"
        );
        Ok(report)
    }
}
