//! Background event publisher
//!
//! Owns the [`LogWriter`]. Callers hand events to a worker task over an
//! unbounded channel, so a slow or failing log never blocks resolution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use binding_ledger::{LogWriter, SubmitReceipt};
use binding_types::IdentityEvent;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};

/// Publisher counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
    /// Events that never reached the worker.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum Command {
    Publish {
        event: IdentityEvent,
        reply: Option<oneshot::Sender<Result<SubmitReceipt>>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the publishing worker. Clones share the worker.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Command>,
    counters: Arc<Counters>,
    topic: Arc<str>,
}

impl EventPublisher {
    /// Start the worker on the current tokio runtime. It stops once every
    /// handle is dropped and the queue is drained.
    pub fn spawn(writer: Arc<dyn LogWriter>, topic: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let topic: Arc<str> = Arc::from(topic.into());

        tokio::spawn(run_worker(writer, topic.clone(), counters.clone(), rx));

        Self {
            tx,
            counters,
            topic,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue an event without waiting. Failures are counted and logged.
    pub fn publish_async(&self, event: IdentityEvent) {
        let kind = event.kind();
        if self
            .tx
            .send(Command::Publish { event, reply: None })
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %kind, "Event publisher stopped; event dropped");
        }
    }

    /// Queue an event and wait for the log to acknowledge it.
    pub async fn publish(&self, event: IdentityEvent) -> Result<SubmitReceipt> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Publish {
                event,
                reply: Some(reply),
            })
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(ServiceError::PublisherClosed);
        }
        rx.await.map_err(|_| ServiceError::PublisherClosed)?
    }

    /// Resolve once every event queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    writer: Arc<dyn LogWriter>,
    topic: Arc<str>,
    counters: Arc<Counters>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    debug!(topic = %topic, "Event publisher started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Publish { event, reply } => {
                let result = submit(writer.as_ref(), &topic, &event).await;
                match &result {
                    Ok(receipt) => {
                        counters.published.fetch_add(1, Ordering::Relaxed);
                        info!(
                            kind = %event.kind(),
                            subject = %event.subject(),
                            sequence = receipt.sequence,
                            "Published identity event"
                        );
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            kind = %event.kind(),
                            subject = %event.subject(),
                            error = %e,
                            "Identity event publish failed"
                        );
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!(topic = %topic, "Event publisher stopped");
}

async fn submit(
    writer: &dyn LogWriter,
    topic: &str,
    event: &IdentityEvent,
) -> Result<SubmitReceipt> {
    event.validate()?;
    let bytes = event.encode()?;
    writer
        .submit(topic, bytes)
        .await
        .map_err(ServiceError::Publish)
}
