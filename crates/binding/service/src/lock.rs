//! Per-identity mutual exclusion
//!
//! Scoped to one process. Cross-process exclusion belongs to a distributed
//! lock behind the same acquire/release shape.

use std::sync::Arc;

use binding_types::Subject;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type LockMap = DashMap<Subject, Arc<Mutex<()>>>;

/// Async locks keyed by subject.
#[derive(Clone, Default)]
pub struct IdentityLocks {
    locks: Arc<LockMap>,
}

/// Held lock for one subject. Released on drop.
pub struct IdentityGuard {
    locks: Arc<LockMap>,
    subject: Subject,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `subject`.
    pub async fn acquire(&self, subject: &Subject) -> IdentityGuard {
        let lock = self
            .locks
            .entry(subject.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        trace!(subject = %subject, "Identity lock acquired");

        IdentityGuard {
            locks: self.locks.clone(),
            subject: subject.clone(),
            guard: Some(guard),
        }
    }

    /// Subjects whose lock is currently held.
    pub fn held(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().try_lock().is_err())
            .count()
    }

    /// Subjects with a lock entry, held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl IdentityGuard {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own handle left means nobody holds or awaits it.
        self.locks
            .remove_if(&self.subject, |_, lock| Arc::strong_count(lock) == 1);
        trace!(subject = %self.subject, "Identity lock released");
    }
}
