//! Binding state reducer
//!
//! Folds identity events into one [`BindingRecord`] per subject. The fold is
//! pure apart from its own map: replaying a log, or any prefix of it again,
//! converges on the same state.

use std::sync::atomic::{AtomicU64, Ordering};

use binding_types::{AccountId, BindingRecord, EventPayload, IdentityEvent, Subject};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

/// Registry statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    /// Events that changed state.
    pub applied: u64,
    /// Events discarded by the ordering guard.
    pub stale: u64,
    /// Unsigned `ROTATE`/`UNBIND` events.
    pub rejected: u64,
}

/// In-memory binding state derived from identity events.
#[derive(Default)]
pub struct BindingRegistry {
    records: DashMap<Subject, BindingRecord>,
    applied: AtomicU64,
    stale: AtomicU64,
    rejected: AtomicU64,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the registry.
    ///
    /// Events at or before a subject's last accepted `issued_at` are dropped
    /// silently. `ROTATE` and `UNBIND` without a signature are dropped with a
    /// warning.
    pub fn apply(&self, event: &IdentityEvent) {
        let subject = Subject::new(event.subject().as_str());
        let unauthorized = event.kind().requires_signature() && !event.is_signed();

        // The entry guard holds the shard lock, so the check and the
        // transition cannot interleave with another fold of the same subject.
        match self.records.entry(subject) {
            Entry::Occupied(mut occupied) => {
                if event.issued_at() <= occupied.get().last_issued_at {
                    self.stale.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        subject = %occupied.key(),
                        kind = %event.kind(),
                        issued_at = %event.issued_at(),
                        "Discarding stale identity event"
                    );
                    return;
                }
                if unauthorized {
                    self.reject(occupied.key(), event);
                    return;
                }
                transition(occupied.get_mut(), event);
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            Entry::Vacant(vacant) => {
                if unauthorized {
                    self.reject(vacant.key(), event);
                    return;
                }
                match initial_record(event) {
                    Some(record) => {
                        vacant.insert(record);
                        self.applied.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        debug!(subject = %vacant.key(), "Unbind for unknown subject ignored");
                    }
                }
            }
        }
    }

    fn reject(&self, subject: &Subject, event: &IdentityEvent) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            subject = %subject,
            kind = %event.kind(),
            issued_at = %event.issued_at(),
            "Rejected unsigned identity event"
        );
    }

    /// Active account for a subject.
    pub fn query(&self, subject: &str) -> Option<AccountId> {
        self.records
            .get(&Subject::new(subject))
            .and_then(|record| record.active_account().cloned())
    }

    /// Full record for a subject, active or not.
    pub fn details(&self, subject: &str) -> Option<BindingRecord> {
        self.records
            .get(&Subject::new(subject))
            .map(|record| record.clone())
    }

    /// All records ordered by subject.
    pub fn records(&self) -> Vec<(Subject, BindingRecord)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let total = self.records.len();
        let active = self.records.iter().filter(|r| r.active).count();
        RegistryStats {
            total,
            active,
            inactive: total - active,
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Drop all state. Intended for tests.
    pub fn clear(&self) {
        self.records.clear();
        self.applied.store(0, Ordering::Relaxed);
        self.stale.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
    }
}

fn initial_record(event: &IdentityEvent) -> Option<BindingRecord> {
    let (account_id, evm_address) = match event.payload() {
        EventPayload::Bind(p) => (p.account_id.clone(), non_empty(&p.evm_address)),
        EventPayload::Assert(p) => (p.account_id.clone(), None),
        EventPayload::Rotate(p) => (p.to_account_id.clone(), None),
        EventPayload::Unbind(_) => return None,
    };
    Some(BindingRecord {
        account_id,
        active: true,
        last_event_kind: event.kind(),
        last_issued_at: event.issued_at(),
        evm_address,
    })
}

fn transition(record: &mut BindingRecord, event: &IdentityEvent) {
    match event.payload() {
        EventPayload::Bind(p) => {
            record.account_id = p.account_id.clone();
            record.active = true;
            if let Some(evm) = non_empty(&p.evm_address) {
                record.evm_address = Some(evm);
            }
        }
        EventPayload::Assert(p) => {
            record.account_id = p.account_id.clone();
            record.active = true;
        }
        EventPayload::Rotate(p) => {
            record.account_id = p.to_account_id.clone();
            record.active = true;
        }
        EventPayload::Unbind(_) => {
            record.active = false;
        }
    }
    record.last_event_kind = event.kind();
    record.last_issued_at = event.issued_at();
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_lowercase())
}
