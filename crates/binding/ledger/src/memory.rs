//! In-memory implementations of the collaborator traits
//!
//! These are suitable for development and testing. They record call counts
//! and expose failure switches so the pipeline's error paths can be driven
//! deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use binding_types::{AccountId, EvmAddress, IdentityEvent};
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{LedgerError, Result};
use crate::traits::{LedgerTransfer, LogReader, LogWriter, ReplicaQuery};
use crate::types::{ConsensusTimestamp, LogMessage, SubmitReceipt, TransferReceipt};

/// In-memory consensus log with strictly increasing consensus timestamps.
#[derive(Default)]
pub struct InMemoryLog {
    inner: RwLock<LogState>,
    fetch_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_submit: AtomicBool,
    fetch_delay_ms: AtomicU64,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<LogMessage>>,
    last_timestamp: Option<ConsensusTimestamp>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message stamped with the current time.
    pub fn append(&self, topic: &str, contents: Vec<u8>) -> SubmitReceipt {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let now = ConsensusTimestamp::from_datetime(Utc::now());
        let timestamp = match state.last_timestamp {
            Some(last) if now <= last => last.next(),
            _ => now,
        };
        state.last_timestamp = Some(timestamp);

        let stream = state.topics.entry(topic.to_string()).or_default();
        let sequence = stream.len() as u64 + 1;
        stream.push(LogMessage {
            sequence,
            consensus_timestamp: timestamp,
            contents,
        });

        SubmitReceipt {
            sequence,
            consensus_timestamp: timestamp,
        }
    }

    /// Insert a message at an explicit consensus time, keeping the topic ordered.
    pub fn append_at(&self, topic: &str, timestamp: ConsensusTimestamp, contents: Vec<u8>) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let stream = state.topics.entry(topic.to_string()).or_default();
        let sequence = stream.len() as u64 + 1;
        let index = stream.partition_point(|m| m.consensus_timestamp <= timestamp);
        stream.insert(
            index,
            LogMessage {
                sequence,
                consensus_timestamp: timestamp,
                contents,
            },
        );
        if state.last_timestamp.map_or(true, |last| timestamp > last) {
            state.last_timestamp = Some(timestamp);
        }
    }

    /// All messages on a topic in consensus order.
    pub fn messages(&self, topic: &str) -> Vec<LogMessage> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Messages on a topic that decode as identity events.
    pub fn events(&self, topic: &str) -> Vec<IdentityEvent> {
        self.messages(topic)
            .iter()
            .filter_map(|m| IdentityEvent::decode(&m.contents).ok())
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// Delay every fetch, to hold a sync run in flight.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogReader for InMemoryLog {
    async fn fetch(
        &self,
        topic: &str,
        since: Option<ConsensusTimestamp>,
        limit: usize,
    ) -> Result<Vec<LogMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("log fetch disabled".into()));
        }

        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .topics
            .get(topic)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|m| since.map_or(true, |since| m.consensus_timestamp > since))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl LogWriter for InMemoryLog {
    async fn submit(&self, topic: &str, contents: Vec<u8>) -> Result<SubmitReceipt> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("log submit disabled".into()));
        }

        Ok(self.append(topic, contents))
    }
}

/// In-memory ledger acting as both replica index and transfer target.
///
/// A funding transfer to an unknown alias creates a pending account that the
/// replica reports only after `replication_lag` further lookups miss,
/// imitating mirror propagation delay.
pub struct InMemoryLedger {
    operator: String,
    accounts: DashMap<EvmAddress, AccountId>,
    pending: DashMap<EvmAddress, PendingAccount>,
    next_account: AtomicU64,
    replication_lag: AtomicUsize,
    never_replicate: AtomicBool,
    fail_lookups: AtomicBool,
    fail_transfers: AtomicBool,
    lookup_calls: AtomicUsize,
    transfer_calls: AtomicUsize,
}

struct PendingAccount {
    account_id: AccountId,
    misses_left: usize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            operator: "0.0.2".to_string(),
            accounts: DashMap::new(),
            pending: DashMap::new(),
            next_account: AtomicU64::new(1001),
            replication_lag: AtomicUsize::new(0),
            never_replicate: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            fail_transfers: AtomicBool::new(false),
            lookup_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_replication_lag(self, misses: usize) -> Self {
        self.replication_lag.store(misses, Ordering::SeqCst);
        self
    }

    /// Seed an account that already exists on the ledger.
    pub fn insert_account(&self, alias: EvmAddress, account_id: AccountId) {
        self.accounts.insert(alias, account_id);
    }

    /// Created accounts stay invisible to the replica forever.
    pub fn set_never_replicate(&self, never: bool) {
        self.never_replicate.store(never, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn transfer_count(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    /// Accounts created or seeded, visible or not.
    pub fn account_count(&self) -> usize {
        self.accounts.len() + self.pending.len()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaQuery for InMemoryLedger {
    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("replica lookups disabled".into()));
        }

        if let Some(account) = self.accounts.get(alias) {
            return Ok(Some(account.clone()));
        }

        if self.never_replicate.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let visible = match self.pending.get_mut(alias) {
            Some(pending) if pending.misses_left == 0 => Some(pending.account_id.clone()),
            Some(mut pending) => {
                pending.misses_left -= 1;
                None
            }
            None => None,
        };

        if let Some(account_id) = visible {
            self.pending.remove(alias);
            self.accounts.insert(alias.clone(), account_id.clone());
            return Ok(Some(account_id));
        }

        Ok(None)
    }
}

#[async_trait]
impl LedgerTransfer for InMemoryLedger {
    async fn fund_alias(&self, alias: &EvmAddress, amount: u64) -> Result<TransferReceipt> {
        let seq = self.transfer_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(LedgerError::Rejected("transfers disabled".into()));
        }
        if amount == 0 {
            return Err(LedgerError::Rejected("transfer amount must be positive".into()));
        }

        if !self.accounts.contains_key(alias) {
            let lag = self.replication_lag.load(Ordering::SeqCst);
            self.pending.entry(alias.clone()).or_insert_with(|| {
                let n = self.next_account.fetch_add(1, Ordering::SeqCst);
                PendingAccount {
                    account_id: AccountId::new(format!("0.0.{}", n)),
                    misses_left: lag,
                }
            });
        }

        Ok(TransferReceipt {
            tx_ref: format!("{}@{}.{:09}", self.operator, Utc::now().timestamp(), seq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias() -> EvmAddress {
        EvmAddress::parse("0x2222222222222222222222222222222222222222").unwrap()
    }

    #[tokio::test]
    async fn log_fetch_is_ordered_and_exclusive() {
        let log = InMemoryLog::new();
        let first = log.append("topic", b"a".to_vec());
        let second = log.append("topic", b"b".to_vec());
        log.append("other", b"x".to_vec());
        assert!(second.consensus_timestamp > first.consensus_timestamp);

        let all = log.fetch("topic", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let after = log
            .fetch("topic", Some(first.consensus_timestamp), 10)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].contents, b"b".to_vec());

        let limited = log.fetch("topic", None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(log.fetch_count(), 3);
    }

    #[tokio::test]
    async fn log_failures_are_surfaced() {
        let log = InMemoryLog::new();
        log.set_fail_fetch(true);
        log.set_fail_submit(true);
        assert!(log.fetch("topic", None, 10).await.is_err());
        assert!(log.submit("topic", b"a".to_vec()).await.is_err());
        assert!(log.messages("topic").is_empty());
    }

    #[tokio::test]
    async fn ledger_replicates_after_lag() {
        let ledger = InMemoryLedger::new().with_replication_lag(2);
        assert_eq!(ledger.lookup_account(&alias()).await.unwrap(), None);

        ledger.fund_alias(&alias(), 1).await.unwrap();
        assert_eq!(ledger.lookup_account(&alias()).await.unwrap(), None);
        assert_eq!(ledger.lookup_account(&alias()).await.unwrap(), None);
        let found = ledger.lookup_account(&alias()).await.unwrap();
        assert_eq!(found, Some(AccountId::from("0.0.1001")));

        // A second transfer does not create another account.
        ledger.fund_alias(&alias(), 1).await.unwrap();
        assert_eq!(ledger.account_count(), 1);
        assert_eq!(ledger.transfer_count(), 2);
    }

    #[tokio::test]
    async fn ledger_never_replicate() {
        let ledger = InMemoryLedger::new();
        ledger.set_never_replicate(true);
        ledger.fund_alias(&alias(), 1).await.unwrap();
        for _ in 0..5 {
            assert_eq!(ledger.lookup_account(&alias()).await.unwrap(), None);
        }
        assert_eq!(ledger.account_count(), 1);
    }
}
