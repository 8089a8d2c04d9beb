use async_trait::async_trait;
use binding_types::{AccountId, EvmAddress};

use crate::error::Result;
use crate::types::{ConsensusTimestamp, LogMessage, SubmitReceipt, TransferReceipt};

/// Read boundary of the consensus log.
#[async_trait]
pub trait LogReader: Send + Sync {
    /// Messages on `topic` with a consensus timestamp strictly after `since`
    /// (from the beginning when `None`), ascending, at most `limit`.
    async fn fetch(
        &self,
        topic: &str,
        since: Option<ConsensusTimestamp>,
        limit: usize,
    ) -> Result<Vec<LogMessage>>;
}

/// Write boundary of the consensus log.
#[async_trait]
pub trait LogWriter: Send + Sync {
    async fn submit(&self, topic: &str, contents: Vec<u8>) -> Result<SubmitReceipt>;
}

/// Eventually-consistent account index keyed by externally-owned-key alias.
#[async_trait]
pub trait ReplicaQuery: Send + Sync {
    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>>;
}

/// Ledger write path used for account auto-creation.
#[async_trait]
pub trait LedgerTransfer: Send + Sync {
    /// Send `amount` (smallest unit) to the alias-derived address. Landing the
    /// transfer creates the account when it does not exist yet.
    async fn fund_alias(&self, alias: &EvmAddress, amount: u64) -> Result<TransferReceipt>;
}
