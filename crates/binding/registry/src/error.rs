//! Registry error types

use binding_ledger::LedgerError;
use thiserror::Error;

/// Errors raised while replaying the consensus log.
///
/// Cloneable so one failed run can be reported to every caller waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("consensus log fetch failed: {0}")]
    Log(#[from] LedgerError),

    #[error("history sync is not configured: {0}")]
    NotConfigured(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, SyncError>;
