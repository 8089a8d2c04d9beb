//! Service error types

use binding_ledger::LedgerError;
use binding_registry::SyncError;
use binding_types::{DidError, EventError};
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Account provisioning errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("replica lookup failed: {0}")]
    Replica(LedgerError),

    #[error("funding transfer failed: {0}")]
    Transfer(LedgerError),

    /// The transfer was submitted but the account never became visible.
    #[error("account for {alias} not visible after {attempts} polls (tx {tx_ref})")]
    ConfirmationTimeout {
        alias: String,
        tx_ref: String,
        attempts: u32,
    },
}

/// Errors returned by the resolution pipeline
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("identity binding is disabled")]
    Disabled,

    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] DidError),

    #[error("identity {0} does not name an externally-owned key")]
    NoAlias(String),

    #[error("replica lookup failed: {0}")]
    Replica(LedgerError),

    #[error("event publish failed: {0}")]
    Publish(LedgerError),

    #[error("event publisher stopped")]
    PublisherClosed,

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
