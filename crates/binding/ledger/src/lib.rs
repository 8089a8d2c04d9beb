//! Identity Binding Ledger - collaborator boundaries
//!
//! The binding pipeline talks to three external systems, each behind an
//! async trait so components can be wired against real services or the
//! in-memory implementations used in tests and local runs:
//!
//! - **LogReader / LogWriter**: fetch and submit on the consensus log
//! - **ReplicaQuery**: eventually-consistent account lookup by key alias
//! - **LedgerTransfer**: the minimal-value transfer that auto-creates accounts
//!
//! [`MirrorClient`] implements the read side (log fetch and replica lookup)
//! against a mirror-node REST API.

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod mirror;
pub mod traits;
pub mod types;

pub use error::{LedgerError, Result};
pub use memory::{InMemoryLedger, InMemoryLog};
pub use mirror::MirrorClient;
pub use traits::{LedgerTransfer, LogReader, LogWriter, ReplicaQuery};
pub use types::{ConsensusTimestamp, LogMessage, SubmitReceipt, TransferReceipt};
