use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// Ledger account identifier (e.g. `0.0.12345`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binding state derived for one subject by folding its events.
///
/// Records are never removed; an `UNBIND` only clears `active`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub account_id: AccountId,
    pub active: bool,
    pub last_event_kind: EventKind,
    pub last_issued_at: DateTime<Utc>,
    pub evm_address: Option<String>,
}

impl BindingRecord {
    /// Account id when the binding is active.
    pub fn active_account(&self) -> Option<&AccountId> {
        self.active.then_some(&self.account_id)
    }
}
