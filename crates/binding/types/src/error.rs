use thiserror::Error;

use crate::event::EventKind;

/// Errors raised while building, encoding or decoding identity events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    /// The message is not an identity event at all (missing or foreign kind).
    #[error("not an identity event (kind: {0})")]
    UnknownKind(String),

    #[error("unsupported event version {0}")]
    UnsupportedVersion(u64),

    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("invalid issuedAt timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EventKind, reason: String },

    #[error("{0} events require a signature")]
    MissingSignature(EventKind),
}

/// Errors raised while canonicalizing issuer strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DidError {
    #[error("issuer is required")]
    Empty,

    #[error("DID would expose personal data ({0})")]
    ContainsPii(&'static str),
}
