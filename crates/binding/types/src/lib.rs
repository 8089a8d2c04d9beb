//! Identity Binding Types - event model for DID-to-account bindings
//!
//! This crate defines the data that flows through the binding pipeline:
//!
//! - **Subject / EvmAddress**: normalized DIDs and the externally-owned-key
//!   alias derived from them, plus the PII-stripping canonical DID sanitizer
//! - **IdentityEvent**: the immutable, versioned envelope written to the
//!   consensus log (`BIND`, `ASSERT`, `ROTATE`, `UNBIND`) and its wire codec
//! - **BindingRecord**: the per-subject state derived by replaying events
//!
//! Validation here is structural only. Trust decisions (ordering, signature
//! gating) belong to the reducer in `binding-registry`.

#![deny(unsafe_code)]

pub mod did;
pub mod error;
pub mod event;
pub mod record;

pub use did::{canonical_did, ensure_no_pii, EvmAddress, Subject, DEFAULT_DID_SALT};
pub use error::{DidError, EventError};
pub use event::{
    AssertPayload, BindArgs, BindPayload, Chain, EventKind, EventPayload, IdentityEvent,
    RotateArgs, RotatePayload, UnbindArgs, UnbindPayload, EVENT_VERSION,
};
pub use record::{AccountId, BindingRecord};
