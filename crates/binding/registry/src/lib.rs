//! Identity Binding Registry - derived binding state
//!
//! Current bindings are never stored; they are derived by folding the
//! consensus log's identity events, in `issued_at` order, into a
//! [`BindingRegistry`]. [`HistorySync`] keeps that registry caught up with
//! the log:
//!
//! - **Initial replay**: on first use, everything inside the lookback window
//! - **Incremental sync**: from the watermark, in bounded batches
//! - **Periodic resync**: optional background catch-up

#![deny(unsafe_code)]

pub mod error;
pub mod reducer;
pub mod sync;

pub use error::{Result, SyncError};
pub use reducer::{BindingRegistry, RegistryStats};
pub use sync::{HistorySync, SyncConfig, SyncReport};
