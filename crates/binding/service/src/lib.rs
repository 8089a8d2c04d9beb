//! Identity Binding Service - resolution and provisioning
//!
//! Maps an issuer identity to exactly one ledger account:
//!
//! - **Resolver**: cache, then the event-sourced registry, then the replica
//! - **Provisioner**: auto-creates an account and announces it with `BIND`
//! - **Orchestrator**: one entry point with per-identity locking, so
//!   concurrent first requests provision once
//! - **EventPublisher**: background submission of identity events
//!
//! [`BindingService`] wires all of it from a [`BindingConfig`].

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod provisioner;
pub mod publisher;
pub mod resolver;
pub mod service;

pub use cache::{CacheStats, TtlCache};
pub use config::BindingConfig;
pub use error::{ConfigError, ProvisionError, Result, ServiceError};
pub use lock::{IdentityGuard, IdentityLocks};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ResolutionResult, Source};
pub use provisioner::{ProvisionConfig, ProvisionOutcome, Provisioner};
pub use publisher::{EventPublisher, PublisherStats};
pub use resolver::{Resolution, Resolver, ResolverConfig, Tier, MIRROR_RESOLUTION_REASON};
pub use service::{BindingService, Collaborators, HealthSnapshot};
