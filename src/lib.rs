//! # cda-core - Client Device Authentication core for edge IoT gateways
//!
//! This crate implements the local certificate authority lifecycle,
//! certificate issuance and rotation, session management, and
//! policy-based authorization that an edge gateway uses to authenticate
//! and authorize client devices without a constant cloud round-trip.
//!
//! ## Architecture
//!
//! - `ca_store`: owns the local CA key/certificate material and its
//!   passphrase-protected keystore.
//! - `crypto`: X.509 generation (CA + leaf) and RFC 5280 validation.
//! - `certificate_issuer` / `expiry_monitor`: leaf certificate issuance and
//!   scheduled rotation.
//! - `certificate_registry` / `thing_registry`: persisted, content-addressed
//!   certificate and Thing records.
//! - `cloud_verifier`: the cloud control-plane boundary, plus an in-memory
//!   fake for tests.
//! - `policy`: selection-rule parsing and policy compilation.
//! - `session_manager` / `authorization_engine`: session lifecycle and
//!   permission evaluation.
//! - `background_reconciler`: periodic cleanup of orphaned local state.
//! - `event_bus`: in-process domain event fan-out.
//! - `runtime_store`: the tree-shaped persistence façade backing all of the
//!   above.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod types;
pub mod traits;
pub mod config;

pub mod crypto;
pub mod runtime_store;
pub mod ca_store;
pub mod certificate_registry;
pub mod thing_registry;
pub mod cloud_verifier;
pub mod certificate_issuer;
pub mod expiry_monitor;
pub mod policy;
pub mod session_manager;
pub mod authorization_engine;
pub mod background_reconciler;
pub mod event_bus;

pub use error::{CdaError, Result};

/// The crate's version, as set by Cargo at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience re-exports for common downstream usage.
pub mod prelude {
    pub use crate::authorization_engine::{AuthorizationDecision, AuthorizationEngine};
    pub use crate::background_reconciler::BackgroundReconciler;
    pub use crate::ca_store::CaStore;
    pub use crate::certificate_issuer::CertificateIssuer;
    pub use crate::certificate_registry::CertificateRegistry;
    pub use crate::cloud_verifier::{CloudVerifier, FakeCloudVerifier};
    pub use crate::config::Config;
    pub use crate::error::{CdaError, Result};
    pub use crate::event_bus::{DomainEvent, DomainEventBus};
    pub use crate::expiry_monitor::ExpiryMonitor;
    pub use crate::policy::{GroupConfiguration, PolicyCompiler};
    pub use crate::runtime_store::RuntimeStore;
    pub use crate::session_manager::SessionManager;
    pub use crate::thing_registry::ThingRegistry;
    pub use crate::types::*;
}
