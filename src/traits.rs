//! Trait seams: the boundaries the rest of the crate programs against (§4)

use crate::error::Result;
use crate::types::{CertificateStatus, Fingerprint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of the current instant, so tests can control time without sleeping.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A client device association as reported by the cloud control plane (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedClientDevice {
    /// The Thing name the certificate is associated with.
    pub thing_name: String,
    /// The certificate's fingerprint.
    pub certificate_id: Fingerprint,
}

/// Abstraction over the cloud control plane's device-auth verification API
/// (§4.5). Implementations must be resilient to transient network failures;
/// permanent failures surface as `CdaError::CloudServiceInteraction`.
#[async_trait]
pub trait CloudVerifier: Send + Sync {
    /// Ask the cloud whether `certificate_pem` is ACTIVE, and if so, which
    /// Thing it is currently associated with.
    async fn verify_client_device_identity(
        &self,
        certificate_pem: &str,
    ) -> Result<CertificateStatus>;

    /// List every Thing currently associated with `certificate_id` in the
    /// cloud, used by the background reconciler to detect orphaned
    /// attachments (§4.9).
    async fn list_thing_principals(
        &self,
        certificate_id: &Fingerprint,
    ) -> Result<Vec<AssociatedClientDevice>>;

    /// Ask the cloud whether `thing_name` is associated with
    /// `certificate_id`; `false` on an explicit not-found answer.
    async fn verify_thing_certificate_association(
        &self,
        thing_name: &str,
        certificate_id: &Fingerprint,
    ) -> Result<bool>;
}

/// Tree-shaped key-value persistence façade backing the runtime store (§4,
/// §6). Keys are `/`-separated paths; values are opaque bytes (typically
/// JSON). Writes must be atomic (write-temp, fsync, rename).
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    /// Fetch the bytes at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically persist `value` at `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove the value at `key`, if present.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every stored key under `prefix`, recursively, as full keys.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
