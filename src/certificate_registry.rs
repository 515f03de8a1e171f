//! Content-addressed certificate cache, backed by the runtime store (§4.3)

use crate::crypto::x509::calculate_fingerprint;
use crate::error::{CdaError, Result};
use crate::traits::{Clock, RuntimeStore, SystemClock};
use crate::types::{CertificateRecord, CertificateStatus, Fingerprint};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

fn status_key(id: &str) -> String {
    format!("certificatesV1/{id}/status")
}

fn blob_key(id: &str) -> String {
    format!("clientCertificates/{id}/pem")
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredStatus {
    status: CertificateStatus,
    last_updated: DateTime<Utc>,
}

/// The certificate registry: fingerprint -> status, backed by a PEM blob store.
pub struct CertificateRegistry {
    store: Arc<dyn RuntimeStore>,
    clock: Arc<dyn Clock>,
}

impl CertificateRegistry {
    /// Build a registry over `store`, using the system clock.
    pub fn new(store: Arc<dyn RuntimeStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build a registry with an injected clock (for trust-window tests).
    pub fn with_clock(store: Arc<dyn RuntimeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Compute the canonical fingerprint of a PEM-encoded certificate,
    /// rejecting unparsable PEM with `InvalidCertificate` (never UNKNOWN).
    pub fn fingerprint_of(pem_str: &str) -> Result<Fingerprint> {
        let parsed = pem::parse(pem_str)
            .map_err(|e| CdaError::InvalidCertificate(format!("malformed certificate PEM: {e}")))?;
        Ok(Fingerprint(calculate_fingerprint(parsed.contents())))
    }

    /// `getOrCreate(pem)`: returns the existing record or creates a new
    /// UNKNOWN one and persists the PEM blob.
    pub async fn get_or_create(&self, pem_str: &str) -> Result<CertificateRecord> {
        let id = Self::fingerprint_of(pem_str)?;

        if let Some(record) = self.read_record(&id).await? {
            return Ok(record);
        }

        let now = self.clock.now();
        let record = CertificateRecord {
            id: id.clone(),
            status: CertificateStatus::Unknown,
            last_updated: now,
            pem: pem_str.to_string(),
        };

        self.store.put(&blob_key(id.as_ref()), pem_str.as_bytes()).await?;
        self.write_status(&id, record.status, now).await?;

        Ok(record)
    }

    /// `get(pem)`: returns the record without creating one.
    pub async fn get(&self, pem_str: &str) -> Result<Option<CertificateRecord>> {
        let id = Self::fingerprint_of(pem_str)?;
        self.read_record(&id).await
    }

    /// `get_by_id`: look up a record directly by fingerprint, without a PEM
    /// in hand. Returns `None` if the blob or status record is absent,
    /// matching the crash-window invariant in §4.3.
    pub async fn get_by_id(&self, id: &Fingerprint) -> Result<Option<CertificateRecord>> {
        self.read_record(id).await
    }

    /// `update(record)`: writes back status + lastUpdated.
    pub async fn update(&self, record: &CertificateRecord) -> Result<()> {
        self.write_status(&record.id, record.status, record.last_updated)
            .await
    }

    /// `delete(id)`: removes the record and its PEM blob.
    pub async fn delete(&self, id: &Fingerprint) -> Result<()> {
        self.store.delete(&status_key(id.as_ref())).await?;
        self.store.delete(&blob_key(id.as_ref())).await?;
        Ok(())
    }

    /// `all()`: every persisted record, skipping any whose blob is missing
    /// (crash-window orphan, per §4.3's crash-consistency note).
    pub async fn all(&self) -> Result<Vec<CertificateRecord>> {
        let mut records = Vec::new();
        for key in self.store.list("certificatesV1").await? {
            let Some(id) = key
                .strip_prefix("certificatesV1/")
                .and_then(|rest| rest.strip_suffix("/status"))
            else {
                continue;
            };
            if let Some(record) = self.read_record(&Fingerprint(id.to_string())).await? {
                records.push(record);
            } else {
                warn!(id, "certificate status present without a matching PEM blob");
            }
        }
        Ok(records)
    }

    /// The trust-window-aware status for `id` at `now`.
    pub async fn status_of(
        &self,
        id: &Fingerprint,
        trust_duration_hours: i64,
    ) -> Result<CertificateStatus> {
        Ok(self
            .read_record(id)
            .await?
            .map(|r| r.status(self.clock.now(), trust_duration_hours))
            .unwrap_or(CertificateStatus::Unknown))
    }

    async fn read_record(&self, id: &Fingerprint) -> Result<Option<CertificateRecord>> {
        let Some(status_bytes) = self.store.get(&status_key(id.as_ref())).await? else {
            return Ok(None);
        };
        let Some(pem_bytes) = self.store.get(&blob_key(id.as_ref())).await? else {
            return Ok(None);
        };
        let stored: StoredStatus = serde_json::from_slice(&status_bytes)?;
        let pem_str = String::from_utf8(pem_bytes)
            .map_err(|_| CdaError::ServiceError("stored certificate PEM is not UTF-8".into()))?;
        Ok(Some(CertificateRecord {
            id: id.clone(),
            status: stored.status,
            last_updated: stored.last_updated,
            pem: pem_str,
        }))
    }

    async fn write_status(
        &self,
        id: &Fingerprint,
        status: CertificateStatus,
        last_updated: DateTime<Utc>,
    ) -> Result<()> {
        let stored = StoredStatus { status, last_updated };
        let bytes = serde_json::to_vec(&stored)?;
        self.store.put(&status_key(id.as_ref()), &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_store::MemoryRuntimeStore;

    const SAMPLE_PEM: &str = include_str!("../tests/fixtures/sample_cert.pem");

    fn registry() -> CertificateRegistry {
        CertificateRegistry::new(Arc::new(MemoryRuntimeStore::new()))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = registry();
        let first = registry.get_or_create(SAMPLE_PEM).await.unwrap();
        let second = registry.get_or_create(SAMPLE_PEM).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_without_create_returns_none() {
        let registry = registry();
        assert!(registry.get(SAMPLE_PEM).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_record_and_blob() {
        let registry = registry();
        let record = registry.get_or_create(SAMPLE_PEM).await.unwrap();
        registry.delete(&record.id).await.unwrap();
        assert!(registry.get(SAMPLE_PEM).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_pem_is_invalid_certificate_not_unknown() {
        let registry = registry();
        let err = registry.get_or_create("not a certificate").await.unwrap_err();
        assert_eq!(err.external_code(), "InvalidCertificate");
    }
}
