//! The cloud control-plane boundary, plus an in-memory fake (§4.5)

pub use crate::traits::{AssociatedClientDevice, CloudVerifier};

use crate::error::Result;
use crate::types::{CertificateStatus, Fingerprint};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// An in-memory stand-in for the cloud verify/list API, used by this
/// crate's own tests and usable by downstream integrators as a local/offline
/// fixture.
#[derive(Default)]
pub struct FakeCloudVerifier {
    inner: RwLock<FakeCloudVerifierState>,
    list_thing_principals_calls: AtomicUsize,
}

#[derive(Default)]
struct FakeCloudVerifierState {
    active_certificate_pems: BTreeSet<String>,
    thing_principals: BTreeMap<String, Vec<AssociatedClientDevice>>,
}

impl FakeCloudVerifier {
    /// An empty fake: every certificate is UNKNOWN, every Thing has no
    /// principals, until configured otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `certificate_pem` as ACTIVE for subsequent
    /// `verify_client_device_identity` calls.
    pub fn mark_active(&self, certificate_pem: &str) {
        self.inner
            .write()
            .unwrap()
            .active_certificate_pems
            .insert(certificate_pem.to_string());
    }

    /// Register an association between a Thing and a certificate, returned
    /// by `list_thing_principals` for that certificate's id.
    pub fn associate(&self, thing_name: &str, certificate_id: &Fingerprint) {
        self.inner
            .write()
            .unwrap()
            .thing_principals
            .entry(certificate_id.0.clone())
            .or_default()
            .push(AssociatedClientDevice {
                thing_name: thing_name.to_string(),
                certificate_id: certificate_id.clone(),
            });
    }

    /// Remove every association for `thing_name`, simulating the cloud
    /// dropping that Thing (used by reconciler orphan-cleanup tests).
    pub fn remove_thing(&self, thing_name: &str) {
        let mut state = self.inner.write().unwrap();
        for principals in state.thing_principals.values_mut() {
            principals.retain(|p| p.thing_name != thing_name);
        }
    }

    /// Number of `list_thing_principals` calls observed so far, for tests
    /// asserting that a reconciler run made (or did not make) cloud calls.
    pub fn list_thing_principals_call_count(&self) -> usize {
        self.list_thing_principals_calls.load(Ordering::SeqCst)
    }

    /// All Things currently known to the fake, across every certificate.
    pub fn known_thing_names(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .unwrap()
            .thing_principals
            .values()
            .flatten()
            .map(|p| p.thing_name.clone())
            .collect()
    }
}

#[async_trait]
impl CloudVerifier for FakeCloudVerifier {
    async fn verify_client_device_identity(&self, certificate_pem: &str) -> Result<CertificateStatus> {
        let active = self
            .inner
            .read()
            .unwrap()
            .active_certificate_pems
            .contains(certificate_pem);
        Ok(if active {
            CertificateStatus::Active
        } else {
            CertificateStatus::Unknown
        })
    }

    async fn list_thing_principals(
        &self,
        certificate_id: &Fingerprint,
    ) -> Result<Vec<AssociatedClientDevice>> {
        self.list_thing_principals_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .read()
            .unwrap()
            .thing_principals
            .get(&certificate_id.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn verify_thing_certificate_association(
        &self,
        thing_name: &str,
        certificate_id: &Fingerprint,
    ) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .thing_principals
            .get(&certificate_id.0)
            .map(|principals| principals.iter().any(|p| p.thing_name == thing_name))
            .unwrap_or(false))
    }
}
