//! Capacity-bounded, TTL-bounded table of authenticated sessions (§4.7)

use crate::certificate_registry::CertificateRegistry;
use crate::cloud_verifier::CloudVerifier;
use crate::error::{CdaError, Result};
use crate::thing_registry::ThingRegistry;
use crate::traits::{Clock, SystemClock};
use crate::types::{CertificateRecord, CertificateStatus, Thing};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// The credentials presented when creating a session. Only `mqtt` is
/// currently supported as a credential type (§4.7).
#[derive(Debug, Clone, Default)]
pub struct CredentialMap {
    /// MQTT client id, used as the candidate Thing name if `username` is absent.
    pub client_id: Option<String>,
    /// PEM-encoded client certificate. Required, non-empty.
    pub certificate_pem: String,
    /// MQTT username, preferred over `client_id` as the candidate Thing name.
    pub username: Option<String>,
    /// MQTT password. Currently unused by the core (no password-based auth).
    pub password: Option<String>,
}

/// A namespaced bag of attributes exposed to policy variable substitution
/// (e.g. `attribute_providers["Certificate"]["CertificateId"]`).
pub type AttributeProvider = BTreeMap<String, String>;

/// An authenticated session: the certificate and (if attached) Thing behind
/// an opaque token, plus the attribute namespaces policy evaluation reads.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque, unguessable, URL-safe base64 128-bit token.
    pub id: String,
    /// The verified client certificate.
    pub certificate: CertificateRecord,
    /// The attached Thing, if the certificate/Thing association was verified.
    pub thing: Option<Thing>,
    /// Namespace -> attribute map; always carries `"Certificate"`, and
    /// `"Thing"` when `thing` is present.
    pub attribute_providers: BTreeMap<String, AttributeProvider>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last resolved.
    pub last_used: DateTime<Utc>,
}

impl Session {
    /// The Thing name attribute, if this session has an attached Thing.
    pub fn thing_name(&self) -> Option<&str> {
        self.thing.as_ref().map(|t| t.name.as_str())
    }
}

struct SessionTable {
    capacity: usize,
    entries: HashMap<String, Session>,
    /// Front = least-recently-used, back = most-recently-used.
    order: VecDeque<String>,
}

impl SessionTable {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id.to_string());
    }

    fn insert(&mut self, session: Session) {
        let id = session.id.clone();
        if !self.entries.contains_key(&id) && self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(evicted, "session table at capacity, evicted LRU session");
            }
        }
        self.entries.insert(id.clone(), session);
        self.touch(&id);
    }

    fn remove(&mut self, id: &str) {
        self.entries.remove(id);
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.remove(pos);
        }
    }
}

/// Owns the session table; cloud verification happens outside the table's
/// lock, re-validated at commit time (§5).
pub struct SessionManager {
    table: Mutex<SessionTable>,
    certificate_registry: Arc<CertificateRegistry>,
    thing_registry: Arc<ThingRegistry>,
    cloud_verifier: Arc<dyn CloudVerifier>,
    clock: Arc<dyn Clock>,
    trust_duration_hours: i64,
}

impl SessionManager {
    /// Build a session manager with `capacity` (clamped to at least 1) and
    /// the given trust/TTL window (`clientDeviceTrustDurationHours`).
    pub fn new(
        capacity: usize,
        trust_duration_hours: i64,
        certificate_registry: Arc<CertificateRegistry>,
        thing_registry: Arc<ThingRegistry>,
        cloud_verifier: Arc<dyn CloudVerifier>,
    ) -> Self {
        Self {
            table: Mutex::new(SessionTable::new(capacity)),
            certificate_registry,
            thing_registry,
            cloud_verifier,
            clock: Arc::new(SystemClock),
            trust_duration_hours,
        }
    }

    /// Current number of live sessions.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().entries.len()
    }

    /// Whether the table currently holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `create`: authenticate `credentials` and mint a new session token.
    pub async fn create(&self, credential_type: &str, credentials: &CredentialMap) -> Result<String> {
        if credential_type != "mqtt" {
            return Err(CdaError::InvalidCredential(format!(
                "unsupported credential type: {credential_type}"
            )));
        }
        if credentials.certificate_pem.trim().is_empty() {
            return Err(CdaError::InvalidCredential("certificatePem missing or empty".into()));
        }

        let now = self.clock.now();
        let mut record = self
            .certificate_registry
            .get_or_create(&credentials.certificate_pem)
            .await?;

        if record.status(now, self.trust_duration_hours) != CertificateStatus::Active {
            let verified = self
                .cloud_verifier
                .verify_client_device_identity(&credentials.certificate_pem)
                .await?;
            if verified == CertificateStatus::Active {
                record.status = CertificateStatus::Active;
                record.last_updated = now;
                self.certificate_registry.update(&record).await?;
            }
        }

        if record.status(now, self.trust_duration_hours) != CertificateStatus::Active {
            return Err(CdaError::AuthenticationFailed(
                "certificate is not ACTIVE".into(),
            ));
        }

        let thing = self.attach_thing_if_associated(credentials, &record, now).await?;

        let id = generate_session_token();
        let mut attribute_providers = BTreeMap::new();
        attribute_providers.insert(
            "Certificate".to_string(),
            BTreeMap::from([("CertificateId".to_string(), record.id.0.clone())]),
        );
        if let Some(thing) = &thing {
            let mut attrs = BTreeMap::new();
            attrs.insert("ThingName".to_string(), thing.name.clone());
            attribute_providers.insert("Thing".to_string(), attrs);
        }

        let session = Session {
            id: id.clone(),
            certificate: record,
            thing,
            attribute_providers,
            created_at: now,
            last_used: now,
        };

        self.table.lock().unwrap().insert(session);
        Ok(id)
    }

    async fn attach_thing_if_associated(
        &self,
        credentials: &CredentialMap,
        record: &CertificateRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<Thing>> {
        let Some(thing_name) = credentials.username.clone().or_else(|| credentials.client_id.clone()) else {
            return Ok(None);
        };

        let associated = self
            .cloud_verifier
            .verify_thing_certificate_association(&thing_name, &record.id)
            .await?;
        if !associated {
            return Ok(None);
        }

        let mut thing = self.thing_registry.get_or_create(&thing_name).await?;
        thing.attach_certificate(&record.id.0, now);
        self.thing_registry.update(&thing).await?;
        Ok(Some(thing))
    }

    /// `resolve`: returns the session, bumping `lastUsed`, or `None` if
    /// missing or expired (`now - lastUsed > trustDurationHours`).
    pub fn resolve(&self, session_id: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut table = self.table.lock().unwrap();
        let expired = table
            .entries
            .get(session_id)
            .map(|s| now.signed_duration_since(s.last_used) > chrono::Duration::hours(self.trust_duration_hours))
            .unwrap_or(false);

        if expired {
            table.remove(session_id);
            return None;
        }

        if let Some(session) = table.entries.get_mut(session_id) {
            session.last_used = now;
            let cloned = session.clone();
            table.touch(session_id);
            Some(cloned)
        } else {
            None
        }
    }

    /// `close`: removes the session; idempotent.
    pub fn close(&self, session_id: &str) {
        self.table.lock().unwrap().remove(session_id);
    }

    /// `refresh`: idempotent sweep re-verifying every session's certificate
    /// and Thing association; evicts on a definitive negative answer, leaves
    /// sessions in place on cloud failure.
    pub async fn refresh(&self) {
        let snapshot: Vec<Session> = {
            let table = self.table.lock().unwrap();
            table.entries.values().cloned().collect()
        };

        for session in snapshot {
            match self
                .cloud_verifier
                .verify_client_device_identity(&session.certificate.pem)
                .await
            {
                Ok(CertificateStatus::Active) => {}
                Ok(CertificateStatus::Unknown) => {
                    self.close(&session.id);
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, session = %session.id, "refresh: cloud verification failed, keeping session");
                    continue;
                }
            }

            if let Some(thing) = &session.thing {
                match self
                    .cloud_verifier
                    .verify_thing_certificate_association(&thing.name, &session.certificate.id)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => self.close(&session.id),
                    Err(e) => {
                        warn!(error = %e, session = %session.id, "refresh: thing association check failed, keeping session");
                    }
                }
            }
        }
    }
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_verifier::FakeCloudVerifier;
    use crate::runtime_store::MemoryRuntimeStore;

    const SAMPLE_PEM: &str = include_str!("../tests/fixtures/sample_cert.pem");

    fn manager(capacity: usize) -> (Arc<FakeCloudVerifier>, SessionManager) {
        let store: Arc<dyn crate::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
        let certs = Arc::new(CertificateRegistry::new(store.clone()));
        let things = Arc::new(ThingRegistry::new(store));
        let cloud = Arc::new(FakeCloudVerifier::new());
        let manager = SessionManager::new(capacity, 24, certs, things, cloud.clone());
        (cloud, manager)
    }

    #[tokio::test]
    async fn rejects_empty_certificate() {
        let (_cloud, manager) = manager(10);
        let err = manager
            .create("mqtt", &CredentialMap::default())
            .await
            .unwrap_err();
        assert_eq!(err.external_code(), "InvalidCredential");
    }

    #[tokio::test]
    async fn unverifiable_certificate_fails_authentication() {
        let (_cloud, manager) = manager(10);
        let creds = CredentialMap {
            certificate_pem: SAMPLE_PEM.to_string(),
            ..Default::default()
        };
        let err = manager.create("mqtt", &creds).await.unwrap_err();
        assert_eq!(err.external_code(), "UnauthorizedError");
    }

    #[tokio::test]
    async fn verified_certificate_creates_a_resolvable_session() {
        let (cloud, manager) = manager(10);
        cloud.mark_active(SAMPLE_PEM);
        let creds = CredentialMap {
            certificate_pem: SAMPLE_PEM.to_string(),
            client_id: Some("camera-01".to_string()),
            ..Default::default()
        };
        let id = manager.create("mqtt", &creds).await.unwrap();
        let session = manager.resolve(&id).unwrap();
        assert_eq!(
            session.attribute_providers["Certificate"]["CertificateId"],
            session.certificate.id.0
        );
    }

    #[tokio::test]
    async fn capacity_bound_evicts_lru() {
        let (cloud, manager) = manager(1);
        cloud.mark_active(SAMPLE_PEM);
        let creds = CredentialMap {
            certificate_pem: SAMPLE_PEM.to_string(),
            ..Default::default()
        };
        let first = manager.create("mqtt", &creds).await.unwrap();
        let second = manager.create("mqtt", &creds).await.unwrap();
        assert!(manager.resolve(&first).is_none());
        assert!(manager.resolve(&second).is_some());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (cloud, manager) = manager(10);
        cloud.mark_active(SAMPLE_PEM);
        let creds = CredentialMap {
            certificate_pem: SAMPLE_PEM.to_string(),
            ..Default::default()
        };
        let id = manager.create("mqtt", &creds).await.unwrap();
        manager.close(&id);
        manager.close(&id);
        assert!(manager.resolve(&id).is_none());
    }
}
