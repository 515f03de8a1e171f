//! Leaf certificate issuance bound to subscribers, with rotation fan-out (§4.2)

use crate::ca_store::CaStore;
use crate::crypto::x509::{self, LeafParams, X509Certificate};
use crate::error::Result;
use crate::traits::{Clock, SystemClock};
use crate::types::LeafCertificateType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Minimum/maximum/default leaf certificate validity (§3).
pub const MIN_VALIDITY: Duration = Duration::from_secs(60);
/// Maximum leaf certificate validity.
pub const MAX_VALIDITY: Duration = Duration::from_secs(864_000);
/// Default leaf certificate validity (7 days).
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(604_800);

/// Clamp a configured validity to `[MIN_VALIDITY, MAX_VALIDITY]`, logging a
/// warning when the input is out of range.
pub fn clamp_validity(requested: Duration) -> Duration {
    if requested < MIN_VALIDITY {
        tracing::warn!(?requested, "certificate validity below minimum, clamping to 60s");
        MIN_VALIDITY
    } else if requested > MAX_VALIDITY {
        tracing::warn!(?requested, "certificate validity above maximum, clamping to 10d");
        MAX_VALIDITY
    } else {
        requested
    }
}

/// Delivers a freshly (re)issued leaf certificate and the current CA chain
/// to a subscriber.
pub trait CertificateSubscriber: Send + Sync {
    /// Called on initial issuance and every subsequent rotation.
    fn on_certificate(&self, certificate: &X509Certificate, ca_chain: &[String]);
}

/// Opaque handle identifying a registered generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeneratorId(u64);

struct Generator {
    id: GeneratorId,
    leaf_type: LeafCertificateType,
    common_name: String,
    sans: Vec<String>,
    validity: Duration,
    disable_rotation: bool,
    issued_once: bool,
    current: Option<X509Certificate>,
    subscriber: Arc<dyn CertificateSubscriber>,
}

/// Request to register a new certificate generator.
pub struct GeneratorRequest {
    /// Server or client certificate.
    pub leaf_type: LeafCertificateType,
    /// Subject common name.
    pub common_name: String,
    /// Additional Subject Alternative Names; `localhost` is added
    /// automatically for server certificates when no connectivity
    /// addresses are supplied (§4.2).
    pub sans: Vec<String>,
    /// Requested validity; clamped to `[60s, 10d]`.
    pub validity: Duration,
    /// If true, a single certificate is issued and rotation requests are
    /// ignored thereafter.
    pub disable_rotation: bool,
    /// Receives the issued certificate and CA chain.
    pub subscriber: Arc<dyn CertificateSubscriber>,
}

/// Owns the set of registered generators and issues/rotates their leaf
/// certificates from the active CA.
pub struct CertificateIssuer {
    ca_store: Arc<CaStore>,
    generators: Mutex<Vec<Generator>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CertificateIssuer {
    /// Build an issuer bound to `ca_store`.
    pub fn new(ca_store: Arc<CaStore>) -> Self {
        Self {
            ca_store,
            generators: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            clock: Arc::new(SystemClock),
        }
    }

    /// Register a new generator and issue its first certificate immediately.
    pub async fn register(&self, request: GeneratorRequest) -> Result<GeneratorId> {
        let id = GeneratorId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let validity = clamp_validity(request.validity);

        let mut sans = request.sans.clone();
        if matches!(request.leaf_type, LeafCertificateType::ServerAuth) && sans.is_empty() {
            sans.push("localhost".to_string());
        }

        let mut generator = Generator {
            id,
            leaf_type: request.leaf_type,
            common_name: request.common_name,
            sans,
            validity,
            disable_rotation: request.disable_rotation,
            issued_once: false,
            current: None,
            subscriber: request.subscriber,
        };

        self.issue(&mut generator).await?;
        self.generators.lock().unwrap().push(generator);
        Ok(id)
    }

    /// Re-invoke the generator identified by `id`, unless it has
    /// `disable_rotation` set and has already issued once.
    pub async fn rotate(&self, id: GeneratorId) -> Result<()> {
        let should_skip = {
            let generators = self.generators.lock().unwrap();
            generators
                .iter()
                .find(|g| g.id == id)
                .map(|g| g.disable_rotation && g.issued_once)
                .unwrap_or(true)
        };
        if should_skip {
            return Ok(());
        }

        let ca = self.ca_store.current().await;
        let mut generators = self.generators.lock().unwrap();
        match generators.iter_mut().find(|g| g.id == id) {
            Some(generator) => issue_with_ca(generator, &ca, self.clock.as_ref()),
            None => Ok(()),
        }
    }

    /// Re-invoke every generator regardless of remaining validity, per the
    /// CAChanged rule in §4.2. Generators with `disable_rotation` and a
    /// prior issuance are skipped, matching the single-shot contract.
    pub async fn rotate_all(&self) -> Vec<(GeneratorId, Result<()>)> {
        let ca = self.ca_store.current().await;
        let mut generators = self.generators.lock().unwrap();
        let mut results = Vec::new();
        for generator in generators.iter_mut() {
            if generator.disable_rotation && generator.issued_once {
                continue;
            }
            let outcome = issue_with_ca(generator, &ca, self.clock.as_ref());
            if let Err(e) = &outcome {
                error!(error = %e, generator = generator.id.0, "certificate rotation failed");
            }
            results.push((generator.id, outcome));
        }
        results
    }

    /// The currently held certificate for a generator, if it has issued at
    /// least once. Used by [`crate::expiry_monitor::ExpiryMonitor`].
    pub fn current_certificate(&self, id: GeneratorId) -> Option<X509Certificate> {
        self.generators
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == id)
            .and_then(|g| g.current.clone())
    }

    /// Every registered generator id and its configured validity, for the
    /// expiry monitor's scan.
    pub fn generator_ids(&self) -> Vec<GeneratorId> {
        self.generators.lock().unwrap().iter().map(|g| g.id).collect()
    }

    async fn issue(&self, generator: &mut Generator) -> Result<()> {
        let ca = self.ca_store.current().await;
        issue_with_ca(generator, &ca, self.clock.as_ref())
    }
}

fn issue_with_ca(
    generator: &mut Generator,
    ca: &crate::ca_store::CaMaterial,
    clock: &dyn Clock,
) -> Result<()> {
    let cert = x509::generate_leaf(
        ca.ca_type,
        LeafParams {
            common_name: generator.common_name.clone(),
            sans: generator.sans.clone(),
            leaf_type: generator.leaf_type,
            validity: generator.validity,
        },
        &ca.certificate_pem,
        ca.private_key_pem.expose_secret(),
    )?;

    info!(
        generator = generator.id.0,
        common_name = %generator.common_name,
        issued_at = %clock.now(),
        "issued leaf certificate"
    );

    generator.subscriber.on_certificate(&cert, &ca.chain);
    generator.current = Some(cert);
    generator.issued_once = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_store::MemoryRuntimeStore;
    use crate::types::CaType;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber(AtomicUsize);

    impl CertificateSubscriber for CountingSubscriber {
        fn on_certificate(&self, _certificate: &X509Certificate, _ca_chain: &[String]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn issuer() -> CertificateIssuer {
        let store: Arc<dyn crate::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
        let ca_store = Arc::new(CaStore::open(store, CaType::EcdsaP256).await.unwrap());
        CertificateIssuer::new(ca_store)
    }

    #[tokio::test]
    async fn register_issues_immediately() {
        let issuer = issuer().await;
        let subscriber = Arc::new(CountingSubscriber(AtomicUsize::new(0)));
        let id = issuer
            .register(GeneratorRequest {
                leaf_type: LeafCertificateType::ServerAuth,
                common_name: "gateway.local".into(),
                sans: vec![],
                validity: DEFAULT_VALIDITY,
                disable_rotation: false,
                subscriber: subscriber.clone(),
            })
            .await
            .unwrap();
        assert_eq!(subscriber.0.load(Ordering::SeqCst), 1);
        assert!(issuer.current_certificate(id).is_some());
    }

    #[tokio::test]
    async fn disabled_rotation_generator_ignores_rotate_all() {
        let issuer = issuer().await;
        let subscriber = Arc::new(CountingSubscriber(AtomicUsize::new(0)));
        issuer
            .register(GeneratorRequest {
                leaf_type: LeafCertificateType::ClientAuth,
                common_name: "device-01".into(),
                sans: vec![],
                validity: DEFAULT_VALIDITY,
                disable_rotation: true,
                subscriber: subscriber.clone(),
            })
            .await
            .unwrap();

        issuer.rotate_all().await;
        assert_eq!(subscriber.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotate_all_reissues_enabled_generators() {
        let issuer = issuer().await;
        let subscriber = Arc::new(CountingSubscriber(AtomicUsize::new(0)));
        issuer
            .register(GeneratorRequest {
                leaf_type: LeafCertificateType::ServerAuth,
                common_name: "gateway.local".into(),
                sans: vec![],
                validity: DEFAULT_VALIDITY,
                disable_rotation: false,
                subscriber: subscriber.clone(),
            })
            .await
            .unwrap();

        issuer.rotate_all().await;
        assert_eq!(subscriber.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clamp_validity_enforces_bounds() {
        assert_eq!(clamp_validity(Duration::from_secs(1)), MIN_VALIDITY);
        assert_eq!(clamp_validity(Duration::from_secs(10_000_000)), MAX_VALIDITY);
        assert_eq!(clamp_validity(Duration::from_secs(3600)), Duration::from_secs(3600));
    }
}
