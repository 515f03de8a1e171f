//! The local Certificate Authority: key/cert material, keystore persistence,
//! and on-demand type rotation (§4.1)

use crate::crypto::keystore::{self, EncryptedKeystore};
use crate::crypto::x509::{self, X509Certificate};
use crate::error::{CdaError, Result};
use crate::traits::RuntimeStore;
use crate::types::{CaType, SecureString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const PASSPHRASE_KEY: &str = "ca_passphrase";
const KEYSTORE_KEY: &str = "ca/keystore";
const AUTHORITIES_KEY: &str = "certificates/authorities";

/// CA lifetime: 10 years (§4.1 step 2).
const CA_VALIDITY: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 10);

#[derive(Serialize, Deserialize)]
struct StoredKeystore {
    ca_type: CaType,
    encrypted_private_key: EncryptedKeystore,
}

/// The currently active CA key and certificate, plus the chain published to
/// subscribers.
///
/// Invariant (§3): `chain[0] == certificate_pem`; the certificate's public
/// key matches `private_key_pem`.
#[derive(Clone)]
pub struct CaMaterial {
    /// The CA's key algorithm.
    pub ca_type: CaType,
    /// PEM-encoded CA private key. Held in memory only; never logged.
    pub private_key_pem: SecureString,
    /// PEM-encoded CA certificate.
    pub certificate_pem: String,
    /// The published chain (currently just `[certificate_pem]`; a single
    /// self-signed CA has no intermediates).
    pub chain: Vec<String>,
}

/// Owns the active CA; the sole writer of CA key material and the keystore.
pub struct CaStore {
    store: Arc<dyn RuntimeStore>,
    material: RwLock<Arc<CaMaterial>>,
}

impl CaStore {
    /// Open (or initialize) the CA store, generating a CA of `default_type`
    /// if none is persisted yet.
    pub async fn open(store: Arc<dyn RuntimeStore>, default_type: CaType) -> Result<Self> {
        let material = Self::load_or_create(store.as_ref(), default_type).await?;
        Ok(Self {
            store,
            material: RwLock::new(Arc::new(material)),
        })
    }

    /// The currently active CA material. Never fails after successful
    /// initialization.
    pub async fn current(&self) -> Arc<CaMaterial> {
        self.material.read().await.clone()
    }

    /// Ensure the active CA is of `desired_type`, rotating if necessary.
    /// Returns the (possibly unchanged) material and whether a rotation
    /// occurred.
    pub async fn ensure(&self, desired_type: CaType) -> Result<(Arc<CaMaterial>, bool)> {
        let current = self.current().await;
        if current.ca_type == desired_type {
            return Ok((current, false));
        }

        let passphrase = Self::passphrase(self.store.as_ref()).await?;
        let rotated = Self::generate_and_persist(
            self.store.as_ref(),
            desired_type,
            passphrase.expose_secret(),
        )
        .await?;

        let mut guard = self.material.write().await;
        *guard = Arc::new(rotated.clone());
        info!(ca_type = %desired_type, "CA rotated to new key type");
        Ok((Arc::new(rotated), true))
    }

    async fn load_or_create(store: &dyn RuntimeStore, default_type: CaType) -> Result<CaMaterial> {
        let passphrase = Self::passphrase(store).await?;

        match Self::load(store, passphrase.expose_secret()).await {
            Ok(Some(material)) => Ok(material),
            Ok(None) => {
                info!("no CA keystore found, minting a new CA");
                Self::generate_and_persist(store, default_type, passphrase.expose_secret()).await
            }
            Err(e) => {
                warn!(error = %e, "CA keystore present but unreadable, minting a replacement CA");
                Self::generate_and_persist(store, default_type, passphrase.expose_secret()).await
            }
        }
    }

    async fn passphrase(store: &dyn RuntimeStore) -> Result<SecureString> {
        if let Some(bytes) = store.get(PASSPHRASE_KEY).await? {
            let text = String::from_utf8(bytes)
                .map_err(|_| CdaError::ServiceError("stored CA passphrase is not UTF-8".into()))?;
            return Ok(SecureString::new(text));
        }

        let generated = keystore::generate_passphrase();
        store.put(PASSPHRASE_KEY, generated.as_bytes()).await?;
        Ok(SecureString::new(generated))
    }

    async fn load(store: &dyn RuntimeStore, passphrase: &str) -> Result<Option<CaMaterial>> {
        let Some(keystore_bytes) = store.get(KEYSTORE_KEY).await? else {
            return Ok(None);
        };
        let stored: StoredKeystore = serde_json::from_slice(&keystore_bytes)?;
        let private_key_bytes = keystore::decrypt(&stored.encrypted_private_key, passphrase)?;
        let private_key_pem = String::from_utf8(private_key_bytes)
            .map_err(|_| CdaError::ServiceError("decrypted CA key is not UTF-8".into()))?;

        let Some(authorities_bytes) = store.get(AUTHORITIES_KEY).await? else {
            return Ok(None);
        };
        let chain: Vec<String> = serde_json::from_slice(&authorities_bytes)?;
        let Some(certificate_pem) = chain.first().cloned() else {
            return Ok(None);
        };

        Ok(Some(CaMaterial {
            ca_type: stored.ca_type,
            private_key_pem: SecureString::new(private_key_pem),
            certificate_pem,
            chain,
        }))
    }

    async fn generate_and_persist(
        store: &dyn RuntimeStore,
        ca_type: CaType,
        passphrase: &str,
    ) -> Result<CaMaterial> {
        let cert = x509::generate_ca(ca_type, CA_VALIDITY)?;
        Self::persist(store, ca_type, &cert, passphrase).await?;
        Ok(CaMaterial {
            ca_type,
            private_key_pem: SecureString::new(cert.private_key_pem),
            certificate_pem: cert.certificate_pem.clone(),
            chain: vec![cert.certificate_pem],
        })
    }

    async fn persist(
        store: &dyn RuntimeStore,
        ca_type: CaType,
        cert: &X509Certificate,
        passphrase: &str,
    ) -> Result<()> {
        let encrypted_private_key = keystore::encrypt(cert.private_key_pem.as_bytes(), passphrase)?;
        let stored = StoredKeystore {
            ca_type,
            encrypted_private_key,
        };
        let keystore_bytes = serde_json::to_vec(&stored)?;
        store.put(KEYSTORE_KEY, &keystore_bytes).await?;

        let chain = vec![cert.certificate_pem.clone()];
        let authorities_bytes = serde_json::to_vec(&chain)?;
        store.put(AUTHORITIES_KEY, &authorities_bytes).await?;

        Ok(())
    }
}
