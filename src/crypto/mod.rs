//! Cryptographic primitives for the client device authentication core.
//!
//! ## Architecture
//!
//! ```text
//! CA keystore (passphrase -> Argon2id -> AES-256-GCM)
//!   ↓
//! X.509 generation (rcgen): self-signed CA, CA-signed leaf certificates
//!   ↓
//! RFC 5280 validation (x509-parser): structural/semantic checks on any
//! certificate this crate is handed (client device certs included)
//! ```

pub mod keystore;
pub mod rfc5280;
pub mod x509;

pub use keystore::{decrypt, encrypt, generate_passphrase, EncryptedKeystore};
pub use rfc5280::{
    validate_certificate, validate_certificate_der, CertificateMetadata, Rfc5280Error,
    Rfc5280ValidationResult,
};
pub use x509::{
    calculate_fingerprint, generate_ca, generate_leaf, LeafParams, X509Certificate, CA_COMMON_NAME,
};
