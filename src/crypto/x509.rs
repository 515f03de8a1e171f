//! X.509 certificate generation: the local CA and the leaf certificates it issues
//!
//! ```text
//! CA (self-signed, 10 years)
//!   ├─ CA: TRUE
//!   └─ keyUsage: keyCertSign, cRLSign
//!
//! Leaf certificates (rotatable, default 7 days, clamped [60s, 10d])
//!   ├─ CA: FALSE
//!   ├─ keyUsage: digitalSignature, keyEncipherment
//!   └─ extendedKeyUsage: serverAuth(+clientAuth) | clientAuth
//! ```

use crate::error::{CdaError, Result};
use crate::types::{CaType, LeafCertificateType};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};

/// Common name the local CA is issued under.
pub const CA_COMMON_NAME: &str = "Greengrass Core CA";

/// An X.509 certificate paired with its private key, both PEM-encoded.
#[derive(Clone)]
pub struct X509Certificate {
    /// PEM-encoded certificate.
    pub certificate_pem: String,
    /// PEM-encoded private key.
    pub private_key_pem: String,
    /// `hexLower(SHA-256(DER(cert)))`.
    pub fingerprint: String,
}

/// Parameters for leaf certificate generation.
pub struct LeafParams {
    /// Subject common name.
    pub common_name: String,
    /// Subject Alternative Names (DNS names or IP literals as strings).
    pub sans: Vec<String>,
    /// Server or client usage.
    pub leaf_type: LeafCertificateType,
    /// Certificate lifetime. Callers are responsible for clamping to
    /// `[60s, 10d]` (§3) before calling; this function trusts its input.
    pub validity: std::time::Duration,
}

/// Generate a new self-signed CA certificate and key pair of `ca_type`.
///
/// `validity` is the CA's own lifetime (10 years, per §4.1's algorithm).
pub fn generate_ca(ca_type: CaType, validity: std::time::Duration) -> Result<X509Certificate> {
    let key_pair = generate_key_pair(ca_type)?;

    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = ca_distinguished_name();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + duration_from_std(validity);

    let cert = params.self_signed(&key_pair)?;

    Ok(X509Certificate {
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
        fingerprint: calculate_fingerprint(cert.der()),
    })
}

/// Generate a leaf certificate signed by the given CA.
pub fn generate_leaf(
    ca_type: CaType,
    params: LeafParams,
    ca_cert_pem: &str,
    ca_key_pem: &str,
) -> Result<X509Certificate> {
    let ca_key = KeyPair::from_pem(ca_key_pem)?;
    let ca_cert_params = CertificateParams::from_ca_cert_pem(ca_cert_pem)?;
    let issuer = Issuer::new(ca_cert_params, ca_key);

    let key_pair = generate_key_pair(ca_type)?;

    let mut sans = params.sans.clone();
    if !sans.contains(&params.common_name) {
        sans.insert(0, params.common_name.clone());
    }

    let mut cert_params = CertificateParams::new(sans)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, params.common_name.clone());
    cert_params.distinguished_name = dn;
    cert_params.is_ca = IsCa::NoCa;
    cert_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    cert_params.extended_key_usages = match params.leaf_type {
        LeafCertificateType::ServerAuth => vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ],
        LeafCertificateType::ClientAuth => vec![ExtendedKeyUsagePurpose::ClientAuth],
    };
    cert_params.use_authority_key_identifier_extension = true;

    let not_before = OffsetDateTime::now_utc();
    cert_params.not_before = not_before;
    cert_params.not_after = not_before + duration_from_std(params.validity);

    let cert = cert_params.signed_by(&key_pair, &issuer)?;

    Ok(X509Certificate {
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
        fingerprint: calculate_fingerprint(cert.der()),
    })
}

/// SHA-256 fingerprint of a DER-encoded certificate, lowercase hex.
pub fn calculate_fingerprint(cert_der: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hex::encode(hasher.finalize())
}

fn ca_distinguished_name() -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    dn
}

fn generate_key_pair(ca_type: CaType) -> Result<KeyPair> {
    match ca_type {
        CaType::EcdsaP256 => Ok(KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?),
        CaType::Rsa2048 => {
            use rsa::pkcs8::EncodePrivateKey;
            use rsa::RsaPrivateKey;
            let mut rng = rand::rngs::OsRng;
            let private_key = RsaPrivateKey::new(&mut rng, 2048)
                .map_err(|e| CdaError::ServiceError(format!("RSA key generation failed: {e}")))?;
            let der = private_key
                .to_pkcs8_der()
                .map_err(|e| CdaError::ServiceError(format!("RSA key encoding failed: {e}")))?;
            Ok(KeyPair::from_der_and_sign_algo(
                der.as_bytes(),
                &rcgen::PKCS_RSA_SHA256,
            )?)
        }
    }
}

fn duration_from_std(d: std::time::Duration) -> Duration {
    Duration::seconds(d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_rsa_ca() {
        let ca =
            generate_ca(CaType::Rsa2048, std::time::Duration::from_secs(60 * 60 * 24 * 3650))
                .unwrap();
        assert!(ca.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(ca.fingerprint.len(), 64);
    }

    #[test]
    fn generates_ecdsa_ca() {
        let ca = generate_ca(
            CaType::EcdsaP256,
            std::time::Duration::from_secs(60 * 60 * 24 * 3650),
        )
        .unwrap();
        assert!(ca.certificate_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn issues_server_leaf_signed_by_ca() {
        let ca = generate_ca(CaType::EcdsaP256, std::time::Duration::from_secs(315_360_000))
            .unwrap();
        let leaf = generate_leaf(
            CaType::EcdsaP256,
            LeafParams {
                common_name: "localhost".to_string(),
                sans: vec!["localhost".to_string()],
                leaf_type: LeafCertificateType::ServerAuth,
                validity: std::time::Duration::from_secs(604_800),
            },
            &ca.certificate_pem,
            &ca.private_key_pem,
        )
        .unwrap();
        assert!(leaf.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert_ne!(leaf.fingerprint, ca.fingerprint);
    }

    #[test]
    fn issues_client_leaf() {
        let ca =
            generate_ca(CaType::Rsa2048, std::time::Duration::from_secs(315_360_000)).unwrap();
        let leaf = generate_leaf(
            CaType::Rsa2048,
            LeafParams {
                common_name: "device-01".to_string(),
                sans: vec![],
                leaf_type: LeafCertificateType::ClientAuth,
                validity: std::time::Duration::from_secs(60),
            },
            &ca.certificate_pem,
            &ca.private_key_pem,
        )
        .unwrap();
        assert!(leaf.certificate_pem.contains("BEGIN CERTIFICATE"));
    }
}
