//! Common types shared across the client device authentication core (§3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// CA key algorithm. Determines key algorithm and signature scheme.
/// Default is `Rsa2048` when unspecified or the configured list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaType {
    /// RSA-2048
    Rsa2048,
    /// ECDSA P-256
    EcdsaP256,
}

impl Default for CaType {
    fn default() -> Self {
        CaType::Rsa2048
    }
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaType::Rsa2048 => write!(f, "RSA_2048"),
            CaType::EcdsaP256 => write!(f, "ECDSA_P256"),
        }
    }
}

impl CaType {
    /// Parse from the configuration's `caType` string list, taking the first
    /// recognised entry and defaulting to RSA_2048 on an empty or unknown list.
    pub fn from_config_list(values: &[String]) -> Self {
        values
            .iter()
            .find_map(|v| match v.as_str() {
                "RSA_2048" => Some(CaType::Rsa2048),
                "ECDSA_P256" => Some(CaType::EcdsaP256),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Certificate use: server-presented (serverAuth) or client-presented (clientAuth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafCertificateType {
    /// ExtendedKeyUsage = serverAuth (+ clientAuth, matching the grounding
    /// codebase's dual-use server certs).
    ServerAuth,
    /// ExtendedKeyUsage = clientAuth only.
    ClientAuth,
}

/// Certificate trust status (§3). DENY/REVOKED are not modeled — revocation
/// list distribution is an explicit non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateStatus {
    /// Verified active by the cloud, within the trust window.
    Active,
    /// Not yet verified, or outside the trust window.
    Unknown,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateStatus::Active => write!(f, "ACTIVE"),
            CertificateStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Network connectivity state, as observed by the host service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Network is reachable.
    NetworkUp,
    /// Network is unreachable.
    NetworkDown,
}

/// A certificate fingerprint: lowercase hex of SHA-256 over the DER encoding,
/// 64 hex characters. Used as the canonical certificate id throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A certificate record in the content-addressed registry (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// `hexLower(SHA-256(DER(cert)))`; always consistent with `pem`.
    pub id: Fingerprint,
    /// Stored status, subject to the trust window at read time.
    pub status: CertificateStatus,
    /// When `status` was last written.
    pub last_updated: DateTime<Utc>,
    /// The PEM-encoded certificate bytes.
    pub pem: String,
}

impl CertificateRecord {
    /// Whether the stored status should be honored at `now`, per the trust
    /// window invariant in §3/§8: `now - lastUpdated < trustDurationHours`.
    pub fn trusted(&self, now: DateTime<Utc>, trust_duration_hours: i64) -> bool {
        let age = now.signed_duration_since(self.last_updated);
        age < chrono::Duration::hours(trust_duration_hours)
    }

    /// The externally-observable status: UNKNOWN whenever outside the trust
    /// window, regardless of the stored value.
    pub fn status(&self, now: DateTime<Utc>, trust_duration_hours: i64) -> CertificateStatus {
        if self.trusted(now, trust_duration_hours) {
            self.status
        } else {
            CertificateStatus::Unknown
        }
    }
}

/// A Thing: a cloud-registered client device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing {
    /// Matches `[A-Za-z0-9\-_:]+`.
    pub name: String,
    /// Monotonically increasing version, bumped on attach/detach.
    pub version: u64,
    /// certificate id -> last-verified instant.
    pub attached_certificate_ids: BTreeMap<String, DateTime<Utc>>,
    /// When true, this Thing never compares equal to any other (forces
    /// re-persistence); cleared once persisted.
    pub modified: bool,
}

/// Error for a Thing name that does not match `[A-Za-z0-9\-_:]+`.
#[derive(Debug, thiserror::Error)]
#[error("invalid thing name: {0}")]
pub struct InvalidThingName(pub String);

impl Thing {
    /// Construct a brand-new Thing record, validating its name.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, InvalidThingName> {
        let name = name.into();
        if !is_valid_thing_name(&name) {
            return Err(InvalidThingName(name));
        }
        Ok(Self {
            name,
            version: 0,
            attached_certificate_ids: BTreeMap::new(),
            modified: true,
        })
    }

    /// Attach a certificate id, recording `at` as the last-verified instant.
    pub fn attach_certificate(&mut self, certificate_id: &str, at: DateTime<Utc>) {
        self.attached_certificate_ids
            .insert(certificate_id.to_string(), at);
        self.version += 1;
        self.modified = true;
    }

    /// Detach a certificate id, bumping the version regardless of whether it
    /// was present.
    pub fn detach_certificate(&mut self, certificate_id: &str) {
        self.attached_certificate_ids.remove(certificate_id);
        self.version += 1;
        self.modified = true;
    }
}

/// Validate a Thing name against `[A-Za-z0-9\-_:]+`.
pub fn is_valid_thing_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

impl PartialEq for Thing {
    fn eq(&self, other: &Self) -> bool {
        // A Thing with modified=true never compares equal to any other Thing
        // (forces re-persistence), per §3.
        if self.modified || other.modified {
            return false;
        }
        self.name == other.name
            && self.version == other.version
            && self.attached_certificate_ids == other.attached_certificate_ids
    }
}

/// A secret string with redacted `Debug` output, matching the grounding
/// codebase's `SecureString`.
#[derive(Clone)]
pub struct SecureString(secrecy::SecretString);

impl SecureString {
    /// Wrap a plaintext secret.
    pub fn new(s: String) -> Self {
        Self(secrecy::SecretString::from(s))
    }

    /// Expose the secret's contents.
    pub fn expose_secret(&self) -> &str {
        use secrecy::ExposeSecret;
        self.0.expose_secret()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_type_defaults_to_rsa() {
        assert_eq!(CaType::from_config_list(&[]), CaType::Rsa2048);
        assert_eq!(CaType::from_config_list(&["bogus".into()]), CaType::Rsa2048);
        assert_eq!(
            CaType::from_config_list(&["ECDSA_P256".into()]),
            CaType::EcdsaP256
        );
    }

    #[test]
    fn thing_name_validation() {
        assert!(Thing::new("edge-device_01:cam").is_ok());
        assert!(Thing::new("").is_err());
        assert!(Thing::new("bad name!").is_err());
    }

    #[test]
    fn modified_thing_never_equal() {
        let a = Thing::new("alpha").unwrap();
        let mut b = a.clone();
        b.modified = false;
        let mut a2 = a.clone();
        a2.modified = false;
        assert_ne!(a, b);
        assert_eq!(a2, b);
    }

    #[test]
    fn trust_window_expires() {
        let now = Utc::now();
        let record = CertificateRecord {
            id: Fingerprint("abc".into()),
            status: CertificateStatus::Active,
            last_updated: now - chrono::Duration::hours(25),
            pem: String::new(),
        };
        assert_eq!(record.status(now, 24), CertificateStatus::Unknown);
        let fresh = CertificateRecord {
            last_updated: now - chrono::Duration::hours(23),
            ..record
        };
        assert_eq!(fresh.status(now, 24), CertificateStatus::Active);
    }
}
