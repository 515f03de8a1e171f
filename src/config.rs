//! Configuration Module
//!
//! Mirrors the persisted configuration tree (§6): certificate authority
//! material locations, performance limits, security windows, certificate
//! validity periods, device group/policy definitions, and connectivity.

use crate::policy::{GroupDefinition, PolicyStatement};
use crate::types::CaType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum allowed certificate validity, in seconds (60s).
pub const MIN_CERT_VALIDITY_SECS: u64 = 60;
/// Maximum allowed certificate validity, in seconds (10 days).
pub const MAX_CERT_VALIDITY_SECS: u64 = 864_000;
/// Default certificate validity, in seconds (7 days).
pub const DEFAULT_CERT_VALIDITY_SECS: u64 = 604_800;
/// Default client device trust window, in hours.
pub const DEFAULT_TRUST_DURATION_HOURS: i64 = 24;

/// Root configuration for the authentication core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local CA key/certificate material locations and algorithm.
    pub certificate_authority: CertificateAuthorityConfig,

    /// Session table and background worker limits.
    pub performance: PerformanceConfig,

    /// Trust window governing cached authentication decisions.
    pub security: SecurityConfig,

    /// Leaf certificate issuance policy.
    pub certificates: CertificatesConfig,

    /// Device group definitions and their associated policies.
    pub device_groups: DeviceGroupsConfig,

    /// Addresses this gateway advertises to clients as SAN entries.
    pub connectivity: ConnectivityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            certificate_authority: CertificateAuthorityConfig::default(),
            performance: PerformanceConfig::default(),
            security: SecurityConfig::default(),
            certificates: CertificatesConfig::default(),
            device_groups: DeviceGroupsConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

/// Where the CA's key and certificate live, and which algorithm to use when
/// one must be generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateAuthorityConfig {
    /// `file://` URI to the (possibly passphrase-encrypted) CA private key.
    pub private_key_uri: Option<String>,

    /// `file://` URI to the CA certificate PEM.
    pub certificate_uri: Option<String>,

    /// Algorithm preference list; first recognized entry wins, default
    /// RSA_2048 on an empty or unrecognized list.
    pub ca_type: Vec<String>,
}

impl Default for CertificateAuthorityConfig {
    fn default() -> Self {
        Self {
            private_key_uri: None,
            certificate_uri: None,
            ca_type: Vec::new(),
        }
    }
}

impl CertificateAuthorityConfig {
    /// Resolve the configured algorithm preference into a concrete [`CaType`].
    pub fn resolved_ca_type(&self) -> CaType {
        CaType::from_config_list(&self.ca_type)
    }
}

/// Limits governing in-memory working sets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum number of concurrently tracked sessions before LRU eviction.
    pub max_active_auth_tokens: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_active_auth_tokens: 10_000,
        }
    }
}

/// Security-sensitive timing parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// How long a cloud-verified ACTIVE/UNKNOWN status remains trusted
    /// without re-verification (§3, §8). Clamped to `[0, i64::MAX]`.
    pub client_device_trust_duration_hours: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            client_device_trust_duration_hours: DEFAULT_TRUST_DURATION_HOURS,
        }
    }
}

impl SecurityConfig {
    /// Clamp `client_device_trust_duration_hours` into `[0, i64::MAX]`,
    /// i.e. reject negative configuration values by flooring at zero.
    pub fn clamped_trust_duration_hours(&self) -> i64 {
        self.client_device_trust_duration_hours.max(0)
    }
}

/// Leaf certificate issuance policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Validity, in seconds, for server-presented certificates.
    pub server_certificate_validity_seconds: u64,

    /// Validity, in seconds, for client-presented certificates.
    pub client_certificate_validity_seconds: u64,

    /// When true, the expiry monitor never proactively rotates leaf
    /// certificates; they are only (re)issued on explicit request.
    pub disable_certificate_rotation: bool,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            server_certificate_validity_seconds: DEFAULT_CERT_VALIDITY_SECS,
            client_certificate_validity_seconds: DEFAULT_CERT_VALIDITY_SECS,
            disable_certificate_rotation: false,
        }
    }
}

impl CertificatesConfig {
    /// Clamp a configured validity into `[MIN_CERT_VALIDITY_SECS,
    /// MAX_CERT_VALIDITY_SECS]`.
    pub fn clamp_validity(seconds: u64) -> u64 {
        seconds.clamp(MIN_CERT_VALIDITY_SECS, MAX_CERT_VALIDITY_SECS)
    }

    /// Server certificate validity after clamping.
    pub fn server_validity_secs(&self) -> u64 {
        Self::clamp_validity(self.server_certificate_validity_seconds)
    }

    /// Client certificate validity after clamping.
    pub fn client_validity_secs(&self) -> u64 {
        Self::clamp_validity(self.client_certificate_validity_seconds)
    }
}

/// Device group definitions and the policies attached to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceGroupsConfig {
    /// Group name -> selection rule and attached policy names.
    pub definitions: BTreeMap<String, GroupDefinition>,

    /// Policy name -> ALLOW statements.
    pub policies: BTreeMap<String, Vec<PolicyStatement>>,
}

impl Default for DeviceGroupsConfig {
    fn default() -> Self {
        Self {
            definitions: BTreeMap::new(),
            policies: BTreeMap::new(),
        }
    }
}

/// Network-facing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Addresses (IPs or hostnames) included as SAN entries on generated
    /// server certificates, in addition to `localhost`.
    pub host_addresses: Vec<String>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            host_addresses: Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Underlying file could not be read or written.
    #[error("IO error: {0}")]
    Io(String),

    /// TOML could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// TOML could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(String),

    /// A value was structurally invalid once parsed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &std::path::Path) -> std::result::Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Validate structural invariants that TOML parsing alone doesn't catch.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(uri) = &self.certificate_authority.private_key_uri {
            if self.certificate_authority.certificate_uri.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "certificate_uri must be set alongside private_key_uri ({uri})"
                )));
            }
            Self::validate_uri_scheme(uri)?;
        }
        if let Some(uri) = &self.certificate_authority.certificate_uri {
            Self::validate_uri_scheme(uri)?;
        }

        for (group_name, definition) in &self.device_groups.definitions {
            if !self
                .device_groups
                .policies
                .contains_key(&definition.policy_name)
            {
                return Err(ConfigError::Invalid(format!(
                    "device group '{group_name}' references unknown policy '{}'",
                    definition.policy_name
                )));
            }
        }

        if self.performance.max_active_auth_tokens == 0 {
            return Err(ConfigError::Invalid(
                "performance.max_active_auth_tokens must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// `privateKeyUri`/`certificateUri` must be `file:` or `pkcs11:` (§6, §7).
    fn validate_uri_scheme(uri: &str) -> std::result::Result<(), ConfigError> {
        if uri.starts_with("file:") || uri.starts_with("pkcs11:") {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "URI must use the file: or pkcs11: scheme, got '{uri}'"
            )))
        }
    }

    /// Write a fully-populated example configuration to `path`.
    pub fn create_example(path: &std::path::Path) -> std::result::Result<(), ConfigError> {
        let mut policies = BTreeMap::new();
        policies.insert(
            "camera-policy".to_string(),
            vec![PolicyStatement {
                effect: crate::policy::Effect::Allow,
                operations: vec!["mqtt:Publish".to_string(), "mqtt:Subscribe".to_string()],
                resources: vec![
                    "mqtt:topic:clients/${iot:Connection.Thing.ThingName}/data".to_string(),
                ],
            }],
        );
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "cameras".to_string(),
            GroupDefinition {
                selection_rule: r#"thingName:"camera-*""#.to_string(),
                policy_name: "camera-policy".to_string(),
            },
        );

        let example = Config {
            certificate_authority: CertificateAuthorityConfig {
                private_key_uri: Some("file:///var/lib/cda-core/ca.key".to_string()),
                certificate_uri: Some("file:///var/lib/cda-core/ca.crt".to_string()),
                ca_type: vec!["RSA_2048".to_string()],
            },
            device_groups: DeviceGroupsConfig { definitions, policies },
            connectivity: ConnectivityConfig {
                host_addresses: vec!["gateway.local".to_string()],
            },
            ..Config::default()
        };

        example.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.security.client_device_trust_duration_hours,
            DEFAULT_TRUST_DURATION_HOURS
        );
    }

    #[test]
    fn validity_clamps_to_bounds() {
        assert_eq!(CertificatesConfig::clamp_validity(1), MIN_CERT_VALIDITY_SECS);
        assert_eq!(
            CertificatesConfig::clamp_validity(10_000_000),
            MAX_CERT_VALIDITY_SECS
        );
        assert_eq!(CertificatesConfig::clamp_validity(3600), 3600);
    }

    #[test]
    fn trust_duration_floors_at_zero() {
        let config = SecurityConfig {
            client_device_trust_duration_hours: -5,
        };
        assert_eq!(config.clamped_trust_duration_hours(), 0);
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_private_key_uri_without_certificate_uri() {
        let mut config = Config::default();
        config.certificate_authority.private_key_uri = Some("file:///ca.key".to_string());
        config.certificate_authority.certificate_uri = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_file_or_pkcs11_uri_scheme() {
        let mut config = Config::default();
        config.certificate_authority.private_key_uri = Some("http://example.com/ca.key".to_string());
        config.certificate_authority.certificate_uri = Some("file:///ca.crt".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_pkcs11_scheme() {
        let mut config = Config::default();
        config.certificate_authority.private_key_uri = Some("pkcs11:token=ca?pin-value=1234".to_string());
        config.certificate_authority.certificate_uri = Some("file:///ca.crt".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_policy_reference() {
        let mut config = Config::default();
        config.device_groups.definitions.insert(
            "g1".to_string(),
            GroupDefinition {
                selection_rule: r#"thingName:"alpha""#.to_string(),
                policy_name: "missing-policy".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }
}
