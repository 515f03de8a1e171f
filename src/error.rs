//! Error types for the client device authentication core

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, CdaError>;

/// Main error type, grouped by the taxonomy in the error handling design:
/// validation, authentication, authorization, configuration, cloud
/// (transient/permanent), and I/O.
#[derive(Error, Debug)]
pub enum CdaError {
    /// Malformed PEM, bad Thing name, missing required field, bad URI scheme, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Certificate PEM could not be parsed at all (never maps to UNKNOWN).
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// `certificatePem` missing/empty, or credentials otherwise malformed.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Certificate verified but not ACTIVE, or cloud says UNKNOWN.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Session token unknown or expired.
    #[error("invalid session token")]
    InvalidSessionToken,

    /// Missing policy reference, unknown policy variable, malformed rule.
    #[error("policy error: {0}")]
    PolicyException(String),

    /// Configuration value is structurally invalid (bounds, missing fields).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network error, throttling, 5xx, or timeout from the cloud control plane.
    #[error("cloud service interaction failed: {0}")]
    CloudServiceInteraction(String),

    /// Keystore/blob store write failure, or other unexpected I/O error.
    #[error("service error: {0}")]
    ServiceError(String),

    /// Certificate generation errors from rcgen.
    #[error("certificate generation error: {0}")]
    CertGen(#[from] rcgen::Error),

    /// RSA key errors.
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decoding errors.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// PEM parsing errors.
    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),
}

impl CdaError {
    /// The external, domain-level error code for this error (§6), stable
    /// across releases so RPC boundaries built on top of this core can map
    /// it without depending on `Display` text.
    pub fn external_code(&self) -> &'static str {
        match self {
            CdaError::InvalidArgument(_) => "InvalidArgument",
            CdaError::InvalidCertificate(_) => "InvalidCertificate",
            CdaError::InvalidCredential(_) => "InvalidCredential",
            CdaError::AuthenticationFailed(_) => "UnauthorizedError",
            CdaError::InvalidSessionToken => "InvalidSessionToken",
            CdaError::PolicyException(_) => "PolicyException",
            CdaError::InvalidConfiguration(_) => "InvalidConfiguration",
            CdaError::CloudServiceInteraction(_) => "CloudServiceInteraction",
            CdaError::ServiceError(_)
            | CdaError::CertGen(_)
            | CdaError::Rsa(_)
            | CdaError::Io(_)
            | CdaError::Serialization(_)
            | CdaError::Base64(_)
            | CdaError::Pem(_) => "ServiceError",
        }
    }
}
