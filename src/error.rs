// Error types for flowauth
// Stable error codes and categories surfaced on the authentication-failed lane

use thiserror::Error;

/// Error code for a token that is absent where one is required.
pub const CODE_MISSING_TOKEN: &str = "AUTH-001";
/// Error code for internal failures and an uninitialized validator.
pub const CODE_INTERNAL: &str = "AUTH-002";
/// Error code for a token exceeding the configured size limit.
pub const CODE_OVERSIZE: &str = "AUTH-003";
/// Error code for structurally malformed tokens and rejected algorithms.
pub const CODE_MALFORMED: &str = "AUTH-004";
/// Error code for claim-time failures (expired, premature, missing exp).
pub const CODE_CLAIM: &str = "AUTH-005";
/// Error code for signature failures and unresolvable keys.
pub const CODE_SIGNATURE: &str = "AUTH-006";
/// Error code for an unknown or missing issuer.
pub const CODE_ISSUER: &str = "AUTH-007";
/// Error code for audience and client-id binding failures.
pub const CODE_AUDIENCE: &str = "AUTH-008";
/// Error code for a configured authorization policy that denied the token.
pub const CODE_AUTHORIZATION: &str = "AUTH-AUTHZ";

/// Failure categories surfaced as `jwt.error.category`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Structural configuration problem; fatal at scheduling time
    Configuration,
    /// No token where one is required
    Extraction,
    /// Size, parse or algorithm failure
    Format,
    /// Signature mismatch or key missing
    Cryptographic,
    /// Time-window, audience or issuer claim failure
    Claim,
    /// A configured policy denied the token
    Authorization,
    /// Unexpected failure
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Extraction => "extraction",
            Self::Format => "format",
            Self::Cryptographic => "cryptographic",
            Self::Claim => "claim",
            Self::Authorization => "authorization",
            Self::Internal => "internal",
        }
    }
}

/// Main error type for flowauth
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("JWKS source error: {0}")]
    Source(#[from] crate::keys::SourceError),

    #[error("key conversion error: {0}")]
    Jwk(#[from] crate::keys::JwkError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if the error is fatal at scheduling time
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
