// Configuration module
// Parses the host property map into global settings and per-issuer
// configurations, fingerprints contributing inputs, and merges the optional
// overlay file.

pub mod fingerprint;
pub mod issuer;
pub mod overlay;
pub mod properties;

pub use fingerprint::configuration_fingerprint;
pub use issuer::{parse_issuers, AuthorizationPolicy, IssuerConfig, JwksSourceConfig, RoleMatch};
pub use overlay::{merge_properties, OverlaySource};
pub use properties::{GlobalSettings, TokenLocation};

use thiserror::Error;

/// Configuration parse/validation errors. Structural; fatal at scheduling.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required property: {0}")]
    MissingProperty(String),

    #[error("invalid value for {property}: {reason}")]
    InvalidProperty { property: String, reason: String },

    #[error("unknown issuer property key: {0}")]
    UnknownIssuerProperty(String),

    #[error("duplicate issuer identifier: {0}")]
    DuplicateIssuer(String),

    #[error("no issuer configured while a valid token is required")]
    NoIssuers,

    #[error("issuer {issuer} requires https for its JWKS url: {url}")]
    InsecureJwksUrl { issuer: String, url: String },

    #[error("overlay file error: {0}")]
    Overlay(String),
}
