// Static property keys, descriptor tables and global settings

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;

use super::ConfigError;

pub const PROP_TOKEN_LOCATION: &str = "token-location";
pub const PROP_TOKEN_HEADER: &str = "token-header";
pub const PROP_CUSTOM_HEADER_NAME: &str = "custom-header-name";
pub const PROP_BEARER_TOKEN_PREFIX: &str = "bearer-token-prefix";
pub const PROP_REQUIRE_VALID_TOKEN: &str = "require-valid-token";
pub const PROP_JWKS_REFRESH_INTERVAL: &str = "jwks-refresh-interval";
pub const PROP_MAXIMUM_TOKEN_SIZE: &str = "maximum-token-size";
pub const PROP_ALLOWED_ALGORITHMS: &str = "allowed-algorithms";
pub const PROP_REQUIRE_HTTPS_FOR_JWKS: &str = "require-https-for-jwks";
pub const PROP_JWKS_CONNECTION_TIMEOUT: &str = "jwks-connection-timeout";
pub const PROP_CLOCK_SKEW: &str = "clock-skew";
pub const PROP_OVERLAY_CONFIG_FILE: &str = "overlay-config-file";

/// Prefix of dynamic per-issuer properties: `issuer.<NAME>.<KEY>`
pub const ISSUER_PROPERTY_PREFIX: &str = "issuer.";

/// Declarative property metadata exposed to the host at registration time.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<&'static str>,
}

pub const PROPERTY_DESCRIPTORS: &[PropertyDescriptor] = &[
    PropertyDescriptor {
        name: PROP_TOKEN_LOCATION,
        description: "Where the bearer token is read from: AUTHORIZATION_HEADER, CUSTOM_HEADER or MESSAGE_BODY",
        required: false,
        default: Some("AUTHORIZATION_HEADER"),
    },
    PropertyDescriptor {
        name: PROP_TOKEN_HEADER,
        description: "Header name carrying the token when AUTHORIZATION_HEADER is selected",
        required: false,
        default: Some("Authorization"),
    },
    PropertyDescriptor {
        name: PROP_CUSTOM_HEADER_NAME,
        description: "Header name carrying the token when CUSTOM_HEADER is selected",
        required: false,
        default: None,
    },
    PropertyDescriptor {
        name: PROP_BEARER_TOKEN_PREFIX,
        description: "Prefix stripped from the header value before validation",
        required: false,
        default: Some("Bearer "),
    },
    PropertyDescriptor {
        name: PROP_REQUIRE_VALID_TOKEN,
        description: "Whether a missing token routes the message to authentication-failed",
        required: false,
        default: Some("true"),
    },
    PropertyDescriptor {
        name: PROP_JWKS_REFRESH_INTERVAL,
        description: "Seconds between proactive JWKS refreshes",
        required: false,
        default: Some("300"),
    },
    PropertyDescriptor {
        name: PROP_MAXIMUM_TOKEN_SIZE,
        description: "Maximum accepted compact-JWS length in bytes",
        required: false,
        default: Some("16384"),
    },
    PropertyDescriptor {
        name: PROP_ALLOWED_ALGORITHMS,
        description: "Comma-separated signature algorithm allow-list",
        required: false,
        default: Some("RS256,RS384,RS512,ES256,ES384,ES512,PS256,PS384,PS512"),
    },
    PropertyDescriptor {
        name: PROP_REQUIRE_HTTPS_FOR_JWKS,
        description: "Reject non-https JWKS urls",
        required: false,
        default: Some("true"),
    },
    PropertyDescriptor {
        name: PROP_JWKS_CONNECTION_TIMEOUT,
        description: "Seconds allowed for a JWKS fetch",
        required: false,
        default: Some("10"),
    },
    PropertyDescriptor {
        name: PROP_CLOCK_SKEW,
        description: "Seconds of tolerance applied to time-window claim checks",
        required: false,
        default: Some("0"),
    },
    PropertyDescriptor {
        name: PROP_OVERLAY_CONFIG_FILE,
        description: "Optional TOML file whose keys are merged over the property map",
        required: false,
        default: None,
    },
];

/// Declarative metadata for the attributes the processor writes.
#[derive(Debug, Clone, Copy)]
pub struct AttributeDescriptor {
    pub key: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

pub const ATTRIBUTE_DESCRIPTORS: &[AttributeDescriptor] = &[
    AttributeDescriptor {
        key: "jwt.content.*",
        description: "Every non-filtered claim of the validated token",
        category: "content",
    },
    AttributeDescriptor {
        key: "jwt.token.subject",
        description: "The sub claim",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.issuer",
        description: "The matched issuer identifier",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.expiration",
        description: "The exp claim as Unix seconds",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.scopes",
        description: "Comma-joined scopes derived from scope/scp",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.roles",
        description: "Comma-joined roles claim",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.groups",
        description: "Comma-joined groups claim",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.present",
        description: "Whether a token was found on the message",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.token.validated.at",
        description: "Monotonically increasing validation timestamp (ms)",
        category: "identity",
    },
    AttributeDescriptor {
        key: "jwt.authorization.authorized",
        description: "Whether the token passed authorization",
        category: "authorization",
    },
    AttributeDescriptor {
        key: "jwt.authorization.bypassed",
        description: "Whether authorization passed because no policy exists",
        category: "authorization",
    },
    AttributeDescriptor {
        key: "jwt.error.code",
        description: "Stable failure code",
        category: "error",
    },
    AttributeDescriptor {
        key: "jwt.error.reason",
        description: "Human-readable failure reason",
        category: "error",
    },
    AttributeDescriptor {
        key: "jwt.error.category",
        description: "Failure category",
        category: "error",
    },
];

/// Where the coordinator looks for the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLocation {
    AuthorizationHeader,
    CustomHeader,
    MessageBody,
}

impl TokenLocation {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AUTHORIZATION_HEADER" => Ok(Self::AuthorizationHeader),
            "CUSTOM_HEADER" => Ok(Self::CustomHeader),
            "MESSAGE_BODY" => Ok(Self::MessageBody),
            other => Err(ConfigError::InvalidProperty {
                property: PROP_TOKEN_LOCATION.to_string(),
                reason: format!("unknown token location '{other}'"),
            }),
        }
    }
}

/// Parsed global (non-issuer) settings.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub token_location: TokenLocation,
    pub token_header: String,
    pub custom_header_name: Option<String>,
    pub bearer_prefix: String,
    pub require_valid_token: bool,
    pub refresh_interval: Duration,
    pub max_token_size: usize,
    pub allowed_algorithms: Vec<String>,
    pub require_https: bool,
    pub connect_timeout: Duration,
    pub clock_skew: Duration,
}

/// Secure default: asymmetric signature algorithms only. HMAC variants must
/// be allow-listed explicitly and `none` is rejected regardless.
static DEFAULT_ALLOWED_ALGORITHMS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "RS256", "RS384", "RS512", "ES256", "ES384", "ES512", "PS256", "PS384", "PS512",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

fn parse_bool(props: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match props.get(key) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(ConfigError::InvalidProperty {
                property: key.to_string(),
                reason: format!("expected true/false, got '{other}'"),
            }),
        },
    }
}

fn parse_u64(props: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match props.get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidProperty {
            property: key.to_string(),
            reason: format!("expected an integer, got '{v}'"),
        }),
    }
}

impl GlobalSettings {
    /// Parse settings from the (already overlay-merged) property map.
    pub fn parse(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_location = match props.get(PROP_TOKEN_LOCATION) {
            Some(v) => TokenLocation::parse(v)?,
            None => TokenLocation::AuthorizationHeader,
        };

        let custom_header_name = props
            .get(PROP_CUSTOM_HEADER_NAME)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if token_location == TokenLocation::CustomHeader && custom_header_name.is_none() {
            return Err(ConfigError::MissingProperty(PROP_CUSTOM_HEADER_NAME.to_string()));
        }

        let allowed_algorithms = match props.get(PROP_ALLOWED_ALGORITHMS) {
            None => DEFAULT_ALLOWED_ALGORITHMS.clone(),
            Some(v) => {
                let algs: Vec<String> = v
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                if algs.is_empty() {
                    return Err(ConfigError::InvalidProperty {
                        property: PROP_ALLOWED_ALGORITHMS.to_string(),
                        reason: "allow-list is empty".to_string(),
                    });
                }
                algs
            }
        };

        let max_token_size = parse_u64(props, PROP_MAXIMUM_TOKEN_SIZE, 16384)? as usize;
        if max_token_size == 0 {
            return Err(ConfigError::InvalidProperty {
                property: PROP_MAXIMUM_TOKEN_SIZE.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            token_location,
            token_header: props
                .get(PROP_TOKEN_HEADER)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "Authorization".to_string()),
            custom_header_name,
            bearer_prefix: props
                .get(PROP_BEARER_TOKEN_PREFIX)
                .cloned()
                .unwrap_or_else(|| "Bearer ".to_string()),
            require_valid_token: parse_bool(props, PROP_REQUIRE_VALID_TOKEN, true)?,
            refresh_interval: Duration::from_secs(parse_u64(props, PROP_JWKS_REFRESH_INTERVAL, 300)?),
            max_token_size,
            allowed_algorithms,
            require_https: parse_bool(props, PROP_REQUIRE_HTTPS_FOR_JWKS, true)?,
            connect_timeout: Duration::from_secs(parse_u64(props, PROP_JWKS_CONNECTION_TIMEOUT, 10)?),
            clock_skew: Duration::from_secs(parse_u64(props, PROP_CLOCK_SKEW, 0)?),
        })
    }

    /// The header the coordinator reads, given the configured location.
    pub fn effective_header(&self) -> Option<&str> {
        match self.token_location {
            TokenLocation::AuthorizationHeader => Some(&self.token_header),
            TokenLocation::CustomHeader => self.custom_header_name.as_deref(),
            TokenLocation::MessageBody => None,
        }
    }
}
