// Per-issuer configuration parsed from dynamic `issuer.<NAME>.<KEY>` properties

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use super::properties::{GlobalSettings, ISSUER_PROPERTY_PREFIX};
use super::ConfigError;

const KEY_ISSUER: &str = "issuer";
const KEY_JWKS_TYPE: &str = "jwks-type";
const KEY_JWKS_URL: &str = "jwks-url";
const KEY_JWKS_FILE: &str = "jwks-file";
const KEY_JWKS_CONTENT: &str = "jwks-content";
const KEY_AUDIENCE: &str = "audience";
const KEY_CLIENT_ID: &str = "client-id";
const KEY_REQUIRED_SCOPES: &str = "required-scopes";
const KEY_REQUIRED_ROLES: &str = "required-roles";
const KEY_REQUIRED_GROUPS: &str = "required-groups";

const KNOWN_KEYS: &[&str] = &[
    KEY_ISSUER,
    KEY_JWKS_TYPE,
    KEY_JWKS_URL,
    KEY_JWKS_FILE,
    KEY_JWKS_CONTENT,
    KEY_AUDIENCE,
    KEY_CLIENT_ID,
    KEY_REQUIRED_SCOPES,
    KEY_REQUIRED_ROLES,
    KEY_REQUIRED_GROUPS,
];

/// Where an issuer's JWKS document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwksSourceConfig {
    Url {
        url: String,
        refresh_interval: Duration,
        connect_timeout: Duration,
        require_https: bool,
    },
    File {
        path: PathBuf,
    },
    Inline {
        json: String,
    },
}

/// One trusted issuer. Immutable; replaced wholesale on reconfigure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    /// Human-readable name (the `<NAME>` segment of the dynamic properties).
    pub name: String,
    /// Canonical identifier matched exactly against the `iss` claim.
    pub issuer: String,
    pub jwks_source: JwksSourceConfig,
    /// Accepted audiences; empty means no audience check.
    pub audiences: HashSet<String>,
    pub client_id: Option<String>,
    /// Effective algorithm preferences for this issuer.
    pub algorithms: Vec<String>,
}

/// How `required-roles` entries combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleMatch {
    #[default]
    Any,
    All,
}

/// Per-issuer authorization requirements. Absence of the whole record means
/// authorization is bypassed for that issuer, recorded distinctly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationPolicy {
    pub required_scopes: Vec<String>,
    pub required_audiences: Vec<String>,
    pub required_roles: Vec<String>,
    pub role_match: RoleMatch,
    pub required_groups: Vec<String>,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a `required-roles` value. An optional `any:`/`all:` prefix makes the
/// match mode explicit; the default is any-of.
fn parse_roles(value: &str) -> (Vec<String>, RoleMatch) {
    let trimmed = value.trim();
    if let Some(rest) = trimmed.strip_prefix("all:") {
        (split_list(rest), RoleMatch::All)
    } else if let Some(rest) = trimmed.strip_prefix("any:") {
        (split_list(rest), RoleMatch::Any)
    } else {
        (split_list(trimmed), RoleMatch::Any)
    }
}

fn build_issuer(
    name: &str,
    keys: &HashMap<&str, &str>,
    global: &GlobalSettings,
) -> Result<(IssuerConfig, Option<AuthorizationPolicy>), ConfigError> {
    let issuer = keys
        .get(KEY_ISSUER)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ConfigError::MissingProperty(format!("{ISSUER_PROPERTY_PREFIX}{name}.{KEY_ISSUER}"))
        })?;

    let jwks_type = keys.get(KEY_JWKS_TYPE).map(|v| v.trim()).unwrap_or("url");
    let jwks_source = match jwks_type.to_ascii_lowercase().as_str() {
        "url" => {
            let url = keys
                .get(KEY_JWKS_URL)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ConfigError::MissingProperty(format!(
                        "{ISSUER_PROPERTY_PREFIX}{name}.{KEY_JWKS_URL}"
                    ))
                })?;
            if global.require_https && !url.starts_with("https://") {
                return Err(ConfigError::InsecureJwksUrl {
                    issuer: issuer.to_string(),
                    url,
                });
            }
            JwksSourceConfig::Url {
                url,
                refresh_interval: global.refresh_interval,
                connect_timeout: global.connect_timeout,
                require_https: global.require_https,
            }
        }
        "file" => {
            let path = keys
                .get(KEY_JWKS_FILE)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ConfigError::MissingProperty(format!(
                        "{ISSUER_PROPERTY_PREFIX}{name}.{KEY_JWKS_FILE}"
                    ))
                })?;
            JwksSourceConfig::File {
                path: PathBuf::from(path),
            }
        }
        "content" | "inline" => {
            let json = keys
                .get(KEY_JWKS_CONTENT)
                .map(|v| v.to_string())
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    ConfigError::MissingProperty(format!(
                        "{ISSUER_PROPERTY_PREFIX}{name}.{KEY_JWKS_CONTENT}"
                    ))
                })?;
            JwksSourceConfig::Inline { json }
        }
        other => {
            return Err(ConfigError::InvalidProperty {
                property: format!("{ISSUER_PROPERTY_PREFIX}{name}.{KEY_JWKS_TYPE}"),
                reason: format!("unknown JWKS type '{other}'"),
            })
        }
    };

    let config = IssuerConfig {
        name: name.to_string(),
        issuer: issuer.to_string(),
        jwks_source,
        audiences: keys
            .get(KEY_AUDIENCE)
            .map(|v| split_list(v).into_iter().collect())
            .unwrap_or_default(),
        client_id: keys
            .get(KEY_CLIENT_ID)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        // Issuer-level preferences default to the global allow-list.
        algorithms: global.allowed_algorithms.clone(),
    };

    // The policy exists only when at least one authorization key is present;
    // a missing record is the explicit bypass marker.
    let has_policy = [KEY_REQUIRED_SCOPES, KEY_REQUIRED_ROLES, KEY_REQUIRED_GROUPS]
        .iter()
        .any(|k| keys.contains_key(*k));
    let policy = if has_policy {
        let (required_roles, role_match) = keys
            .get(KEY_REQUIRED_ROLES)
            .map(|v| parse_roles(v))
            .unwrap_or_default();
        Some(AuthorizationPolicy {
            required_scopes: keys
                .get(KEY_REQUIRED_SCOPES)
                .map(|v| split_list(v))
                .unwrap_or_default(),
            required_audiences: config.audiences.iter().cloned().collect(),
            required_roles,
            role_match,
            required_groups: keys
                .get(KEY_REQUIRED_GROUPS)
                .map(|v| split_list(v))
                .unwrap_or_default(),
        })
    } else {
        None
    };

    Ok((config, policy))
}

/// Parse all `issuer.<NAME>.<KEY>` properties into issuer entries.
/// Rejects unknown keys, missing mandatory keys and duplicate identifiers.
pub fn parse_issuers(
    props: &HashMap<String, String>,
    global: &GlobalSettings,
) -> Result<Vec<(IssuerConfig, Option<AuthorizationPolicy>)>, ConfigError> {
    let mut grouped: HashMap<&str, HashMap<&str, &str>> = HashMap::new();

    for (prop, value) in props {
        let Some(rest) = prop.strip_prefix(ISSUER_PROPERTY_PREFIX) else {
            continue;
        };
        let Some((name, key)) = rest.split_once('.') else {
            return Err(ConfigError::UnknownIssuerProperty(prop.clone()));
        };
        if name.is_empty() || !KNOWN_KEYS.contains(&key) {
            return Err(ConfigError::UnknownIssuerProperty(prop.clone()));
        }
        grouped.entry(name).or_default().insert(key, value.as_str());
    }

    let mut names: Vec<&&str> = grouped.keys().collect();
    names.sort();

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(grouped.len());
    for name in names {
        let (config, policy) = build_issuer(name, &grouped[*name], global)?;
        if !seen.insert(config.issuer.clone()) {
            return Err(ConfigError::DuplicateIssuer(config.issuer));
        }
        entries.push((config, policy));
    }
    Ok(entries)
}
