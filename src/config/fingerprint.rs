// Configuration fingerprint
// A stable digest over every property that contributes to issuer definition
// or global validation behavior. Compared per message; a mismatch triggers a
// registry rebuild.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use super::properties::{self, ISSUER_PROPERTY_PREFIX};

const CONTRIBUTING_GLOBALS: &[&str] = &[
    properties::PROP_TOKEN_LOCATION,
    properties::PROP_TOKEN_HEADER,
    properties::PROP_CUSTOM_HEADER_NAME,
    properties::PROP_BEARER_TOKEN_PREFIX,
    properties::PROP_REQUIRE_VALID_TOKEN,
    properties::PROP_JWKS_REFRESH_INTERVAL,
    properties::PROP_MAXIMUM_TOKEN_SIZE,
    properties::PROP_ALLOWED_ALGORITHMS,
    properties::PROP_REQUIRE_HTTPS_FOR_JWKS,
    properties::PROP_JWKS_CONNECTION_TIMEOUT,
    properties::PROP_CLOCK_SKEW,
];

/// Compute the fingerprint of the (overlay-merged) property map.
/// Keys are sorted so the digest is independent of map iteration order.
pub fn configuration_fingerprint(props: &HashMap<String, String>) -> String {
    let mut contributing: Vec<(&str, &str)> = props
        .iter()
        .filter(|(k, _)| {
            k.starts_with(ISSUER_PROPERTY_PREFIX) || CONTRIBUTING_GLOBALS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    contributing.sort_unstable();

    let mut hasher = Sha256::new();
    for (key, value) in contributing {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0xff_u8]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_stable_across_ordering() {
        let a = props(&[("issuer.a.issuer", "a"), ("maximum-token-size", "1024")]);
        let b = props(&[("maximum-token-size", "1024"), ("issuer.a.issuer", "a")]);
        assert_eq!(configuration_fingerprint(&a), configuration_fingerprint(&b));
    }

    #[test]
    fn test_issuer_change_alters_fingerprint() {
        let a = props(&[("issuer.a.issuer", "a")]);
        let b = props(&[("issuer.a.issuer", "b")]);
        assert_ne!(configuration_fingerprint(&a), configuration_fingerprint(&b));
    }

    #[test]
    fn test_non_contributing_keys_ignored() {
        let a = props(&[("issuer.a.issuer", "a")]);
        let b = props(&[("issuer.a.issuer", "a"), ("some.host.concern", "x")]);
        assert_eq!(configuration_fingerprint(&a), configuration_fingerprint(&b));
    }

    #[test]
    fn test_global_change_alters_fingerprint() {
        let a = props(&[("maximum-token-size", "1024")]);
        let b = props(&[("maximum-token-size", "2048")]);
        assert_ne!(configuration_fingerprint(&a), configuration_fingerprint(&b));
    }
}
