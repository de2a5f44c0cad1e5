// JWKS (JSON Web Key Set) data structures and key conversion

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWK conversion error types
#[derive(Error, Debug)]
pub enum JwkError {
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Base64 decode error: {0}")]
    Base64DecodeError(String),

    #[error("Key conversion error: {0}")]
    KeyConversionError(String),
}

/// JSON Web Key Set structure
/// Per RFC 7517: https://tools.ietf.org/html/rfc7517
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Find a key by its key ID (kid)
    pub fn find_key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// JSON Web Key structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key type (RSA, EC, oct)
    pub kty: String,

    /// Algorithm (RS256, ES256, HS256, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use (sig for signature, enc for encryption)
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// RSA modulus (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve (P-256, P-384)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Symmetric key material (base64url encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,

    /// Additional fields
    #[serde(flatten)]
    pub other: HashMap<String, serde_json::Value>,
}

/// A cache-ready verification key: the decoding key plus the algorithms it
/// may verify.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: Option<String>,
    pub decoding_key: DecodingKey,
    pub algorithms: Vec<Algorithm>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish()
    }
}

impl VerificationKey {
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

impl JsonWebKey {
    /// Convert this JWK into a verification key.
    /// Supports RSA, EC and symmetric (oct) key types.
    pub fn to_verification_key(&self) -> Result<VerificationKey, JwkError> {
        let decoding_key = match self.kty.as_str() {
            "RSA" => {
                let n = self
                    .n
                    .as_deref()
                    .ok_or_else(|| JwkError::MissingField("n (modulus)".to_string()))?;
                let e = self
                    .e
                    .as_deref()
                    .ok_or_else(|| JwkError::MissingField("e (exponent)".to_string()))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::KeyConversionError(e.to_string()))?
            }
            "EC" => {
                let x = self
                    .x
                    .as_deref()
                    .ok_or_else(|| JwkError::MissingField("x (coordinate)".to_string()))?;
                let y = self
                    .y
                    .as_deref()
                    .ok_or_else(|| JwkError::MissingField("y (coordinate)".to_string()))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::KeyConversionError(e.to_string()))?
            }
            "oct" => {
                let k = self
                    .k
                    .as_deref()
                    .ok_or_else(|| JwkError::MissingField("k (key material)".to_string()))?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k)
                    .map_err(|e| JwkError::Base64DecodeError(e.to_string()))?;
                DecodingKey::from_secret(&secret)
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        Ok(VerificationKey {
            kid: self.kid.clone(),
            decoding_key,
            algorithms: self.algorithms()?,
        })
    }

    /// The algorithms this key can verify: the declared `alg` when present,
    /// otherwise the family implied by the key type.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>, JwkError> {
        if let Some(alg) = self.alg.as_deref() {
            return Ok(vec![parse_algorithm(alg)
                .ok_or_else(|| JwkError::UnsupportedAlgorithm(alg.to_string()))?]);
        }
        match self.kty.as_str() {
            "RSA" => Ok(vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ]),
            "EC" => match self.crv.as_deref() {
                Some("P-256") => Ok(vec![Algorithm::ES256]),
                Some("P-384") => Ok(vec![Algorithm::ES384]),
                other => Err(JwkError::UnsupportedAlgorithm(format!(
                    "EC curve {other:?}"
                ))),
            },
            "oct" => Ok(vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512]),
            other => Err(JwkError::UnsupportedKeyType(other.to_string())),
        }
    }

    /// Whether this key may be used for signature verification at all.
    pub fn is_signature_key(&self) -> bool {
        self.use_.as_deref().map(|u| u == "sig").unwrap_or(true)
    }
}

/// Map an algorithm name to the crypto backend's enum. `None` for names the
/// backend cannot verify (notably ES512).
pub fn parse_algorithm(name: &str) -> Option<Algorithm> {
    match name {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Convert a JWKS document into the cache's kid-indexed key map. Keys that
/// cannot be converted are skipped with a warning rather than failing the
/// whole set.
pub fn build_key_map(set: &JsonWebKeySet) -> HashMap<String, VerificationKey> {
    let mut map = HashMap::new();
    for (index, jwk) in set.keys.iter().enumerate() {
        if !jwk.is_signature_key() {
            tracing::warn!(kid = ?jwk.kid, "skipping non-signature key");
            continue;
        }
        match jwk.to_verification_key() {
            Ok(key) => {
                // Keys without a kid are addressable only via the
                // single-key fallback; index them positionally.
                let kid = jwk.kid.clone().unwrap_or_else(|| format!("#{index}"));
                map.insert(kid, key);
            }
            Err(e) => {
                tracing::warn!(kid = ?jwk.kid, error = %e, "skipping unusable key");
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwks_parse() {
        let jwks_json = r#"{
            "keys": [
                {
                    "kid": "test-key-1",
                    "kty": "RSA",
                    "alg": "RS256",
                    "use": "sig",
                    "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
                    "e": "AQAB"
                }
            ]
        }"#;

        let jwks: JsonWebKeySet = serde_json::from_str(jwks_json).unwrap();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("test-key-1"));
        assert!(jwks.find_key("test-key-1").is_some());
        assert!(jwks.find_key("other").is_none());

        let key = jwks.keys[0].to_verification_key().unwrap();
        assert_eq!(key.algorithms, vec![Algorithm::RS256]);
        assert!(key.supports(Algorithm::RS256));
        assert!(!key.supports(Algorithm::RS384));
    }

    #[test]
    fn test_oct_key_conversion() {
        let jwk = JsonWebKey {
            kid: Some("k1".to_string()),
            kty: "oct".to_string(),
            alg: Some("HS256".to_string()),
            use_: Some("sig".to_string()),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            k: Some(URL_SAFE_NO_PAD.encode(b"supersecret")),
            other: HashMap::new(),
        };
        let key = jwk.to_verification_key().unwrap();
        assert_eq!(key.algorithms, vec![Algorithm::HS256]);
    }

    #[test]
    fn test_missing_rsa_fields() {
        let jwk = JsonWebKey {
            kid: Some("k".to_string()),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            use_: Some("sig".to_string()),
            n: None,
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
            k: None,
            other: HashMap::new(),
        };
        assert!(matches!(
            jwk.to_verification_key(),
            Err(JwkError::MissingField(_))
        ));
    }

    #[test]
    fn test_rsa_family_inferred_without_alg() {
        let jwk = JsonWebKey {
            kid: None,
            kty: "RSA".to_string(),
            alg: None,
            use_: None,
            n: Some("AQAB".to_string()),
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
            k: None,
            other: HashMap::new(),
        };
        let algs = jwk.algorithms().unwrap();
        assert!(algs.contains(&Algorithm::RS256));
        assert!(algs.contains(&Algorithm::PS512));
    }

    #[test]
    fn test_enc_keys_skipped() {
        let set = JsonWebKeySet {
            keys: vec![JsonWebKey {
                kid: Some("enc-key".to_string()),
                kty: "oct".to_string(),
                alg: Some("HS256".to_string()),
                use_: Some("enc".to_string()),
                n: None,
                e: None,
                crv: None,
                x: None,
                y: None,
                k: Some(URL_SAFE_NO_PAD.encode(b"secret")),
                other: HashMap::new(),
            }],
        };
        assert!(build_key_map(&set).is_empty());
    }

    #[test]
    fn test_parse_algorithm_rejects_none_and_es512() {
        assert!(parse_algorithm("none").is_none());
        assert!(parse_algorithm("ES512").is_none());
        assert_eq!(parse_algorithm("RS256"), Some(Algorithm::RS256));
    }
}
