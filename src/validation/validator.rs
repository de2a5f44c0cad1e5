// Token validator
// Responsibilities:
// - Parse the compact JWS and enforce the size and algorithm gates
// - Bind the token to a registered issuer and resolve its verification key
// - Verify the signature and the standard time/audience claims

use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::config::GlobalSettings;
use crate::error::{self, ErrorCategory};
use crate::keys::{jwk, JwksCache, KeyLookupError};
use crate::registry::{IssuerEntry, RegistrySnapshot};
use crate::validation::claims::TokenClaims;

/// Tolerance for `iat` values slightly in the future (issuer clock drift).
const ISSUED_AT_TOLERANCE_SECS: i64 = 60;

/// Typed validation failures. Each maps to a stable error code and category.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("no token present")]
    MissingToken,

    #[error("token of {actual} bytes exceeds the {limit} byte limit")]
    Oversize { actual: usize, limit: usize },

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("algorithm {0} is not allowed")]
    AlgorithmRejected(String),

    #[error("issuer {0} is not registered")]
    UnknownIssuer(String),

    #[error("token carries no iss claim")]
    IssuerMissing,

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("verification keys unavailable for issuer {0}")]
    KeysUnavailable(String),

    #[error("token expired at {exp}")]
    Expired { exp: i64 },

    #[error("token not valid before {nbf}")]
    NotYetValid { nbf: i64 },

    #[error("token issued in the future at {iat}")]
    IssuedInFuture { iat: i64 },

    #[error("token carries no exp claim")]
    MissingExpiration,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("client-id mismatch")]
    ClientIdMismatch,

    #[error("internal validation failure: {0}")]
    Internal(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => error::CODE_MISSING_TOKEN,
            Self::Oversize { .. } => error::CODE_OVERSIZE,
            Self::Malformed(_) | Self::AlgorithmRejected(_) => error::CODE_MALFORMED,
            Self::Expired { .. }
            | Self::NotYetValid { .. }
            | Self::IssuedInFuture { .. }
            | Self::MissingExpiration => error::CODE_CLAIM,
            Self::SignatureInvalid(_) | Self::KeysUnavailable(_) => error::CODE_SIGNATURE,
            Self::UnknownIssuer(_) | Self::IssuerMissing => error::CODE_ISSUER,
            Self::AudienceMismatch | Self::ClientIdMismatch => error::CODE_AUDIENCE,
            Self::Internal(_) => error::CODE_INTERNAL,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingToken => ErrorCategory::Extraction,
            Self::Oversize { .. } | Self::Malformed(_) | Self::AlgorithmRejected(_) => {
                ErrorCategory::Format
            }
            Self::SignatureInvalid(_) | Self::KeysUnavailable(_) => ErrorCategory::Cryptographic,
            Self::Expired { .. }
            | Self::NotYetValid { .. }
            | Self::IssuedInFuture { .. }
            | Self::MissingExpiration
            | Self::UnknownIssuer(_)
            | Self::IssuerMissing
            | Self::AudienceMismatch
            | Self::ClientIdMismatch => ErrorCategory::Claim,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

/// A token that passed every validation step.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub claims: TokenClaims,
    /// The registered issuer identifier the token bound to.
    pub issuer_id: String,
    pub algorithm: String,
}

/// Signature/claims pipeline over one registry snapshot.
pub struct TokenValidator<'a> {
    snapshot: &'a RegistrySnapshot,
    cache: &'a JwksCache,
    settings: &'a GlobalSettings,
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, ValidationError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ValidationError::Malformed(format!("{what}: {e}")))
}

/// Signature-only validation parameters: every claim check here is explicit,
/// so the crypto layer verifies nothing but the signature.
fn signature_only_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

impl<'a> TokenValidator<'a> {
    pub fn new(
        snapshot: &'a RegistrySnapshot,
        cache: &'a JwksCache,
        settings: &'a GlobalSettings,
    ) -> Self {
        Self {
            snapshot,
            cache,
            settings,
        }
    }

    /// Run the full pipeline over a compact JWS.
    pub async fn validate(&self, token: &str) -> Result<ValidatedToken, ValidationError> {
        // Step 1: size gate. Nothing is parsed past an oversize token.
        let limit = self.settings.max_token_size;
        if token.len() > limit {
            return Err(ValidationError::Oversize {
                actual: token.len(),
                limit,
            });
        }

        // Step 2: structural parse.
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(ValidationError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        }

        // Step 3: header decode.
        let header_bytes = decode_segment(segments[0], "header")?;
        let header: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| ValidationError::Malformed(format!("header: {e}")))?;
        let alg = header
            .alg
            .ok_or_else(|| ValidationError::Malformed("header missing alg".to_string()))?;

        // Step 4: algorithm gate. `none` never passes, allow-listed or not.
        if alg.eq_ignore_ascii_case("none") {
            return Err(ValidationError::AlgorithmRejected(alg));
        }
        if !self.settings.allowed_algorithms.iter().any(|a| a == &alg) {
            return Err(ValidationError::AlgorithmRejected(alg));
        }

        // Step 5: payload decode.
        let payload_bytes = decode_segment(segments[1], "payload")?;
        let payload: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&payload_bytes)
                .map_err(|e| ValidationError::Malformed(format!("payload: {e}")))?;
        let claims = TokenClaims::new(payload);
        let Some(issuer_id) = claims.issuer().map(|s| s.to_string()) else {
            return Err(ValidationError::IssuerMissing);
        };

        // Step 6: issuer match against the snapshot observed at entry.
        let Some(issuer) = self.snapshot.issuer(&issuer_id) else {
            tracing::debug!(issuer = %issuer_id, "token issuer not registered");
            return Err(ValidationError::UnknownIssuer(issuer_id));
        };
        if !issuer.config.algorithms.iter().any(|a| a == &alg) {
            return Err(ValidationError::AlgorithmRejected(alg));
        }
        let Some(algorithm) = jwk::parse_algorithm(&alg) else {
            // Allow-listed name the crypto backend cannot verify (ES512).
            return Err(ValidationError::AlgorithmRejected(format!(
                "{alg} (unsupported by verifier)"
            )));
        };

        // Step 7: key resolution.
        let key = self
            .cache
            .lookup_key(&issuer_id, header.kid.as_deref())
            .await
            .map_err(|e| match e {
                KeyLookupError::KidUnknown { kid, .. } => {
                    ValidationError::SignatureInvalid(format!("no key found for kid {kid:?}"))
                }
                KeyLookupError::KeysUnavailable { issuer } => {
                    ValidationError::KeysUnavailable(issuer)
                }
            })?;
        if !key.supports(algorithm) {
            return Err(ValidationError::SignatureInvalid(format!(
                "resolved key does not support {alg}"
            )));
        }

        // Step 8: signature verification.
        jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
            token,
            &key.decoding_key,
            &signature_only_validation(algorithm),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ValidationError::SignatureInvalid("signature mismatch".to_string())
            }
            jsonwebtoken::errors::ErrorKind::Base64(_)
            | jsonwebtoken::errors::ErrorKind::Json(_)
            | jsonwebtoken::errors::ErrorKind::Utf8(_) => {
                ValidationError::Malformed(format!("signature segment: {e}"))
            }
            other => ValidationError::Internal(format!("verifier failure: {other:?}")),
        })?;

        // Step 9: standard claim checks.
        self.check_claims(&claims, issuer)?;

        Ok(ValidatedToken {
            claims,
            issuer_id,
            algorithm: alg,
        })
    }

    fn check_claims(
        &self,
        claims: &TokenClaims,
        issuer: &IssuerEntry,
    ) -> Result<(), ValidationError> {
        let now = chrono::Utc::now().timestamp();
        let skew = self.settings.clock_skew.as_secs() as i64;

        // exp is mandatory and strict: a token expiring exactly now is gone.
        let exp = claims
            .expiration()
            .ok_or(ValidationError::MissingExpiration)?;
        if exp + skew <= now {
            return Err(ValidationError::Expired { exp });
        }

        if let Some(nbf) = claims.not_before() {
            if nbf - skew > now {
                return Err(ValidationError::NotYetValid { nbf });
            }
        }

        if let Some(iat) = claims.issued_at() {
            if iat - skew > now + ISSUED_AT_TOLERANCE_SECS {
                return Err(ValidationError::IssuedInFuture { iat });
            }
        }

        if !issuer.config.audiences.is_empty() {
            let token_audiences = claims.audiences();
            let matched = token_audiences
                .iter()
                .any(|aud| issuer.config.audiences.contains(aud));
            if !matched {
                return Err(ValidationError::AudienceMismatch);
            }
        }

        if let Some(expected) = issuer.config.client_id.as_deref() {
            if claims.client_id() != Some(expected) {
                return Err(ValidationError::ClientIdMismatch);
            }
        }

        Ok(())
    }
}
