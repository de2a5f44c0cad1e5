// Verification-key machinery
// JWK/JWKS data structures, the three JWKS source kinds, and the per-issuer
// cache with refresh, staleness and single-flight fetch.

pub mod cache;
pub mod jwk;
pub mod source;

pub use cache::{JwksCache, JwksCacheConfig, KeyLookupError};
pub use jwk::{JsonWebKey, JsonWebKeySet, JwkError, VerificationKey};
pub use source::{FetchedDocument, JwksSource, SourceError};
