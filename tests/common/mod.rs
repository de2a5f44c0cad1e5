// Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};

use flowauth::flow::{FlowFile, ProcessContext, ProcessSession, Processor};
use flowauth::TokenAuthenticator;

pub const SECRET: &[u8] = b"integration-test-secret";

/// Opt-in log output for test debugging (RUST_LOG=debug).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Build a JWKS document holding one symmetric key.
pub fn oct_jwks(secret: &[u8], kid: &str) -> String {
    serde_json::json!({
        "keys": [
            {"kty": "oct", "alg": "HS256", "kid": kid, "k": URL_SAFE_NO_PAD.encode(secret)}
        ]
    })
    .to_string()
}

/// Sign an HS256 token over the given claims.
pub fn hs256_token(secret: &[u8], kid: Option<&str>, claims: serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(|k| k.to_string());
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret))
        .expect("token signing failed")
}

/// Property map for a single inline-JWKS issuer named `acme`, HS256 allowed.
pub fn acme_properties(extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut props: HashMap<String, String> = [
        ("allowed-algorithms", "HS256,RS256"),
        ("issuer.acme.issuer", "acme"),
        ("issuer.acme.jwks-type", "content"),
        ("issuer.acme.audience", "prod"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    props.insert(
        "issuer.acme.jwks-content".to_string(),
        oct_jwks(SECRET, "K1"),
    );
    for (k, v) in extra {
        props.insert(k.to_string(), v.to_string());
    }
    props
}

pub fn flow_file_with_bearer(token: &str) -> FlowFile {
    let mut ff = FlowFile::new();
    ff.put_attribute("http.headers.authorization", format!("Bearer {token}"));
    ff
}

/// Run one message through the processor and return the session for routing
/// and attribute assertions.
pub async fn trigger(
    processor: &TokenAuthenticator,
    context: &ProcessContext,
    flow_file: FlowFile,
) -> ProcessSession {
    init_logging();
    let mut session = ProcessSession::with_flow_file(flow_file);
    processor
        .on_trigger(context, &mut session)
        .await
        .expect("on_trigger never fails per message");
    session
}

pub fn attr<'a>(ff: &'a FlowFile, key: &str) -> &'a str {
    ff.attribute(key)
        .unwrap_or_else(|| panic!("attribute {key} missing: {:?}", ff.attributes()))
}
