// Claims model
// Claims are kept as the raw JSON map so every claim can be emitted as an
// attribute; typed accessors cover the fields validation and authorization
// care about.

use serde_json::{Map, Value};

/// Parsed token payload plus typed accessors.
#[derive(Debug, Clone, Default)]
pub struct TokenClaims {
    inner: Map<String, Value>,
}

fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

impl TokenClaims {
    pub fn new(inner: Map<String, Value>) -> Self {
        Self { inner }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.inner.get("iss").and_then(Value::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.inner.get("sub").and_then(Value::as_str)
    }

    pub fn expiration(&self) -> Option<i64> {
        self.inner.get("exp").and_then(Value::as_i64)
    }

    pub fn not_before(&self) -> Option<i64> {
        self.inner.get("nbf").and_then(Value::as_i64)
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.inner.get("iat").and_then(Value::as_i64)
    }

    /// The `aud` claim, normalized: a bare string or an array of strings.
    pub fn audiences(&self) -> Vec<String> {
        self.inner
            .get("aud")
            .map(value_to_strings)
            .unwrap_or_default()
    }

    /// Scopes from `scope` (space-separated string) or `scp` (array).
    pub fn scopes(&self) -> Vec<String> {
        if let Some(Value::String(s)) = self.inner.get("scope") {
            return s.split_whitespace().map(|s| s.to_string()).collect();
        }
        if let Some(value) = self.inner.get("scp") {
            return value_to_strings(value);
        }
        Vec::new()
    }

    pub fn roles(&self) -> Vec<String> {
        self.inner
            .get("roles")
            .map(value_to_strings)
            .unwrap_or_default()
    }

    pub fn groups(&self) -> Vec<String> {
        self.inner
            .get("groups")
            .map(value_to_strings)
            .unwrap_or_default()
    }

    /// The authorized-party binding: `azp`, falling back to `client_id`.
    pub fn client_id(&self) -> Option<&str> {
        self.inner
            .get("azp")
            .or_else(|| self.inner.get("client_id"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(json: &str) -> TokenClaims {
        TokenClaims::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_audience_string_or_array() {
        let single = claims(r#"{"aud": "prod"}"#);
        assert_eq!(single.audiences(), vec!["prod"]);

        let multi = claims(r#"{"aud": ["prod", "staging"]}"#);
        assert_eq!(multi.audiences(), vec!["prod", "staging"]);

        let none = claims(r#"{}"#);
        assert!(none.audiences().is_empty());
    }

    #[test]
    fn test_scope_string_and_scp_array() {
        let scope = claims(r#"{"scope": "read write admin"}"#);
        assert_eq!(scope.scopes(), vec!["read", "write", "admin"]);

        let scp = claims(r#"{"scp": ["read", "write"]}"#);
        assert_eq!(scp.scopes(), vec!["read", "write"]);

        // scope wins when both are present
        let both = claims(r#"{"scope": "a", "scp": ["b"]}"#);
        assert_eq!(both.scopes(), vec!["a"]);
    }

    #[test]
    fn test_client_id_fallback() {
        let azp = claims(r#"{"azp": "cli-1", "client_id": "cli-2"}"#);
        assert_eq!(azp.client_id(), Some("cli-1"));

        let client_id = claims(r#"{"client_id": "cli-2"}"#);
        assert_eq!(client_id.client_id(), Some("cli-2"));
    }

    #[test]
    fn test_time_claims() {
        let c = claims(r#"{"exp": 100, "nbf": 50, "iat": 40}"#);
        assert_eq!(c.expiration(), Some(100));
        assert_eq!(c.not_before(), Some(50));
        assert_eq!(c.issued_at(), Some(40));
    }
}
