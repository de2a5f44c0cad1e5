// JWKS document sources
// Responsibilities:
// - Retrieve a raw JWKS document from a remote URL, a local file or inline content
// - Classify retrieval failures (network, not-found, forbidden, malformed, timeout, protocol)
// - Support conditional fetches via ETag or content hash

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::jwk::JsonWebKeySet;
use crate::config::JwksSourceConfig;

/// JWKS retrieval error types
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("JWKS endpoint not found: {0}")]
    NotFound(String),

    #[error("JWKS endpoint denied access: {0}")]
    Forbidden(String),

    #[error("malformed JWKS document: {0}")]
    Malformed(String),

    #[error("timeout fetching {0}")]
    Timeout(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A freshly retrieved and parsed JWKS document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub document: JsonWebKeySet,
    /// SHA-256 of the raw bytes, used for change detection.
    pub hash: String,
    /// ETag returned by the endpoint, when any.
    pub etag: Option<String>,
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_document(bytes: &[u8]) -> Result<JsonWebKeySet, SourceError> {
    let set: JsonWebKeySet =
        serde_json::from_slice(bytes).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if set.keys.is_empty() {
        return Err(SourceError::Malformed("empty keys array".to_string()));
    }
    Ok(set)
}

/// One configured JWKS source. Stateless: liveness and rate limiting live in
/// the cache.
#[derive(Debug, Clone)]
pub enum JwksSource {
    Url {
        url: String,
        require_https: bool,
        timeout: Duration,
    },
    File {
        path: PathBuf,
    },
    Inline {
        json: String,
        hash: String,
    },
}

impl JwksSource {
    pub fn from_config(config: &JwksSourceConfig) -> Self {
        match config {
            JwksSourceConfig::Url {
                url,
                connect_timeout,
                require_https,
                ..
            } => Self::Url {
                url: url.clone(),
                require_https: *require_https,
                timeout: *connect_timeout,
            },
            JwksSourceConfig::File { path } => Self::File { path: path.clone() },
            JwksSourceConfig::Inline { json } => Self::Inline {
                hash: content_hash(json.as_bytes()),
                json: json.clone(),
            },
        }
    }

    /// Fetch the document. Returns `Ok(None)` when the content is unchanged
    /// relative to `previous_etag`/`previous_hash`.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        previous_etag: Option<&str>,
        previous_hash: Option<&str>,
    ) -> Result<Option<FetchedDocument>, SourceError> {
        match self {
            Self::Url {
                url,
                require_https,
                timeout,
            } => {
                if *require_https && !url.starts_with("https://") {
                    return Err(SourceError::Protocol(format!(
                        "https required for JWKS url {url}"
                    )));
                }

                let mut request = client.get(url).timeout(*timeout);
                if let Some(etag) = previous_etag {
                    request = request.header(reqwest::header::IF_NONE_MATCH, etag);
                }

                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        SourceError::Timeout(url.clone())
                    } else {
                        SourceError::Network {
                            url: url.clone(),
                            reason: e.to_string(),
                        }
                    }
                })?;

                let status = response.status();
                if status == reqwest::StatusCode::NOT_MODIFIED {
                    tracing::debug!(url = %url, "JWKS unchanged (304)");
                    return Ok(None);
                }
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(SourceError::NotFound(url.clone()));
                }
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(SourceError::Forbidden(url.clone()));
                }
                if !status.is_success() {
                    return Err(SourceError::Network {
                        url: url.clone(),
                        reason: format!("HTTP {status}"),
                    });
                }

                let etag = response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string());

                let body = response.bytes().await.map_err(|e| SourceError::Network {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

                let hash = content_hash(&body);
                if previous_hash == Some(hash.as_str()) {
                    tracing::debug!(url = %url, "JWKS unchanged (hash)");
                    return Ok(None);
                }

                Ok(Some(FetchedDocument {
                    document: parse_document(&body)?,
                    hash,
                    etag,
                }))
            }

            Self::File { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|e| SourceError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let hash = content_hash(&bytes);
                if previous_hash == Some(hash.as_str()) {
                    return Ok(None);
                }
                Ok(Some(FetchedDocument {
                    document: parse_document(&bytes)?,
                    hash,
                    etag: None,
                }))
            }

            Self::Inline { json, hash } => {
                if previous_hash == Some(hash.as_str()) {
                    return Ok(None);
                }
                Ok(Some(FetchedDocument {
                    document: parse_document(json.as_bytes())?,
                    hash: hash.clone(),
                    etag: None,
                }))
            }
        }
    }

    /// Identity used to decide whether a reconfigure changed the source.
    pub fn descriptor(&self) -> String {
        match self {
            Self::Url { url, .. } => format!("url:{url}"),
            Self::File { path } => format!("file:{}", path.display()),
            Self::Inline { hash, .. } => format!("inline:{hash}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_source_parses_once_then_reports_unchanged() {
        let json = r#"{"keys":[{"kid":"k1","kty":"oct","alg":"HS256","k":"c2VjcmV0"}]}"#;
        let source = JwksSource::from_config(&JwksSourceConfig::Inline {
            json: json.to_string(),
        });
        let client = reqwest::Client::new();

        let first = source.fetch(&client, None, None).await.unwrap().unwrap();
        assert_eq!(first.document.keys.len(), 1);

        let second = source
            .fetch(&client, None, Some(first.hash.as_str()))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_inline_malformed() {
        let source = JwksSource::from_config(&JwksSourceConfig::Inline {
            json: "{\"keys\": []}".to_string(),
        });
        let client = reqwest::Client::new();
        assert!(matches!(
            source.fetch(&client, None, None).await,
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_https_enforcement() {
        let source = JwksSource::Url {
            url: "http://insecure.example/jwks.json".to_string(),
            require_https: true,
            timeout: Duration::from_secs(1),
        };
        let client = reqwest::Client::new();
        assert!(matches!(
            source.fetch(&client, None, None).await,
            Err(SourceError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_change_detection() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"keys":[{{"kid":"k1","kty":"oct","alg":"HS256","k":"c2VjcmV0"}}]}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let source = JwksSource::File {
            path: file.path().to_path_buf(),
        };
        let client = reqwest::Client::new();

        let first = source.fetch(&client, None, None).await.unwrap().unwrap();
        let unchanged = source
            .fetch(&client, None, Some(first.hash.as_str()))
            .await
            .unwrap();
        assert!(unchanged.is_none());
    }
}
