// Per-issuer JWKS cache
// Responsibilities:
// - Hold at most one live key set per issuer
// - Refresh on schedule; serve stale keys through a bounded grace window
// - Serialize concurrent fetches per issuer (single-flight)
// - Force an early refresh on kid misses, throttled per issuer

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use super::jwk::{build_key_map, VerificationKey};
use super::source::JwksSource;

/// Key lookup failure modes
#[derive(Error, Debug)]
pub enum KeyLookupError {
    #[error("no key matches kid {kid:?} for issuer {issuer}")]
    KidUnknown { issuer: String, kid: Option<String> },

    #[error("verification keys unavailable for issuer {issuer}")]
    KeysUnavailable { issuer: String },
}

/// Cache-wide tuning knobs. Per-issuer refresh intervals arrive at install
/// time.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// Grace window multiplier: stale keys keep serving for
    /// `stale_grace_factor * refresh_interval` past freshness.
    pub stale_grace_factor: u32,
    /// Minimum spacing between kid-miss forced refreshes per issuer.
    pub kid_miss_min_interval: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            stale_grace_factor: 2,
            kid_miss_min_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct EntryState {
    keys: Option<Arc<HashMap<String, VerificationKey>>>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
    etag: Option<String>,
    hash: Option<String>,
}

#[derive(Debug)]
struct CacheEntry {
    source: JwksSource,
    refresh_interval: Duration,
    stale_grace: Duration,
    state: RwLock<EntryState>,
    /// Single-flight gate: at most one in-flight fetch per issuer. Waiters
    /// re-read the refreshed state instead of fetching again.
    fetch_gate: tokio::sync::Mutex<()>,
}

impl CacheEntry {
    fn read_state<T>(&self, f: impl FnOnce(&EntryState) -> T) -> T {
        let guard = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut EntryState) -> T) -> T {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn is_fresh(&self) -> bool {
        self.read_state(|s| match (s.keys.as_ref(), s.fetched_at) {
            (Some(_), Some(at)) => at.elapsed() < self.refresh_interval,
            _ => false,
        })
    }

    /// Whether the previously fetched keys are still inside the serving
    /// window (fresh or within the stale grace period).
    fn within_grace(&self) -> bool {
        self.read_state(|s| match (s.keys.as_ref(), s.fetched_at) {
            (Some(_), Some(at)) => at.elapsed() < self.refresh_interval + self.stale_grace,
            _ => false,
        })
    }

    fn attempt_allowed(&self, min_interval: Duration) -> bool {
        self.read_state(|s| match s.last_attempt {
            Some(at) => at.elapsed() >= min_interval,
            None => true,
        })
    }
}

fn resolve_key(
    keys: &HashMap<String, VerificationKey>,
    kid: Option<&str>,
) -> Option<VerificationKey> {
    match kid {
        Some(kid) => keys.get(kid).cloned(),
        // No kid in the header: unambiguous only when the set has one key.
        None => {
            if keys.len() == 1 {
                keys.values().next().cloned()
            } else {
                None
            }
        }
    }
}

/// Per-issuer cached JWKS with refresh policy and single-flight fetch.
pub struct JwksCache {
    client: reqwest::Client,
    entries: DashMap<String, Arc<CacheEntry>>,
    config: JwksCacheConfig,
}

impl JwksCache {
    pub fn new(client: reqwest::Client, config: JwksCacheConfig) -> Self {
        Self {
            client,
            entries: DashMap::new(),
            config,
        }
    }

    /// Register (or re-register) an issuer's source. An unchanged source
    /// keeps its cached keys across reconfigurations.
    pub fn install_issuer(
        &self,
        issuer_id: &str,
        source: JwksSource,
        refresh_interval: Duration,
    ) {
        if let Some(existing) = self.entries.get(issuer_id) {
            if existing.source.descriptor() == source.descriptor()
                && existing.refresh_interval == refresh_interval
            {
                return;
            }
        }
        let stale_grace = refresh_interval * self.config.stale_grace_factor;
        tracing::debug!(issuer = issuer_id, source = %source.descriptor(), "installing JWKS source");
        self.entries.insert(
            issuer_id.to_string(),
            Arc::new(CacheEntry {
                source,
                refresh_interval,
                stale_grace,
                state: RwLock::new(EntryState::default()),
                fetch_gate: tokio::sync::Mutex::new(()),
            }),
        );
    }

    /// Drop entries for issuers no longer present in the registry. A removed
    /// issuer's keys must not satisfy any subsequent verification.
    pub fn retain_issuers(&self, live: &HashSet<String>) {
        self.entries.retain(|issuer, _| {
            let keep = live.contains(issuer);
            if !keep {
                tracing::info!(issuer = issuer.as_str(), "evicting JWKS for removed issuer");
            }
            keep
        });
    }

    pub fn contains_issuer(&self, issuer_id: &str) -> bool {
        self.entries.contains_key(issuer_id)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Resolve the verification key for `(issuer, kid)`.
    pub async fn lookup_key(
        &self,
        issuer_id: &str,
        kid: Option<&str>,
    ) -> Result<VerificationKey, KeyLookupError> {
        let Some(entry) = self.entries.get(issuer_id).map(|e| Arc::clone(e.value())) else {
            return Err(KeyLookupError::KeysUnavailable {
                issuer: issuer_id.to_string(),
            });
        };

        // Fast path: fresh keys, resolvable kid.
        if entry.is_fresh() {
            let resolved = entry.read_state(|s| s.keys.as_ref().and_then(|k| resolve_key(k, kid)));
            if let Some(key) = resolved {
                return Ok(key);
            }
            // A kid miss against fresh keys may mean upstream rotation; force
            // an early refresh, throttled. A missing kid with an ambiguous
            // set cannot be helped by refreshing.
            let refreshable =
                kid.is_some() && entry.attempt_allowed(self.config.kid_miss_min_interval);
            if !refreshable {
                return Err(KeyLookupError::KidUnknown {
                    issuer: issuer_id.to_string(),
                    kid: kid.map(|k| k.to_string()),
                });
            }
            tracing::debug!(issuer = issuer_id, kid = ?kid, "kid miss, forcing JWKS refresh");
            self.refresh_entry(issuer_id, &entry, true).await;
        } else {
            self.refresh_entry(issuer_id, &entry, false).await;
        }

        let resolved = entry.read_state(|s| s.keys.as_ref().map(|k| resolve_key(k, kid)));
        match resolved {
            Some(Some(key)) if entry.within_grace() => Ok(key),
            Some(None) if entry.within_grace() => Err(KeyLookupError::KidUnknown {
                issuer: issuer_id.to_string(),
                kid: kid.map(|k| k.to_string()),
            }),
            // Past the grace window (or never fetched) the entry is failing.
            _ => Err(KeyLookupError::KeysUnavailable {
                issuer: issuer_id.to_string(),
            }),
        }
    }

    /// Refresh one entry under its single-flight gate. `forced` bypasses the
    /// freshness double-check (kid-miss path) but still honors the per-issuer
    /// attempt throttle.
    async fn refresh_entry(&self, issuer_id: &str, entry: &Arc<CacheEntry>, forced: bool) {
        let _flight = entry.fetch_gate.lock().await;

        // Another flight may have completed while this one waited.
        if !forced && entry.is_fresh() {
            return;
        }
        if forced && !entry.attempt_allowed(self.config.kid_miss_min_interval) {
            return;
        }

        entry.write_state(|s| s.last_attempt = Some(Instant::now()));
        let (etag, hash) = entry.read_state(|s| (s.etag.clone(), s.hash.clone()));

        match entry
            .source
            .fetch(&self.client, etag.as_deref(), hash.as_deref())
            .await
        {
            Ok(Some(document)) => {
                let keys = build_key_map(&document.document);
                tracing::info!(
                    issuer = issuer_id,
                    keys = keys.len(),
                    "JWKS refreshed"
                );
                entry.write_state(|s| {
                    s.keys = Some(Arc::new(keys));
                    s.fetched_at = Some(Instant::now());
                    s.etag = document.etag;
                    s.hash = Some(document.hash);
                });
            }
            Ok(None) => {
                // Content unchanged; the entry is fresh again.
                tracing::debug!(issuer = issuer_id, "JWKS unchanged on refresh");
                entry.write_state(|s| s.fetched_at = Some(Instant::now()));
            }
            Err(e) => {
                // Transient: absorbed here. Previous keys keep serving until
                // the grace window closes; the message never sees this.
                tracing::warn!(
                    issuer = issuer_id,
                    error = %e,
                    "JWKS refresh failed, serving previous keys within grace"
                );
            }
        }
    }

    /// Proactively refresh entries whose freshness has lapsed. Driven by the
    /// background refresh task between messages.
    pub async fn refresh_due(&self) {
        let due: Vec<(String, Arc<CacheEntry>)> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_fresh())
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (issuer_id, entry) in due {
            self.refresh_entry(&issuer_id, &entry, false).await;
        }
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("issuers", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwksSourceConfig;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn inline_source(secret: &[u8], kid: &str) -> JwksSource {
        let json = serde_json::json!({
            "keys": [
                {"kty": "oct", "alg": "HS256", "kid": kid, "k": URL_SAFE_NO_PAD.encode(secret)}
            ]
        })
        .to_string();
        JwksSource::from_config(&JwksSourceConfig::Inline { json })
    }

    fn cache() -> JwksCache {
        JwksCache::new(reqwest::Client::new(), JwksCacheConfig::default())
    }

    #[tokio::test]
    async fn test_cold_lookup_populates_entry() {
        let cache = cache();
        cache.install_issuer("acme", inline_source(b"secret", "k1"), Duration::from_secs(300));

        let key = cache.lookup_key("acme", Some("k1")).await.unwrap();
        assert_eq!(key.kid.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_unknown_issuer_is_unavailable() {
        let cache = cache();
        assert!(matches!(
            cache.lookup_key("ghost", Some("k1")).await,
            Err(KeyLookupError::KeysUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_kid_miss_reports_unknown() {
        let cache = cache();
        cache.install_issuer("acme", inline_source(b"secret", "k1"), Duration::from_secs(300));

        assert!(matches!(
            cache.lookup_key("acme", Some("other")).await,
            Err(KeyLookupError::KidUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_kid_single_key_fallback() {
        let cache = cache();
        cache.install_issuer("acme", inline_source(b"secret", "k1"), Duration::from_secs(300));

        let key = cache.lookup_key("acme", None).await.unwrap();
        assert_eq!(key.kid.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_removed_issuer_stops_serving() {
        let cache = cache();
        cache.install_issuer("acme", inline_source(b"secret", "k1"), Duration::from_secs(300));
        cache.lookup_key("acme", Some("k1")).await.unwrap();

        cache.retain_issuers(&HashSet::from(["beta".to_string()]));
        assert!(!cache.contains_issuer("acme"));
        assert!(matches!(
            cache.lookup_key("acme", Some("k1")).await,
            Err(KeyLookupError::KeysUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_reinstall_same_source_keeps_entry() {
        let cache = cache();
        let source = inline_source(b"secret", "k1");
        cache.install_issuer("acme", source.clone(), Duration::from_secs(300));
        cache.lookup_key("acme", Some("k1")).await.unwrap();

        cache.install_issuer("acme", source, Duration::from_secs(300));
        // Entry survived reinstall with identical source; still fresh.
        let entry = cache.entries.get("acme").unwrap();
        assert!(entry.is_fresh());
    }
}
