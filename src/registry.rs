// Issuer registry
// An immutable snapshot of trusted issuers behind an atomically replaceable
// pointer. Readers load the pointer once per message; rebuilds are serialized
// behind a dedicated lock and never expose a torn or empty intermediate view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{
    configuration_fingerprint, parse_issuers, AuthorizationPolicy, ConfigError, GlobalSettings,
    IssuerConfig,
};
use crate::keys::{JwksCache, JwksSource};

/// One registered issuer plus its optional authorization policy.
#[derive(Debug, Clone)]
pub struct IssuerEntry {
    pub config: IssuerConfig,
    pub authorization: Option<AuthorizationPolicy>,
}

/// Immutable registry view. Exactly one snapshot is observed per message.
#[derive(Debug)]
pub struct RegistrySnapshot {
    issuers: HashMap<String, IssuerEntry>,
    fingerprint: String,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            issuers: HashMap::new(),
            fingerprint: String::new(),
        }
    }

    pub fn issuer(&self, issuer_id: &str) -> Option<&IssuerEntry> {
        self.issuers.get(issuer_id)
    }

    pub fn issuer_ids(&self) -> HashSet<String> {
        self.issuers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Holder of the current snapshot. The only mutations are replace-snapshot
/// and observe-snapshot.
pub struct IssuerRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl IssuerRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Observe the current snapshot. Lock-free; callers hold the returned
    /// reference for the duration of one message.
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Cheap per-message change check against an externally computed
    /// fingerprint.
    pub fn fingerprint_matches(&self, fingerprint: &str) -> bool {
        self.snapshot.load().fingerprint == fingerprint
    }

    /// Reset to the empty snapshot (stop path).
    pub fn reset(&self) {
        self.snapshot.store(Arc::new(RegistrySnapshot::empty()));
    }

    /// Rebuild from the merged property map if its fingerprint differs from
    /// the installed snapshot.
    ///
    /// Returns `Ok(true)` when a new snapshot was installed, `Ok(false)` when
    /// nothing changed or another rebuild is already in flight. A failed
    /// rebuild leaves the previous snapshot serving.
    ///
    /// Ordering: the new snapshot is stored first, then cache invalidations
    /// run under the cache's own locks. The rebuild lock never waits on a
    /// per-entry fetch gate.
    pub async fn rebuild_if_changed(
        &self,
        props: &HashMap<String, String>,
        settings: &GlobalSettings,
        cache: &JwksCache,
    ) -> Result<bool, ConfigError> {
        let fingerprint = configuration_fingerprint(props);
        if self.fingerprint_matches(&fingerprint) {
            return Ok(false);
        }

        // Only one rebuild proceeds at a time; contenders keep serving the
        // old snapshot rather than queueing.
        let Ok(_rebuild) = self.rebuild_lock.try_lock() else {
            return Ok(false);
        };

        // Re-check under the lock: the winner of a previous race may have
        // installed this exact configuration already.
        if self.fingerprint_matches(&fingerprint) {
            return Ok(false);
        }

        let entries = parse_issuers(props, settings)?;
        if entries.is_empty() && settings.require_valid_token {
            // Refuse to install an empty registry out from under live
            // traffic; the old snapshot remains.
            return Err(ConfigError::NoIssuers);
        }

        let snapshot = build_snapshot(entries, fingerprint);
        let issuer_ids = snapshot.issuer_ids();
        tracing::info!(
            issuers = snapshot.len(),
            fingerprint = %snapshot.fingerprint,
            "issuer registry rebuilt"
        );

        install_sources(&snapshot, settings, cache);
        self.snapshot.store(Arc::new(snapshot));
        cache.retain_issuers(&issuer_ids);
        Ok(true)
    }
}

impl Default for IssuerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_snapshot(
    entries: Vec<(IssuerConfig, Option<AuthorizationPolicy>)>,
    fingerprint: String,
) -> RegistrySnapshot {
    let issuers = entries
        .into_iter()
        .map(|(config, authorization)| {
            (
                config.issuer.clone(),
                IssuerEntry {
                    config,
                    authorization,
                },
            )
        })
        .collect();
    RegistrySnapshot {
        issuers,
        fingerprint,
    }
}

fn install_sources(snapshot: &RegistrySnapshot, settings: &GlobalSettings, cache: &JwksCache) {
    for entry in snapshot.issuers.values() {
        // Url sources carry their own refresh interval; file and inline
        // sources follow the global cadence.
        let refresh_interval = match &entry.config.jwks_source {
            crate::config::JwksSourceConfig::Url {
                refresh_interval, ..
            } => *refresh_interval,
            _ => settings.refresh_interval,
        };
        cache.install_issuer(
            &entry.config.issuer,
            JwksSource::from_config(&entry.config.jwks_source),
            refresh_interval,
        );
    }
}

/// Build and install the initial snapshot at scheduling time. Unlike the
/// per-message path this propagates configuration errors to the host.
pub fn install_initial_snapshot(
    registry: &IssuerRegistry,
    props: &HashMap<String, String>,
    settings: &GlobalSettings,
    cache: &JwksCache,
) -> Result<(), ConfigError> {
    let entries = parse_issuers(props, settings)?;
    if entries.is_empty() && settings.require_valid_token {
        return Err(ConfigError::NoIssuers);
    }
    let snapshot = build_snapshot(entries, configuration_fingerprint(props));
    let issuer_ids = snapshot.issuer_ids();
    install_sources(&snapshot, settings, cache);
    registry.snapshot.store(Arc::new(snapshot));
    cache.retain_issuers(&issuer_ids);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::JwksCacheConfig;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn settings(props: &HashMap<String, String>) -> GlobalSettings {
        GlobalSettings::parse(props).unwrap()
    }

    fn cache() -> JwksCache {
        JwksCache::new(reqwest::Client::new(), JwksCacheConfig::default())
    }

    fn acme_props() -> HashMap<String, String> {
        props(&[
            ("issuer.acme.issuer", "acme"),
            ("issuer.acme.jwks-type", "content"),
            (
                "issuer.acme.jwks-content",
                r#"{"keys":[{"kid":"k1","kty":"oct","alg":"HS256","k":"c2VjcmV0"}]}"#,
            ),
        ])
    }

    #[tokio::test]
    async fn test_rebuild_installs_snapshot() {
        let registry = IssuerRegistry::new();
        let p = acme_props();
        let s = settings(&p);
        let cache = cache();

        let changed = registry.rebuild_if_changed(&p, &s, &cache).await.unwrap();
        assert!(changed);
        assert!(registry.current().issuer("acme").is_some());
        assert!(cache.contains_issuer("acme"));

        // Same configuration again: no change.
        let changed = registry.rebuild_if_changed(&p, &s, &cache).await.unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_old_snapshot() {
        let registry = IssuerRegistry::new();
        let p = acme_props();
        let s = settings(&p);
        let cache = cache();
        registry.rebuild_if_changed(&p, &s, &cache).await.unwrap();

        // Empty configuration with require-valid-token: rebuild refused.
        let empty = props(&[]);
        let err = registry
            .rebuild_if_changed(&empty, &settings(&empty), &cache)
            .await;
        assert!(matches!(err, Err(ConfigError::NoIssuers)));
        assert!(registry.current().issuer("acme").is_some());
    }

    #[tokio::test]
    async fn test_removed_issuer_evicted_from_cache() {
        let registry = IssuerRegistry::new();
        let p = acme_props();
        let s = settings(&p);
        let cache = cache();
        registry.rebuild_if_changed(&p, &s, &cache).await.unwrap();
        assert!(cache.contains_issuer("acme"));

        let p2 = props(&[
            ("issuer.beta.issuer", "beta"),
            ("issuer.beta.jwks-type", "content"),
            (
                "issuer.beta.jwks-content",
                r#"{"keys":[{"kid":"k2","kty":"oct","alg":"HS256","k":"c2VjcmV0"}]}"#,
            ),
        ]);
        registry
            .rebuild_if_changed(&p2, &settings(&p2), &cache)
            .await
            .unwrap();

        assert!(registry.current().issuer("acme").is_none());
        assert!(registry.current().issuer("beta").is_some());
        assert!(!cache.contains_issuer("acme"));
        assert!(cache.contains_issuer("beta"));
    }

    #[tokio::test]
    async fn test_empty_allowed_when_token_optional() {
        let registry = IssuerRegistry::new();
        let p = props(&[("require-valid-token", "false")]);
        let s = settings(&p);
        let cache = cache();

        let changed = registry.rebuild_if_changed(&p, &s, &cache).await.unwrap();
        assert!(changed);
        assert!(registry.current().is_empty());
    }
}
