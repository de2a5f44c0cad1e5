// JWKS cache behavior against a mock endpoint: caching, single-flight,
// stale-grace serving and kid-miss triggered rotation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{oct_jwks, SECRET};
use flowauth::keys::{JwksCache, JwksCacheConfig, JwksSource, KeyLookupError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn url_source(server: &MockServer) -> JwksSource {
    JwksSource::Url {
        url: format!("{}/jwks.json", server.uri()),
        require_https: false,
        timeout: Duration::from_secs(2),
    }
}

fn cache_with(config: JwksCacheConfig) -> JwksCache {
    JwksCache::new(reqwest::Client::new(), config)
}

fn jwks_response(kid: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_raw(oct_jwks(SECRET, kid), "application/json")
}

#[tokio::test]
async fn lookups_within_refresh_interval_hit_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K1"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache_with(JwksCacheConfig::default());
    cache.install_issuer("acme", url_source(&server), Duration::from_secs(300));

    for _ in 0..5 {
        let key = cache.lookup_key("acme", Some("K1")).await.unwrap();
        assert_eq!(key.kid.as_deref(), Some("K1"));
    }
}

#[tokio::test]
async fn concurrent_cold_lookups_issue_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K1").set_delay(Duration::from_millis(150)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(cache_with(JwksCacheConfig::default()));
    cache.install_issuer("acme", url_source(&server), Duration::from_secs(300));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.lookup_key("acme", Some("K1")).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn stale_entry_serves_through_grace_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // refresh 200ms, grace 2x = 400ms past freshness
    let cache = cache_with(JwksCacheConfig {
        stale_grace_factor: 2,
        kid_miss_min_interval: Duration::from_secs(10),
    });
    cache.install_issuer("acme", url_source(&server), Duration::from_millis(200));

    assert!(cache.lookup_key("acme", Some("K1")).await.is_ok());

    // Stale but within grace: the failing refresh is absorbed and the
    // previous keys keep serving.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.lookup_key("acme", Some("K1")).await.is_ok());

    // Past the grace window the entry is failing.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(matches!(
        cache.lookup_key("acme", Some("K1")).await,
        Err(KeyLookupError::KeysUnavailable { .. })
    ));
}

#[tokio::test]
async fn kid_miss_forces_refresh_on_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K2"))
        .mount(&server)
        .await;

    let cache = cache_with(JwksCacheConfig {
        stale_grace_factor: 2,
        kid_miss_min_interval: Duration::ZERO,
    });
    cache.install_issuer("acme", url_source(&server), Duration::from_secs(300));

    assert!(cache.lookup_key("acme", Some("K1")).await.is_ok());

    // Upstream rotated to K2; the kid miss forces an immediate refresh well
    // before the scheduled one.
    let rotated = cache.lookup_key("acme", Some("K2")).await.unwrap();
    assert_eq!(rotated.kid.as_deref(), Some("K2"));
}

#[tokio::test]
async fn kid_miss_refresh_is_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(jwks_response("K1"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache_with(JwksCacheConfig {
        stale_grace_factor: 2,
        kid_miss_min_interval: Duration::from_secs(10),
    });
    cache.install_issuer("acme", url_source(&server), Duration::from_secs(300));

    assert!(cache.lookup_key("acme", Some("K1")).await.is_ok());

    // Within the minimum inter-refresh interval a kid miss reports unknown
    // without another fetch (the expect(1) above verifies on drop).
    assert!(matches!(
        cache.lookup_key("acme", Some("K9")).await,
        Err(KeyLookupError::KidUnknown { .. })
    ));
}

#[tokio::test]
async fn failing_endpoint_with_no_previous_keys_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = cache_with(JwksCacheConfig::default());
    cache.install_issuer("acme", url_source(&server), Duration::from_secs(300));

    assert!(matches!(
        cache.lookup_key("acme", Some("K1")).await,
        Err(KeyLookupError::KeysUnavailable { .. })
    ));
}
