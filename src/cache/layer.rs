//! Cache manager that orchestrates caching strategies with network fetching.
//!
//! Two partitions exist per cache generation: a static partition for
//! versioned assets (no TTL, invalidated only by generation replacement)
//! and a dynamic partition for API responses (TTL-governed).

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::api::types::OfflineNotice;

use super::storage::CacheStore;
use super::traits::{classify, ApiFetch, QueryKey, RequestClass};

/// Prefix shared by every partition this application owns.
const PARTITION_PREFIX: &str = "flagwatch-";

/// Default TTL for dynamic entries: 24 hours.
const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Document served when a navigation request misses while offline.
const FALLBACK_DOCUMENT: &str = "/index.html";

/// Cache manager holding the static and dynamic partitions for the live
/// generation.
pub struct CacheManager<S: CacheStore> {
  store: Arc<S>,
  generation: String,
  max_age: Duration,
}

impl<S: CacheStore> CacheManager<S> {
  pub fn new(store: S, generation: impl Into<String>) -> Self {
    Self {
      store: Arc::new(store),
      generation: generation.into(),
      max_age: Duration::hours(DEFAULT_MAX_AGE_HOURS),
    }
  }

  /// Override the dynamic-partition TTL.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// Live cache version, e.g. `flagwatch-v1.0.0`.
  pub fn version(&self) -> String {
    format!("{}{}", PARTITION_PREFIX, self.generation)
  }

  fn static_partition(&self) -> String {
    format!("{}static-{}", PARTITION_PREFIX, self.generation)
  }

  fn dynamic_partition(&self) -> String {
    format!("{}dynamic-{}", PARTITION_PREFIX, self.generation)
  }

  /// Activate this generation: enumerate our partitions and drop every
  /// one belonging to an older generation. At most one generation of each
  /// partition survives.
  pub fn activate(&self) -> Result<()> {
    let live = [self.static_partition(), self.dynamic_partition()];
    for name in self.store.partitions()? {
      if name.starts_with(PARTITION_PREFIX) && !live.contains(&name) {
        debug!(partition = %name, "deleting old cache partition");
        self.store.drop_partition(&name)?;
      }
    }
    Ok(())
  }

  /// Drop every partition this application owns, all generations included.
  pub fn clear_all(&self) -> Result<()> {
    for name in self.store.partitions()? {
      if name.starts_with(PARTITION_PREFIX) {
        self.store.drop_partition(&name)?;
      }
    }
    Ok(())
  }

  /// Install a list of static assets up front. Failures are logged and
  /// skipped; precaching is best-effort.
  pub async fn precache<F, Fut>(&self, paths: &[String], fetch: F)
  where
    F: Fn(String) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<u8>, ApiError>>,
  {
    for path in paths {
      match self.fetch_static(path, || fetch(path.clone())).await {
        Ok(_) => debug!(path = %path, "precached static asset"),
        Err(e) => warn!(path = %path, error = %e, "failed to precache asset"),
      }
    }
  }

  /// Cache-first retrieval for static assets.
  ///
  /// Hit: return immediately. Miss: fetch, store, return. A network
  /// failure on a miss for a navigation request returns the designated
  /// fallback document instead of propagating the error.
  pub async fn fetch_static<F, Fut>(&self, path: &str, fetcher: F) -> Result<Vec<u8>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Vec<u8>, ApiError>>,
  {
    let partition = self.static_partition();

    if let Some(entry) = self.lookup(&partition, path) {
      debug!(path = %path, "serving static asset from cache");
      return Ok(entry.payload);
    }

    match fetcher().await {
      Ok(payload) => {
        self.store_entry(&partition, path, &payload);
        Ok(payload)
      }
      Err(e) => {
        let navigation = matches!(classify(path), RequestClass::Static { navigation: true });
        if navigation {
          if let Some(fallback) = self.lookup(&partition, FALLBACK_DOCUMENT) {
            debug!(path = %path, "serving fallback document for navigation request");
            return Ok(fallback.payload);
          }
        }
        Err(eyre!("Failed to fetch static asset {}: {}", path, e))
      }
    }
  }

  /// Network-first retrieval for API responses.
  ///
  /// Success replaces the prior entry for the key, stamped with the
  /// retrieval time. On network failure a cached entry within the TTL is
  /// served flagged as cached; an entry past the TTL is evicted; with
  /// nothing usable an offline notice is synthesized instead of
  /// propagating the error.
  pub async fn fetch_api<T, K, F, Fut>(&self, key: &K, fetcher: F) -> ApiFetch<T>
  where
    T: Serialize + DeserializeOwned,
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, ApiError>>,
  {
    let partition = self.dynamic_partition();
    let hash = key.cache_hash();

    match fetcher().await {
      Ok(data) => {
        match serde_json::to_vec(&data) {
          Ok(payload) => self.store_entry(&partition, &hash, &payload),
          Err(e) => warn!(query = %key.description(), error = %e, "failed to serialize response for cache"),
        }
        ApiFetch::Fresh(data)
      }
      Err(e) => {
        debug!(query = %key.description(), error = %e, "network failed, trying dynamic cache");

        if let Some(entry) = self.lookup(&partition, &hash) {
          if entry.age() <= self.max_age {
            match serde_json::from_slice(&entry.payload) {
              Ok(data) => {
                return ApiFetch::Cached {
                  data,
                  stored_at: entry.stored_at,
                };
              }
              // Malformed cached JSON is a cache miss
              Err(parse_err) => {
                warn!(query = %key.description(), error = %parse_err, "discarding unreadable cache entry");
                self.evict(&partition, &hash);
              }
            }
          } else {
            debug!(query = %key.description(), "cached response past TTL, evicting");
            self.evict(&partition, &hash);
          }
        }

        ApiFetch::Offline(OfflineNotice::new(e.user_message()))
      }
    }
  }

  /// Network-first with a simple cache fallback for everything that is
  /// neither a static asset nor an API path. No TTL enforcement.
  pub async fn fetch_other<F, Fut>(&self, path: &str, fetcher: F) -> Result<Vec<u8>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Vec<u8>, ApiError>>,
  {
    let partition = self.dynamic_partition();

    match fetcher().await {
      Ok(payload) => {
        self.store_entry(&partition, path, &payload);
        Ok(payload)
      }
      Err(e) => match self.lookup(&partition, path) {
        Some(entry) => Ok(entry.payload),
        None => Err(eyre!("Failed to fetch {}: {}", path, e)),
      },
    }
  }

  // Storage failures are recovered by treating the cache as empty; they
  // are logged, never surfaced to callers.

  fn lookup(&self, partition: &str, key: &str) -> Option<super::storage::StoredEntry> {
    match self.store.get(partition, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(partition = %partition, key = %key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store_entry(&self, partition: &str, key: &str, payload: &[u8]) {
    if let Err(e) = self.store.put(partition, key, payload) {
      warn!(partition = %partition, key = %key, error = %e, "cache store failed");
    }
  }

  fn evict(&self, partition: &str, key: &str) {
    if let Err(e) = self.store.delete(partition, key) {
      warn!(partition = %partition, key = %key, error = %e, "cache eviction failed");
    }
  }

  /// Test-only handle to the underlying store.
  #[cfg(test)]
  pub fn store(&self) -> &S {
    &self.store
  }
}

impl<S: CacheStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      generation: self.generation.clone(),
      max_age: self.max_age,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStore;
  use chrono::Utc;

  fn manager() -> CacheManager<SqliteStore> {
    CacheManager::new(SqliteStore::open_in_memory().unwrap(), "v1.0.0")
  }

  #[tokio::test]
  async fn static_assets_are_cache_first() {
    let cache = manager();

    let bytes = cache
      .fetch_static("/assets/icon-192.png", || async { Ok(b"png".to_vec()) })
      .await
      .unwrap();
    assert_eq!(bytes, b"png");

    // Second fetch must not hit the network at all
    let bytes = cache
      .fetch_static("/assets/icon-192.png", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await
      .unwrap();
    assert_eq!(bytes, b"png");
  }

  #[tokio::test]
  async fn navigation_miss_falls_back_to_document() {
    let cache = manager();
    cache
      .store()
      .put(&cache.static_partition(), "/index.html", b"<html>")
      .unwrap();

    let bytes = cache
      .fetch_static("/history.html", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await
      .unwrap();
    assert_eq!(bytes, b"<html>");

    // Non-navigation requests propagate the error
    let result = cache
      .fetch_static("/assets/flag.svg", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn api_fetch_serves_fresh_and_stores() {
    let cache = manager();

    let result: ApiFetch<String> = cache
      .fetch_api(&"/api/status", || async { Ok("payload".to_string()) })
      .await;
    assert!(result.is_fresh());

    // Cached copy within TTL is served when the network fails
    let result: ApiFetch<String> = cache
      .fetch_api(&"/api/status", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await;
    match result {
      ApiFetch::Cached { data, .. } => assert_eq!(data, "payload"),
      other => panic!("expected cached fallback, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn recent_cache_entry_beats_offline_payload() {
    let cache = manager();
    let two_hours_ago = Utc::now() - Duration::hours(2);
    cache
      .store()
      .put_at(
        &cache.dynamic_partition(),
        &"/api/status".cache_hash(),
        &serde_json::to_vec("cached").unwrap(),
        two_hours_ago,
      )
      .unwrap();

    let result: ApiFetch<String> = cache
      .fetch_api(&"/api/status", || async {
        Err(ApiError::Timeout)
      })
      .await;
    match result {
      ApiFetch::Cached { data, stored_at } => {
        assert_eq!(data, "cached");
        assert!((stored_at - two_hours_ago).num_seconds().abs() < 1);
      }
      other => panic!("expected cached fallback, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn expired_entry_is_evicted_and_offline_notice_served() {
    let cache = manager();
    let thirty_hours_ago = Utc::now() - Duration::hours(30);
    cache
      .store()
      .put_at(
        &cache.dynamic_partition(),
        &"/api/status".cache_hash(),
        &serde_json::to_vec("stale").unwrap(),
        thirty_hours_ago,
      )
      .unwrap();

    let result: ApiFetch<String> = cache
      .fetch_api(&"/api/status", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await;
    assert!(matches!(result, ApiFetch::Offline(_)));

    // The stale entry must be gone
    assert!(cache
      .store()
      .get(&cache.dynamic_partition(), &"/api/status".cache_hash())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn malformed_cached_json_is_a_miss() {
    let cache = manager();
    cache
      .store()
      .put(
        &cache.dynamic_partition(),
        &"/api/status".cache_hash(),
        b"not json",
      )
      .unwrap();

    let result: ApiFetch<String> = cache
      .fetch_api(&"/api/status", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await;
    assert!(matches!(result, ApiFetch::Offline(_)));
  }

  #[tokio::test]
  async fn activation_drops_older_generations() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.put("flagwatch-static-v0.9.0", "/", b"old").unwrap();
    store.put("flagwatch-dynamic-v0.9.0", "k", b"old").unwrap();
    store.put("unrelated-cache", "k", b"keep").unwrap();

    let cache = CacheManager::new(store, "v1.0.0");
    cache
      .store()
      .put(&cache.static_partition(), "/", b"new")
      .unwrap();

    cache.activate().unwrap();

    let mut partitions = cache.store().partitions().unwrap();
    partitions.sort();
    assert_eq!(
      partitions,
      vec!["flagwatch-static-v1.0.0".to_string(), "unrelated-cache".to_string()]
    );
  }

  #[tokio::test]
  async fn clear_all_removes_every_owned_partition() {
    let cache = manager();
    cache
      .store()
      .put(&cache.static_partition(), "/", b"a")
      .unwrap();
    cache
      .store()
      .put(&cache.dynamic_partition(), "k", b"b")
      .unwrap();
    cache.store().put("unrelated-cache", "k", b"c").unwrap();

    cache.clear_all().unwrap();

    assert_eq!(
      cache.store().partitions().unwrap(),
      vec!["unrelated-cache".to_string()]
    );
  }

  #[tokio::test]
  async fn other_paths_fall_back_without_ttl() {
    let cache = manager();
    let long_ago = Utc::now() - Duration::days(40);
    cache
      .store()
      .put_at(&cache.dynamic_partition(), "/feed.xml", b"feed", long_ago)
      .unwrap();

    let bytes = cache
      .fetch_other("/feed.xml", || async {
        Err(ApiError::Network("unreachable".into()))
      })
      .await
      .unwrap();
    assert_eq!(bytes, b"feed");
  }
}
