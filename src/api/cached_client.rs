//! Cached status client that wraps StatusClient with the offline cache.

use color_eyre::Result;
use std::sync::Arc;

use crate::cache::{classify, ApiFetch, CacheManager, CacheStore, RequestClass};
use crate::config::Config;

use super::cache::StatusQueryKey;
use super::client::StatusClient;
use super::error::ApiError;
use super::types::{FlagStatus, HistoryPage};

/// Status client with transparent offline caching.
///
/// API reads go network-first through the dynamic cache partition; write
/// operations pass through uncached.
pub struct CachedStatusClient<S: CacheStore> {
  inner: StatusClient,
  cache: Arc<CacheManager<S>>,
}

impl<S: CacheStore> CachedStatusClient<S> {
  pub fn new(config: &Config, cache: Arc<CacheManager<S>>) -> Result<Self> {
    let inner = StatusClient::new(config)?;
    Ok(Self { inner, cache })
  }

  /// Wrap an existing client, for tests.
  pub fn with_client(inner: StatusClient, cache: Arc<CacheManager<S>>) -> Self {
    Self { inner, cache }
  }

  /// Current flag status, falling back to the dynamic cache when offline.
  pub async fn get_status(&self) -> ApiFetch<FlagStatus> {
    self
      .cache
      .fetch_api(&StatusQueryKey::CurrentStatus, || {
        let inner = self.inner.clone();
        async move { inner.get_status().await }
      })
      .await
  }

  /// One page of history, falling back to the dynamic cache when offline.
  pub async fn get_history(&self, page: u32, per_page: u32) -> ApiFetch<HistoryPage> {
    self
      .cache
      .fetch_api(&StatusQueryKey::History { page, per_page }, || {
        let inner = self.inner.clone();
        async move { inner.get_history(page, per_page).await }
      })
      .await
  }

  /// Register a push subscription (not cached - write operation).
  pub async fn subscribe(&self, token: &str) -> std::result::Result<(), ApiError> {
    self.inner.subscribe(token).await
  }

  /// Revoke a push subscription (not cached - write operation).
  pub async fn revoke(&self, token: &str) -> std::result::Result<(), ApiError> {
    self.inner.revoke(token).await
  }

  /// Fetch an asset relative to the feed origin: cache-first for static
  /// paths, network-first with a plain cache fallback for anything else.
  pub async fn get_asset(&self, path: &str) -> Result<Vec<u8>> {
    let fetch = || {
      let inner = self.inner.clone();
      let path = path.to_string();
      async move { inner.get_asset(&path).await }
    };

    match classify(path) {
      RequestClass::Static { .. } => self.cache.fetch_static(path, fetch).await,
      RequestClass::Api | RequestClass::Other => self.cache.fetch_other(path, fetch).await,
    }
  }

  /// Install the configured static assets into the cache.
  pub async fn precache(&self, assets: &[String]) {
    let inner = self.inner.clone();
    self
      .cache
      .precache(assets, move |path| {
        let inner = inner.clone();
        async move { inner.get_asset(&path).await }
      })
      .await;
  }
}

impl<S: CacheStore> Clone for CachedStatusClient<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      cache: Arc::clone(&self.cache),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;

  /// Client whose endpoint refuses connections, so every network attempt
  /// fails immediately.
  fn unreachable_client() -> CachedStatusClient<SqliteStore> {
    let config = Config::from_status_url("http://127.0.0.1:9/api/status".to_string());
    let cache = Arc::new(CacheManager::new(
      SqliteStore::open_in_memory().unwrap(),
      "v1.0.0",
    ));
    CachedStatusClient::new(&config, cache).unwrap()
  }

  #[tokio::test]
  async fn static_assets_are_served_from_cache_without_network() {
    let client = unreachable_client();
    client
      .cache
      .store()
      .put("flagwatch-static-v1.0.0", "/assets/flag.svg", b"<svg>")
      .unwrap();

    let bytes = client.get_asset("/assets/flag.svg").await.unwrap();
    assert_eq!(bytes, b"<svg>");
  }

  #[tokio::test]
  async fn unclassified_paths_fall_back_to_dynamic_cache() {
    let client = unreachable_client();
    client
      .cache
      .store()
      .put("flagwatch-dynamic-v1.0.0", "/feed.xml", b"feed")
      .unwrap();

    let bytes = client.get_asset("/feed.xml").await.unwrap();
    assert_eq!(bytes, b"feed");
  }
}
