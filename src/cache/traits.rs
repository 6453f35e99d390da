//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

use crate::api::types::OfflineNotice;

/// Trait for cache lookup keys.
///
/// Implementors provide a stable hash for storage and a human-readable
/// description for logging.
pub trait QueryKey {
  /// Stable, fixed-length key for the cache partition.
  fn cache_hash(&self) -> String;

  /// Human-readable description for log lines.
  fn description(&self) -> String;
}

/// Plain string paths key the static partition directly.
impl QueryKey for &str {
  fn cache_hash(&self) -> String {
    self.to_string()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

/// Outcome of a network-first fetch against the dynamic partition.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiFetch<T> {
  /// Fresh data straight from the network.
  Fresh(T),
  /// Network unavailable; cached data within its TTL, flagged with its age.
  Cached { data: T, stored_at: DateTime<Utc> },
  /// Network unavailable and no usable cache entry.
  Offline(OfflineNotice),
}

impl<T> ApiFetch<T> {
  /// The payload, when one is available.
  pub fn data(&self) -> Option<&T> {
    match self {
      ApiFetch::Fresh(data) => Some(data),
      ApiFetch::Cached { data, .. } => Some(data),
      ApiFetch::Offline(_) => None,
    }
  }

  pub fn is_fresh(&self) -> bool {
    matches!(self, ApiFetch::Fresh(_))
  }
}

/// How a request path is classified, selecting the caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Versioned asset, cache-first. `navigation` marks full-page requests
  /// that fall back to the designated document when offline.
  Static { navigation: bool },
  /// Time-sensitive API response, network-first with TTL fallback.
  Api,
  /// Anything else, network-first with a simple cache fallback.
  Other,
}

/// Classify a request path.
pub fn classify(path: &str) -> RequestClass {
  let path = path.split(['?', '#']).next().unwrap_or(path);
  if path.starts_with("/api/") {
    return RequestClass::Api;
  }
  let navigation = path == "/" || path.ends_with(".html");
  if navigation
    || path.starts_with("/assets/")
    || path.starts_with("/src/")
    || path == "/manifest.json"
  {
    return RequestClass::Static { navigation };
  }
  RequestClass::Other
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_api_paths() {
    assert_eq!(classify("/api/status"), RequestClass::Api);
    assert_eq!(classify("/api/history?page=2"), RequestClass::Api);
  }

  #[test]
  fn classifies_static_and_navigation() {
    assert_eq!(classify("/"), RequestClass::Static { navigation: true });
    assert_eq!(
      classify("/index.html"),
      RequestClass::Static { navigation: true }
    );
    assert_eq!(
      classify("/assets/icon-192.png"),
      RequestClass::Static { navigation: false }
    );
    assert_eq!(
      classify("/manifest.json"),
      RequestClass::Static { navigation: false }
    );
  }

  #[test]
  fn everything_else_is_other() {
    assert_eq!(classify("/feed.xml"), RequestClass::Other);
  }
}
