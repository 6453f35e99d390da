//! Cache keys for status feed queries.

use sha2::{Digest, Sha256};

use crate::cache::QueryKey;

/// Query key types for the status feed endpoints.
#[derive(Clone, Debug)]
pub enum StatusQueryKey {
  /// The current flag status
  CurrentStatus,
  /// One page of the history feed
  History { page: u32, per_page: u32 },
}

impl QueryKey for StatusQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::CurrentStatus => "status:current".to_string(),
      Self::History { page, per_page } => format!("history:{}:{}", page, per_page),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::CurrentStatus => "current flag status".to_string(),
      Self::History { page, per_page } => {
        format!("history page {} ({} per page)", page, per_page)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hashes_are_stable_and_distinct() {
    let a = StatusQueryKey::CurrentStatus.cache_hash();
    let b = StatusQueryKey::CurrentStatus.cache_hash();
    assert_eq!(a, b);

    let h1 = StatusQueryKey::History {
      page: 1,
      per_page: 20,
    }
    .cache_hash();
    let h2 = StatusQueryKey::History {
      page: 2,
      per_page: 20,
    }
    .cache_hash();
    assert_ne!(h1, h2);
    assert_ne!(a, h1);
  }
}
