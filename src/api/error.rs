//! Error taxonomy for status feed requests.

use thiserror::Error;

/// Failure modes of a feed request, mapped to stable user-facing messages.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("request timed out")]
  Timeout,
  #[error("resource not found")]
  NotFound,
  #[error("rate limited by server")]
  RateLimited,
  #[error("server error (HTTP {0})")]
  Server(u16),
  #[error("unexpected HTTP status {0}")]
  Http(u16),
  #[error("network error: {0}")]
  Network(String),
  #[error("malformed response body: {0}")]
  Malformed(String),
}

impl ApiError {
  /// Classify a non-success HTTP status code.
  pub fn from_status(status: u16) -> Self {
    match status {
      404 => ApiError::NotFound,
      408 => ApiError::Timeout,
      429 => ApiError::RateLimited,
      500..=599 => ApiError::Server(status),
      other => ApiError::Http(other),
    }
  }

  /// Short message suitable for a transient banner.
  pub fn user_message(&self) -> &'static str {
    match self {
      ApiError::Timeout => "Request timed out - please try again",
      ApiError::NotFound => "Status feed not found",
      ApiError::RateLimited => "Too many requests - slowing down",
      ApiError::Server(_) => "Status service is having trouble",
      ApiError::Http(_) => "Unexpected response from status service",
      ApiError::Network(_) => "Network error - please check your connection",
      ApiError::Malformed(_) => "Status service returned unreadable data",
    }
  }

  /// Whether a retry of the same request could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      ApiError::Timeout | ApiError::RateLimited | ApiError::Server(_) | ApiError::Network(_)
    )
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      ApiError::Timeout
    } else if err.is_decode() {
      ApiError::Malformed(err.to_string())
    } else if let Some(status) = err.status() {
      ApiError::from_status(status.as_u16())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_map_to_taxonomy() {
    assert!(matches!(ApiError::from_status(404), ApiError::NotFound));
    assert!(matches!(ApiError::from_status(408), ApiError::Timeout));
    assert!(matches!(ApiError::from_status(429), ApiError::RateLimited));
    assert!(matches!(ApiError::from_status(503), ApiError::Server(503)));
    assert!(matches!(ApiError::from_status(418), ApiError::Http(418)));
  }

  #[test]
  fn transient_classification() {
    assert!(ApiError::Timeout.is_transient());
    assert!(ApiError::Network("down".into()).is_transient());
    assert!(!ApiError::NotFound.is_transient());
    assert!(!ApiError::Malformed("bad".into()).is_transient());
  }
}
