//! HTTP client for the status feed.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;

use super::error::ApiError;
use super::types::{FlagStatus, HistoryPage};

/// Wire shape of a push subscription registration.
#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
  token: &'a str,
}

/// Client for the status, history, and subscription endpoints.
///
/// GET requests carry a cache-busting query parameter so no intermediary
/// serves a stale body, and are retried with exponential backoff on
/// transient failures.
#[derive(Clone)]
pub struct StatusClient {
  http: reqwest::Client,
  status_url: Url,
  history_url: Url,
  subscribe_url: Url,
  retry_attempts: u32,
  retry_delay: Duration,
}

impl StatusClient {
  pub fn new(config: &Config) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let status_url = parse_url(&config.api.status_url)?;
    let history_url = match &config.api.history_url {
      Some(raw) => parse_url(raw)?,
      None => sibling(&status_url, "history")?,
    };
    let subscribe_url = match &config.api.subscribe_url {
      Some(raw) => parse_url(raw)?,
      None => sibling(&status_url, "subscribe")?,
    };

    Ok(Self {
      http,
      status_url,
      history_url,
      subscribe_url,
      retry_attempts: config.api.retry_attempts,
      retry_delay: Duration::from_millis(config.api.retry_delay_ms),
    })
  }

  /// Fetch the current flag status.
  pub async fn get_status(&self) -> std::result::Result<FlagStatus, ApiError> {
    self
      .with_retry(|| self.get_json(self.status_url.clone()))
      .await
  }

  /// Fetch one page of the server-side history feed.
  pub async fn get_history(
    &self,
    page: u32,
    per_page: u32,
  ) -> std::result::Result<HistoryPage, ApiError> {
    let mut url = self.history_url.clone();
    url
      .query_pairs_mut()
      .append_pair("page", &page.to_string())
      .append_pair("per_page", &per_page.to_string());

    self.with_retry(|| self.get_json(url.clone())).await
  }

  /// Register a push subscription token with the server.
  pub async fn subscribe(&self, token: &str) -> std::result::Result<(), ApiError> {
    let response = self
      .http
      .post(self.subscribe_url.clone())
      .json(&SubscribeRequest { token })
      .send()
      .await
      .map_err(ApiError::from)?;

    let status = response.status();
    if !status.is_success() {
      return Err(ApiError::from_status(status.as_u16()));
    }
    Ok(())
  }

  /// Revoke a previously registered subscription token.
  pub async fn revoke(&self, token: &str) -> std::result::Result<(), ApiError> {
    let url = self
      .subscribe_url
      .join("revoke")
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let response = self
      .http
      .post(url)
      .json(&SubscribeRequest { token })
      .send()
      .await
      .map_err(ApiError::from)?;

    let status = response.status();
    if !status.is_success() {
      return Err(ApiError::from_status(status.as_u16()));
    }
    Ok(())
  }

  /// Fetch a static asset relative to the feed origin.
  pub async fn get_asset(&self, path: &str) -> std::result::Result<Vec<u8>, ApiError> {
    let url = self
      .status_url
      .join(path)
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let response = self.http.get(url).send().await.map_err(ApiError::from)?;
    let status = response.status();
    if !status.is_success() {
      return Err(ApiError::from_status(status.as_u16()));
    }
    response
      .bytes()
      .await
      .map(|b| b.to_vec())
      .map_err(ApiError::from)
  }

  async fn get_json<T: DeserializeOwned>(
    &self,
    mut url: Url,
  ) -> std::result::Result<T, ApiError> {
    // Cache buster keeps intermediaries from serving a stale body
    url
      .query_pairs_mut()
      .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());

    debug!(url = %url, "fetching");
    let response = self.http.get(url).send().await.map_err(ApiError::from)?;

    let status = response.status();
    if !status.is_success() {
      return Err(ApiError::from_status(status.as_u16()));
    }

    response
      .json()
      .await
      .map_err(|e| ApiError::Malformed(e.to_string()))
  }

  async fn with_retry<T, F, Fut>(&self, mut op: F) -> std::result::Result<T, ApiError>
  where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, ApiError>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) => {
          attempt += 1;
          if attempt >= self.retry_attempts || !e.is_transient() {
            return Err(e);
          }
          // Exponential backoff
          let delay = self.retry_delay * 2u32.pow(attempt - 1);
          debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying request");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
}

fn parse_url(raw: &str) -> Result<Url> {
  Url::parse(raw).map_err(|e| eyre!("Invalid endpoint URL '{}': {}", raw, e))
}

/// Endpoint sibling to the status URL, e.g. `.../api/status` -> `.../api/history`.
fn sibling(base: &Url, name: &str) -> Result<Url> {
  base
    .join(name)
    .map_err(|e| eyre!("Failed to derive {} endpoint from {}: {}", name, base, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  #[test]
  fn endpoints_default_to_status_url_siblings() {
    let config = Config::from_status_url("https://example.org/api/status".to_string());
    let client = StatusClient::new(&config).unwrap();

    assert_eq!(client.history_url.as_str(), "https://example.org/api/history");
    assert_eq!(
      client.subscribe_url.as_str(),
      "https://example.org/api/subscribe"
    );
  }

  #[test]
  fn invalid_url_is_rejected() {
    let config = Config::from_status_url("not a url".to_string());
    assert!(StatusClient::new(&config).is_err());
  }
}
