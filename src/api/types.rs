//! Domain types for the flag status feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two display positions the feed reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagPosition {
  FullStaff,
  HalfStaff,
}

impl FlagPosition {
  /// Human-readable label used in notifications and status output.
  pub fn label(&self) -> &'static str {
    match self {
      FlagPosition::FullStaff => "Full-Staff",
      FlagPosition::HalfStaff => "Half-Staff",
    }
  }
}

impl std::fmt::Display for FlagPosition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.label())
  }
}

/// Current flag status as reported by the status endpoint.
///
/// Immutable once received. A half-staff status should carry a reason;
/// its absence degrades the displayed text but is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagStatus {
  pub status: FlagPosition,
  pub last_updated: DateTime<Utc>,
  #[serde(default)]
  pub source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_date: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_date: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub proclamation_url: Option<String>,
}

impl FlagStatus {
  /// Duration text for a half-staff period.
  ///
  /// Uses the precomputed string when the feed provides one, otherwise
  /// derives it from the start/end bounds.
  pub fn duration_text(&self) -> Option<String> {
    if let Some(d) = &self.duration {
      return Some(d.clone());
    }
    match (self.start_date, self.end_date) {
      (Some(start), Some(end)) => {
        let days = (end - start).num_days().max(0) + 1;
        if days == 1 {
          Some("1 day".to_string())
        } else {
          Some(format!("{} days", days))
        }
      }
      _ => None,
    }
  }

  /// One-line summary, e.g. `Half-Staff: Memorial Day`.
  pub fn summary(&self) -> String {
    match &self.reason {
      Some(reason) if !reason.is_empty() => format!("{}: {}", self.status, reason),
      _ => self.status.to_string(),
    }
  }
}

/// A single observed status transition in the local history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub date: DateTime<Utc>,
  pub status: FlagPosition,
  #[serde(default)]
  pub reason: String,
  #[serde(default)]
  pub source: String,
}

impl HistoryEntry {
  /// Build a history entry from an observed status.
  pub fn from_status(status: &FlagStatus) -> Self {
    Self {
      date: status.last_updated,
      status: status.status,
      reason: status.reason.clone().unwrap_or_default(),
      source: status.source.clone(),
    }
  }
}

/// One page of the server-side history feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
  pub history: Vec<HistoryEntry>,
  pub total: u64,
}

/// Push subscription state persisted in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
  /// Provider-opaque subscription token.
  pub token: String,
  pub enabled: bool,
}

/// Synthesized payload served when the network is down and no usable
/// cache entry exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineNotice {
  pub error: String,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

impl OfflineNotice {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: "Offline".to_string(),
      message: message.into(),
      timestamp: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn position_serializes_kebab_case() {
    assert_eq!(
      serde_json::to_string(&FlagPosition::HalfStaff).unwrap(),
      "\"half-staff\""
    );
    let parsed: FlagPosition = serde_json::from_str("\"full-staff\"").unwrap();
    assert_eq!(parsed, FlagPosition::FullStaff);
  }

  #[test]
  fn status_parses_minimal_body() {
    let body = r#"{"status":"half-staff","last_updated":"2025-05-26T12:00:00Z","reason":"Memorial Day"}"#;
    let status: FlagStatus = serde_json::from_str(body).unwrap();
    assert_eq!(status.status, FlagPosition::HalfStaff);
    assert_eq!(status.reason.as_deref(), Some("Memorial Day"));
    assert_eq!(status.summary(), "Half-Staff: Memorial Day");
  }

  #[test]
  fn duration_derived_from_bounds() {
    let body = r#"{
      "status": "half-staff",
      "last_updated": "2025-05-26T12:00:00Z",
      "start_date": "2025-05-26T00:00:00Z",
      "end_date": "2025-05-28T00:00:00Z"
    }"#;
    let status: FlagStatus = serde_json::from_str(body).unwrap();
    assert_eq!(status.duration_text().as_deref(), Some("3 days"));
  }

  #[test]
  fn duration_prefers_precomputed_string() {
    let body = r#"{
      "status": "half-staff",
      "last_updated": "2025-05-26T12:00:00Z",
      "duration": "until sunset",
      "start_date": "2025-05-26T00:00:00Z",
      "end_date": "2025-05-28T00:00:00Z"
    }"#;
    let status: FlagStatus = serde_json::from_str(body).unwrap();
    assert_eq!(status.duration_text().as_deref(), Some("until sunset"));
  }
}
