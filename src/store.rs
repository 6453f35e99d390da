//! Durable per-user key/value store backing the status cache, the history
//! log, and preferences.
//!
//! Every operation is infallible from the caller's perspective: backend or
//! serialization failures are logged and degrade to the provided default
//! (reads) or `false` (writes). A store whose backing database cannot be
//! opened behaves as permanently empty.

use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::api::types::{FlagStatus, HistoryEntry, Subscription};

/// Namespaced storage keys.
pub mod keys {
  pub const THEME: &str = "flagwatch-theme";
  pub const NOTIFICATIONS: &str = "flagwatch-notifications";
  pub const LAST_STATUS: &str = "flagwatch-last-status";
  pub const USER_PREFERENCES: &str = "flagwatch-preferences";
  pub const STATE_PREFERENCE: &str = "flagwatch-state-preference";
  pub const STATUS_HISTORY: &str = "flagwatch-status-history";
  pub const SUBSCRIPTION: &str = "flagwatch-subscription";

  pub(super) const ALL: &[&str] = &[
    THEME,
    NOTIFICATIONS,
    LAST_STATUS,
    USER_PREFERENCES,
    STATE_PREFERENCE,
    STATUS_HISTORY,
    SUBSCRIPTION,
  ];
}

/// History log cap; the oldest entry is evicted on overflow.
const HISTORY_CAP: usize = 200;

/// Notification delivery preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
  pub enabled: bool,
  pub status_changes: bool,
  pub errors: bool,
}

impl Default for NotificationPreferences {
  fn default() -> Self {
    Self {
      enabled: false,
      status_changes: true,
      errors: false,
    }
  }
}

/// General user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
  pub animations: bool,
  pub sounds: bool,
  pub auto_refresh: bool,
  pub compact_mode: bool,
}

impl Default for UserPreferences {
  fn default() -> Self {
    Self {
      animations: true,
      sounds: false,
      auto_refresh: true,
      compact_mode: false,
    }
  }
}

/// SQLite-backed key/value store with JSON-serialized values.
pub struct LocalStore {
  conn: Option<Mutex<Connection>>,
}

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl LocalStore {
  /// Open or create the store at the given path. An unavailable backend
  /// yields a store that always misses and rejects writes.
  pub fn open(path: &Path) -> Self {
    if let Some(parent) = path.parent() {
      if let Err(e) = std::fs::create_dir_all(parent) {
        warn!(error = %e, "failed to create store directory, storage disabled");
        return Self { conn: None };
      }
    }

    match Connection::open(path) {
      Ok(conn) => Self::from_connection(conn),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to open local store, storage disabled");
        Self { conn: None }
      }
    }
  }

  /// In-memory store for tests.
  pub fn open_in_memory() -> Self {
    match Connection::open_in_memory() {
      Ok(conn) => Self::from_connection(conn),
      Err(e) => {
        warn!(error = %e, "failed to open in-memory store");
        Self { conn: None }
      }
    }
  }

  /// A store with no backend at all, for environments without durable
  /// storage.
  pub fn unavailable() -> Self {
    Self { conn: None }
  }

  fn from_connection(conn: Connection) -> Self {
    if let Err(e) = conn.execute_batch(STORE_SCHEMA) {
      warn!(error = %e, "failed to run store migrations, storage disabled");
      return Self { conn: None };
    }
    Self {
      conn: Some(Mutex::new(conn)),
    }
  }

  /// Get a value, falling back to `default` on miss or any failure.
  pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
    match self.raw_get(key) {
      Some(json) => match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(e) => {
          warn!(key = %key, error = %e, "failed to parse stored value");
          default
        }
      },
      None => default,
    }
  }

  /// Set a value. Returns whether the write succeeded.
  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
      Ok(json) => json,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to serialize value");
        return false;
      }
    };
    self.raw_set(key, &json)
  }

  /// Remove a key. Returns whether the removal succeeded.
  pub fn remove(&self, key: &str) -> bool {
    let Some(conn) = &self.conn else {
      return false;
    };
    let Ok(conn) = conn.lock() else {
      return false;
    };
    match conn.execute("DELETE FROM kv WHERE key = ?", params![key]) {
      Ok(_) => true,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to remove stored value");
        false
      }
    }
  }

  pub fn has(&self, key: &str) -> bool {
    self.raw_get(key).is_some()
  }

  /// Remove every application key.
  pub fn clear_all(&self) {
    for key in keys::ALL {
      self.remove(key);
    }
  }

  fn raw_get(&self, key: &str) -> Option<String> {
    let conn = self.conn.as_ref()?;
    let conn = conn.lock().ok()?;
    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .ok()
  }

  fn raw_set(&self, key: &str, value: &str) -> bool {
    let Some(conn) = &self.conn else {
      return false;
    };
    let Ok(conn) = conn.lock() else {
      return false;
    };
    match conn.execute(
      "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
      params![key, value],
    ) {
      Ok(_) => true,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to write stored value");
        false
      }
    }
  }

  // ==========================================================================
  // Derived application operations
  // ==========================================================================

  /// Status history, newest first.
  pub fn history(&self) -> Vec<HistoryEntry> {
    self.get(keys::STATUS_HISTORY, Vec::new())
  }

  /// Append an observed transition to the history log.
  ///
  /// An entry identical to the current head by `(date, status)` is not
  /// recorded. The log is capped at 200 entries, newest first.
  pub fn add_history_entry(&self, entry: HistoryEntry) -> bool {
    let mut history = self.history();

    if let Some(head) = history.first() {
      if head.date == entry.date && head.status == entry.status {
        return false;
      }
    }

    history.insert(0, entry);
    history.truncate(HISTORY_CAP);
    self.set(keys::STATUS_HISTORY, &history)
  }

  pub fn last_status(&self) -> Option<FlagStatus> {
    self.get(keys::LAST_STATUS, None)
  }

  pub fn set_last_status(&self, status: &FlagStatus) -> bool {
    self.set(keys::LAST_STATUS, status)
  }

  pub fn notification_preferences(&self) -> NotificationPreferences {
    self.get(keys::NOTIFICATIONS, NotificationPreferences::default())
  }

  pub fn set_notification_preferences(&self, prefs: &NotificationPreferences) -> bool {
    self.set(keys::NOTIFICATIONS, prefs)
  }

  pub fn user_preferences(&self) -> UserPreferences {
    self.get(keys::USER_PREFERENCES, UserPreferences::default())
  }

  pub fn set_user_preferences(&self, prefs: &UserPreferences) -> bool {
    self.set(keys::USER_PREFERENCES, prefs)
  }

  pub fn subscription(&self) -> Option<Subscription> {
    self.get(keys::SUBSCRIPTION, None)
  }

  pub fn set_subscription(&self, subscription: &Subscription) -> bool {
    self.set(keys::SUBSCRIPTION, subscription)
  }

  pub fn remove_subscription(&self) -> bool {
    self.remove(keys::SUBSCRIPTION)
  }

  pub fn theme(&self) -> String {
    self.get(keys::THEME, "auto".to_string())
  }

  pub fn set_theme(&self, theme: &str) -> bool {
    self.set(keys::THEME, &theme)
  }

  pub fn state_preference(&self) -> String {
    self.get(keys::STATE_PREFERENCE, "US".to_string())
  }

  pub fn set_state_preference(&self, state: &str) -> bool {
    self.set(keys::STATE_PREFERENCE, &state)
  }
}
