//! Application wiring: builds the store, cache, client, sync coordinator,
//! and notification dispatcher from configuration and runs the top-level
//! commands.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::api::cached_client::CachedStatusClient;
use crate::api::client::StatusClient;
use crate::api::error::ApiError;
use crate::api::types::HistoryEntry;
use crate::cache::{ApiFetch, CacheManager, SqliteStore};
use crate::config::Config;
use crate::event::StatusEvent;
use crate::notify::{
  Notification, NotificationDispatcher, Notifier, Permission, PushGateway,
};
use crate::store::LocalStore;
use crate::sync::{SyncCoordinator, SyncTrigger};
use crate::worker::spawn_control;

/// Notification sink for the terminal host. The terminal needs no
/// permission prompt, so requests always succeed.
pub struct TermNotifier;

impl Notifier for TermNotifier {
  fn request_permission(&self) -> Permission {
    Permission::Granted
  }

  fn show(&self, notification: &Notification) {
    println!("\n*** {} ***\n{}\n", notification.title, notification.body);
  }
}

/// Push gateway backed by the feed's subscribe endpoint.
pub struct RemotePush {
  client: StatusClient,
}

impl PushGateway for RemotePush {
  fn subscribe(&self) -> impl Future<Output = std::result::Result<String, ApiError>> + Send {
    let client = self.client.clone();
    async move {
      let token = device_token();
      client.subscribe(&token).await?;
      Ok(token)
    }
  }

  fn revoke(&self, token: &str) -> impl Future<Output = std::result::Result<(), ApiError>> + Send {
    let client = self.client.clone();
    let token = token.to_string();
    async move { client.revoke(&token).await }
  }
}

/// Opaque per-installation subscription token.
fn device_token() -> String {
  let mut hasher = Sha256::new();
  hasher.update(std::process::id().to_le_bytes());
  hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hex::encode(hasher.finalize())
}

/// Top-level application state.
pub struct App {
  config: Config,
  store: Arc<LocalStore>,
  cache: Arc<CacheManager<SqliteStore>>,
  client: CachedStatusClient<SqliteStore>,
  sync: Arc<SyncCoordinator<CachedStatusClient<SqliteStore>>>,
  dispatcher: Arc<NotificationDispatcher<TermNotifier, RemotePush>>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let store = Arc::new(LocalStore::open(&data_dir.join("store.db")));

    let cache_store = SqliteStore::open_at(&data_dir.join("cache.db"))?;
    let cache = Arc::new(
      CacheManager::new(cache_store, config.cache.generation.clone())
        .with_max_age(Duration::hours(config.cache.max_age_hours)),
    );
    // Drop partitions left behind by older generations
    cache.activate()?;

    let client = CachedStatusClient::new(&config, Arc::clone(&cache))?;
    let sync = SyncCoordinator::new(client.clone(), Arc::clone(&store), config.sync.clone());
    let dispatcher = Arc::new(NotificationDispatcher::new(
      TermNotifier,
      RemotePush {
        client: StatusClient::new(&config)?,
      },
      Arc::clone(&store),
    ));

    Ok(Self {
      config,
      store,
      cache,
      client,
      sync,
      dispatcher,
    })
  }

  /// Watch the feed: periodic resyncs, transition notifications, and a
  /// control channel, until interrupted.
  pub async fn run_watch(&self) -> Result<()> {
    if !self.config.cache.precache.is_empty() {
      self.client.precache(&self.config.cache.precache).await;
    }

    let (control, control_task) = spawn_control(Arc::clone(&self.cache), Arc::clone(&self.sync));
    info!(version = %self.cache.version(), "watching");

    // Permission does not survive restarts; without a grant here the
    // dispatcher drops every transition
    self.dispatcher.request_permission();

    let mut events = self.sync.subscribe();
    let cycle = self.sync.run();
    self.sync.trigger(SyncTrigger::Foreground).await;

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        event = events.recv() => match event {
          Ok(StatusEvent::Updated { new, previous }) => {
            println!("{}  [{}]", new.summary(), new.last_updated);
            self.dispatcher.handle_status_change(&new, previous.as_ref());
          }
          Ok(StatusEvent::CachedServed { status, stored_at }) => {
            println!("(cached from {}) {}", stored_at, status.summary());
          }
          Ok(StatusEvent::Offline(notice)) => {
            println!("offline: {}", notice.message);
          }
          Ok(StatusEvent::Error(message)) => {
            self.dispatcher.handle_error(&message);
            warn!(message, "sync error");
          }
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "event receiver lagged");
          }
          Err(RecvError::Closed) => break,
        }
      }
    }

    self.sync.shutdown();
    cycle.abort();
    drop(control);
    let _ = control_task.await;
    Ok(())
  }

  /// Print the current status once.
  pub async fn show_status(&self) -> Result<()> {
    match self.client.get_status().await {
      ApiFetch::Fresh(status) => {
        println!("{}", status.summary());
        if let Some(duration) = status.duration_text() {
          println!("Duration: {}", duration);
        }
        println!("Updated: {} ({})", status.last_updated, status.source);
      }
      ApiFetch::Cached { data, stored_at } => {
        println!("{}", data.summary());
        println!("(offline, cached at {})", stored_at);
      }
      ApiFetch::Offline(notice) => {
        println!("offline: {}", notice.message);
      }
    }
    Ok(())
  }

  /// Print one page of history, falling back to the locally recorded
  /// transitions when the feed is unreachable.
  pub async fn show_history(&self, page: u32, per_page: u32) -> Result<()> {
    match self.client.get_history(page, per_page).await {
      ApiFetch::Fresh(feed) => {
        print_history(&feed.history);
        println!("({} total)", feed.total);
      }
      ApiFetch::Cached { data, stored_at } => {
        print_history(&data.history);
        println!("(offline, cached at {})", stored_at);
      }
      ApiFetch::Offline(_) => {
        let local = self.store.history();
        if local.is_empty() {
          println!("offline, no history recorded locally");
        } else {
          print_history(&local);
          println!("(offline, locally observed transitions)");
        }
      }
    }
    Ok(())
  }

  /// Subscribe to push notifications.
  pub async fn subscribe(&self) -> Result<()> {
    self.dispatcher.subscribe().await?;
    println!("Subscribed to flag status notifications");
    Ok(())
  }

  /// Unsubscribe from push notifications.
  pub async fn unsubscribe(&self) -> Result<()> {
    self.dispatcher.unsubscribe().await;
    println!("Unsubscribed from flag status notifications");
    Ok(())
  }

  /// Drop every owned cache partition.
  pub fn clear_cache(&self) -> Result<()> {
    self.cache.clear_all()?;
    println!("Cache cleared");
    Ok(())
  }

  /// Print the live cache version.
  pub fn version(&self) {
    println!("{}", self.cache.version());
  }
}

fn print_history(entries: &[HistoryEntry]) {
  for entry in entries {
    let reason = if entry.reason.is_empty() {
      String::new()
    } else {
      format!("  {}", entry.reason)
    };
    println!("{}  {}{}", entry.date, entry.status.label(), reason);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{FlagStatus, Subscription};
  use crate::store::NotificationPreferences;

  fn watch_dispatcher(
    store: Arc<LocalStore>,
  ) -> NotificationDispatcher<TermNotifier, RemotePush> {
    let config = Config::from_status_url("https://example.org/api/status".to_string());
    NotificationDispatcher::new(
      TermNotifier,
      RemotePush {
        client: StatusClient::new(&config).unwrap(),
      },
      store,
    )
  }

  fn status(json: &str) -> FlagStatus {
    serde_json::from_str(json).unwrap()
  }

  #[tokio::test]
  async fn watch_wiring_delivers_transition_notifications() {
    // A returning user: preferences and subscription persisted earlier
    let store = Arc::new(LocalStore::open_in_memory());
    store.set_notification_preferences(&NotificationPreferences {
      enabled: true,
      status_changes: true,
      errors: false,
    });
    store.set_subscription(&Subscription {
      token: "persisted".to_string(),
      enabled: true,
    });

    let dispatcher = watch_dispatcher(store);
    // The watch loop requests permission before any transition arrives
    dispatcher.request_permission();

    let old = status(
      r#"{"status":"half-staff","last_updated":"2025-05-26T12:00:00Z","source":"test"}"#,
    );
    let new = status(
      r#"{"status":"full-staff","last_updated":"2025-05-26T12:00:01Z","source":"test"}"#,
    );
    assert!(dispatcher.handle_status_change(&new, Some(&old)));
  }

  #[tokio::test]
  async fn watch_wiring_forwards_errors_to_the_dispatcher() {
    let store = Arc::new(LocalStore::open_in_memory());
    store.set_notification_preferences(&NotificationPreferences {
      enabled: true,
      status_changes: true,
      errors: true,
    });

    let dispatcher = watch_dispatcher(store);
    dispatcher.request_permission();

    assert!(dispatcher.handle_error("Network error - please check your connection"));
  }
}
