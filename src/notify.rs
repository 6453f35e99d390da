//! Notification dispatcher: turns status transitions into host
//! notifications and push-eligible events, honoring permission state and
//! per-category preferences.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::api::types::{FlagPosition, FlagStatus, Subscription};
use crate::store::{LocalStore, NotificationPreferences};

/// Host notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
  Unrequested,
  Granted,
  Denied,
}

/// Actions attached to a delivered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  View,
  Dismiss,
}

/// A notification ready for host delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub actions: Vec<NotificationAction>,
}

/// Provider-delivered push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
}

/// Host integration for permission prompts and notification display.
pub trait Notifier: Send + Sync {
  /// Prompt the host for notification permission.
  fn request_permission(&self) -> Permission;

  /// Display a notification.
  fn show(&self, notification: &Notification);
}

/// Push provider integration.
pub trait PushGateway: Send + Sync {
  /// Create a subscription and return its provider-opaque token.
  fn subscribe(&self) -> impl Future<Output = std::result::Result<String, ApiError>> + Send;

  /// Revoke a previously created subscription.
  fn revoke(&self, token: &str) -> impl Future<Output = std::result::Result<(), ApiError>> + Send;
}

#[derive(Debug)]
struct DispatchState {
  permission: Permission,
  subscription: Option<String>,
  preferences: NotificationPreferences,
  /// Dedup marker for the most recently dispatched transition
  last_dispatched: Option<(FlagPosition, DateTime<Utc>)>,
  denied_surfaced: bool,
}

/// Dispatcher status snapshot for display.
#[derive(Debug, Clone)]
pub struct DispatcherStatus {
  pub permission: Permission,
  pub subscribed: bool,
  pub preferences: NotificationPreferences,
}

/// Turns detected status transitions into notifications.
pub struct NotificationDispatcher<N: Notifier, G: PushGateway> {
  notifier: N,
  gateway: Arc<G>,
  store: Arc<LocalStore>,
  state: Mutex<DispatchState>,
}

impl<N: Notifier, G: PushGateway + 'static> NotificationDispatcher<N, G> {
  pub fn new(notifier: N, gateway: G, store: Arc<LocalStore>) -> Self {
    let preferences = store.notification_preferences();
    let subscription = store.subscription().map(|s| s.token);

    Self {
      notifier,
      gateway: Arc::new(gateway),
      store,
      state: Mutex::new(DispatchState {
        permission: Permission::Unrequested,
        subscription,
        preferences,
        last_dispatched: None,
        denied_surfaced: false,
      }),
    }
  }

  /// Request host permission. Idempotent once granted; a denial is
  /// surfaced once and not retried automatically.
  pub fn request_permission(&self) -> Permission {
    let Ok(mut state) = self.state.lock() else {
      return Permission::Unrequested;
    };
    if state.permission == Permission::Granted {
      return Permission::Granted;
    }

    state.permission = self.notifier.request_permission();
    if state.permission == Permission::Denied && !state.denied_surfaced {
      state.denied_surfaced = true;
      info!("notification permission denied by the host");
    }
    state.permission
  }

  /// Subscribe to push notifications.
  ///
  /// Requires granted permission. On any failure the local state is left
  /// unchanged; a subscription is never half-registered.
  pub async fn subscribe(&self) -> Result<()> {
    if self.request_permission() != Permission::Granted {
      return Err(eyre!("Notification permission not granted"));
    }

    let token = self
      .gateway
      .subscribe()
      .await
      .map_err(|e| eyre!("Failed to subscribe to notifications: {}", e))?;

    let Ok(mut state) = self.state.lock() else {
      return Err(eyre!("Notification state unavailable"));
    };
    state.subscription = Some(token.clone());
    state.preferences.enabled = true;
    self.store.set_subscription(&Subscription {
      token,
      enabled: true,
    });
    self.store.set_notification_preferences(&state.preferences);

    Ok(())
  }

  /// Unsubscribe from push notifications.
  ///
  /// The local subscribed state is always cleared; a failed remote
  /// revoke is retried once in the background. Local truth wins for
  /// display purposes.
  pub async fn unsubscribe(&self) {
    let token = match self.state.lock() {
      Ok(mut state) => {
        state.preferences.enabled = false;
        self.store.set_notification_preferences(&state.preferences);
        self.store.remove_subscription();
        state.subscription.take()
      }
      Err(_) => None,
    };

    let Some(token) = token else {
      return;
    };

    if let Err(e) = self.gateway.revoke(&token).await {
      warn!(error = %e, "remote unsubscribe failed, scheduling one retry");
      let gateway = Arc::clone(&self.gateway);
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if let Err(e) = gateway.revoke(&token).await {
          warn!(error = %e, "retried unsubscribe failed, giving up");
        }
      });
    }
  }

  /// Dispatch a notification for a status transition.
  ///
  /// No-op unless the position actually changed (reason-only updates are
  /// ignored). At most one notification is emitted per `(status,
  /// last_updated)` pair, no matter how often this is invoked.
  pub fn handle_status_change(&self, new: &FlagStatus, old: Option<&FlagStatus>) -> bool {
    let Some(old) = old else {
      return false;
    };
    if new.status == old.status {
      return false;
    }

    let Ok(mut state) = self.state.lock() else {
      return false;
    };
    if !state.preferences.enabled || !state.preferences.status_changes {
      return false;
    }
    if state.permission != Permission::Granted {
      return false;
    }

    let marker = (new.status, new.last_updated);
    if state.last_dispatched == Some(marker) {
      return false;
    }
    state.last_dispatched = Some(marker);
    drop(state);

    let body = match &new.reason {
      Some(reason) if !reason.is_empty() => {
        format!("Flag is now at {}: {}", new.status, reason)
      }
      _ => format!("Flag is now at {}", new.status),
    };

    self.notifier.show(&Notification {
      title: "Flag Status Changed".to_string(),
      body,
      actions: vec![NotificationAction::View, NotificationAction::Dismiss],
    });
    true
  }

  /// Surface an error message, when the errors category is enabled.
  /// Disabled categories are skipped, never queued.
  pub fn handle_error(&self, message: &str) -> bool {
    {
      let Ok(state) = self.state.lock() else {
        return false;
      };
      if !state.preferences.enabled || !state.preferences.errors {
        return false;
      }
    }

    self.notifier.show(&Notification {
      title: "Flag Status Monitor".to_string(),
      body: message.to_string(),
      actions: vec![NotificationAction::Dismiss],
    });
    true
  }

  /// Render a provider-delivered push payload as a host notification.
  pub fn handle_push(&self, payload: PushPayload) -> bool {
    {
      let Ok(state) = self.state.lock() else {
        return false;
      };
      if state.permission != Permission::Granted {
        return false;
      }
    }

    self.notifier.show(&Notification {
      title: payload.title,
      body: payload.body,
      actions: vec![NotificationAction::View, NotificationAction::Dismiss],
    });
    true
  }

  /// Replace preferences; disabling notifications also unsubscribes.
  pub async fn update_preferences(&self, preferences: NotificationPreferences) {
    let had_subscription = match self.state.lock() {
      Ok(mut state) => {
        state.preferences = preferences;
        self.store.set_notification_preferences(&state.preferences);
        !state.preferences.enabled && state.subscription.is_some()
      }
      Err(_) => false,
    };

    if had_subscription {
      self.unsubscribe().await;
    }
  }

  pub fn status(&self) -> DispatcherStatus {
    match self.state.lock() {
      Ok(state) => DispatcherStatus {
        permission: state.permission,
        subscribed: state.subscription.is_some(),
        preferences: state.preferences.clone(),
      },
      Err(_) => DispatcherStatus {
        permission: Permission::Unrequested,
        subscribed: false,
        preferences: NotificationPreferences::default(),
      },
    }
  }
}
