//! Typed update bus connecting the sync coordinator to its subscribers.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::api::types::{FlagStatus, OfflineNotice};

/// Events published after each sync cycle.
#[derive(Debug, Clone)]
pub enum StatusEvent {
  /// A fresh status was fetched and stored.
  Updated {
    new: FlagStatus,
    previous: Option<FlagStatus>,
  },
  /// Network unavailable; a cached status within its TTL was served.
  CachedServed {
    status: FlagStatus,
    stored_at: DateTime<Utc>,
  },
  /// Network unavailable and nothing usable cached.
  Offline(OfflineNotice),
  /// The fetch failed with a user-facing message.
  Error(String),
}

/// Broadcast bus fanning status events out to every subscriber.
///
/// Delivery is at-least-once per currently-subscribed receiver; receivers
/// that lag past the channel capacity observe a `Lagged` error rather than
/// silently missing the newest event.
#[derive(Clone)]
pub struct UpdateBus {
  tx: broadcast::Sender<StatusEvent>,
}

impl UpdateBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(64);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
    self.tx.subscribe()
  }

  pub fn publish(&self, event: StatusEvent) {
    // Send only fails when no receiver is subscribed, which is fine
    let _ = self.tx.send(event);
  }

  pub fn receiver_count(&self) -> usize {
    self.tx.receiver_count()
  }
}

impl Default for UpdateBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::FlagPosition;

  fn status() -> FlagStatus {
    serde_json::from_str(
      r#"{"status":"full-staff","last_updated":"2025-05-27T12:00:00Z","source":"test"}"#,
    )
    .unwrap()
  }

  #[tokio::test]
  async fn every_subscriber_receives_the_event() {
    let bus = UpdateBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(StatusEvent::Updated {
      new: status(),
      previous: None,
    });

    for rx in [&mut a, &mut b] {
      match rx.recv().await.unwrap() {
        StatusEvent::Updated { new, previous } => {
          assert_eq!(new.status, FlagPosition::FullStaff);
          assert!(previous.is_none());
        }
        other => panic!("unexpected event {:?}", other),
      }
    }
  }
}
