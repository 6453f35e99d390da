//! Sync coordinator: decides when to refetch the status feed and fans
//! results out to subscribers.
//!
//! All resync triggers (scheduled timer, foreground, connectivity
//! restored, manual refresh, pending retry) funnel through one serialized
//! fetch-and-update path, so concurrent triggers can never interleave
//! writes to the local store. A completed response older than the stored
//! `last_updated` is discarded.

use chrono::Timelike;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::cached_client::CachedStatusClient;
use crate::api::types::{FlagStatus, HistoryEntry};
use crate::cache::{ApiFetch, CacheStore};
use crate::config::SyncConfig;
use crate::event::{StatusEvent, UpdateBus};
use crate::store::LocalStore;

/// Source of status data for the coordinator.
pub trait StatusSource: Send + Sync + 'static {
  fn fetch_status(&self) -> impl Future<Output = ApiFetch<FlagStatus>> + Send;
}

impl<S: CacheStore + 'static> StatusSource for CachedStatusClient<S> {
  fn fetch_status(&self) -> impl Future<Output = ApiFetch<FlagStatus>> + Send {
    self.get_status()
  }
}

/// What prompted a resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// Recurring timer fired
  Scheduled,
  /// UI regained foreground visibility
  Foreground,
  /// Connectivity transitioned offline -> online
  Online,
  /// Explicit refresh request
  Manual,
  /// The single pending retry after a failure
  Retry,
}

/// Coordinates periodic and event-triggered resynchronization.
pub struct SyncCoordinator<C: StatusSource> {
  client: Arc<C>,
  store: Arc<LocalStore>,
  bus: UpdateBus,
  config: SyncConfig,
  /// Serializes fetch-and-update; held across the network suspension point
  in_flight: AsyncMutex<()>,
  /// At most one pending retry at a time
  retry: StdMutex<Option<JoinHandle<()>>>,
  shutdown: AtomicBool,
  shutdown_notify: Notify,
}

impl<C: StatusSource> SyncCoordinator<C> {
  pub fn new(client: C, store: Arc<LocalStore>, config: SyncConfig) -> Arc<Self> {
    Arc::new(Self {
      client: Arc::new(client),
      store,
      bus: UpdateBus::new(),
      config,
      in_flight: AsyncMutex::new(()),
      retry: StdMutex::new(None),
      shutdown: AtomicBool::new(false),
      shutdown_notify: Notify::new(),
    })
  }

  /// Subscribe to status events. Every subscriber receives every event
  /// published after subscribing.
  pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
    self.bus.subscribe()
  }

  /// Start the recurring resync cycle. The interval is recomputed from
  /// the wall clock every time a cycle restarts.
  pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    tokio::spawn(async move {
      loop {
        let interval = coordinator.current_interval();
        debug!(interval_secs = interval.as_secs(), "scheduling next resync");
        tokio::select! {
          _ = tokio::time::sleep(interval) => {
            if coordinator.shutdown.load(Ordering::SeqCst) {
              break;
            }
            coordinator.fetch_and_update(SyncTrigger::Scheduled).await;
          }
          _ = coordinator.shutdown_notify.notified() => break,
        }
      }
    })
  }

  /// Trigger an immediate resync.
  pub async fn trigger(self: &Arc<Self>, trigger: SyncTrigger) {
    self.fetch_and_update(trigger).await;
  }

  /// Stop the cycle and cancel any pending retry. Timers never fire
  /// after this returns.
  pub fn shutdown(&self) {
    self.shutdown.store(true, Ordering::SeqCst);
    self.shutdown_notify.notify_waiters();
    self.cancel_retry();
  }

  async fn fetch_and_update(self: &Arc<Self>, trigger: SyncTrigger) {
    if self.shutdown.load(Ordering::SeqCst) {
      return;
    }

    let _guard = self.in_flight.lock().await;
    if self.shutdown.load(Ordering::SeqCst) {
      return;
    }

    debug!(?trigger, "fetching flag status");
    match self.client.fetch_status().await {
      ApiFetch::Fresh(new) => {
        // A fetch completed successfully, so the pending retry is stale
        self.cancel_retry();

        let previous = self.store.last_status();
        if let Some(prev) = &previous {
          if new.last_updated < prev.last_updated {
            debug!(
              fetched = %new.last_updated,
              stored = %prev.last_updated,
              "discarding out-of-order response"
            );
            return;
          }
        }

        self.store.set_last_status(&new);
        self.store.add_history_entry(HistoryEntry::from_status(&new));

        info!(status = %new.status, "flag status updated");
        self.bus.publish(StatusEvent::Updated { new, previous });
      }
      ApiFetch::Cached { data, stored_at } => {
        warn!(stored_at = %stored_at, "network unavailable, serving cached status");
        self.bus.publish(StatusEvent::CachedServed {
          status: data,
          stored_at,
        });
        self.schedule_retry();
      }
      ApiFetch::Offline(notice) => {
        warn!(message = %notice.message, "offline with no usable cache");
        self.bus.publish(StatusEvent::Error(notice.message.clone()));
        self.bus.publish(StatusEvent::Offline(notice));
        self.schedule_retry();
      }
    }
  }

  /// Schedule the single pending retry. A retry that is already pending
  /// is left alone.
  fn schedule_retry(self: &Arc<Self>) {
    if self.shutdown.load(Ordering::SeqCst) {
      return;
    }

    let Ok(mut slot) = self.retry.lock() else {
      return;
    };
    if let Some(handle) = slot.as_ref() {
      if !handle.is_finished() {
        debug!("retry already pending");
        return;
      }
    }

    let delay = Duration::from_secs(self.config.retry_delay_secs);
    let coordinator = Arc::clone(self);
    debug!(delay_secs = delay.as_secs(), "scheduling retry");
    *slot = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if coordinator.shutdown.load(Ordering::SeqCst) {
        return;
      }
      // Vacate the slot before fetching; the success path aborts
      // whatever handle it finds there
      if let Ok(mut slot) = coordinator.retry.lock() {
        slot.take();
      }
      coordinator.fetch_and_update(SyncTrigger::Retry).await;
    }));
  }

  fn cancel_retry(&self) {
    if let Ok(mut slot) = self.retry.lock() {
      if let Some(handle) = slot.take() {
        handle.abort();
      }
    }
  }

  fn current_interval(&self) -> Duration {
    update_interval(chrono::Local::now().hour(), &self.config)
  }
}

/// Poll interval for a given wall-clock hour: shorter inside the daytime
/// window, longer overnight.
pub fn update_interval(hour: u32, config: &SyncConfig) -> Duration {
  if hour >= config.daytime_start_hour && hour <= config.daytime_end_hour {
    Duration::from_secs(config.daytime_interval_mins * 60)
  } else {
    Duration::from_secs(config.overnight_interval_mins * 60)
  }
}
