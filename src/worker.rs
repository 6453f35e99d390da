//! Control channel: a background task owning the cache manager and sync
//! coordinator, driven by request/reply commands.

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheManager, CacheStore};
use crate::sync::{StatusSource, SyncCoordinator, SyncTrigger};

/// Commands accepted by the control task.
#[derive(Debug)]
pub enum ControlCommand {
  /// Activate the configured cache generation immediately, dropping
  /// partitions of older generations.
  SkipWaiting { reply: oneshot::Sender<()> },
  /// Report the live cache version string.
  GetVersion { reply: oneshot::Sender<String> },
  /// Drop every owned cache partition. Replies with whether the clear
  /// fully succeeded.
  ClearCache { reply: oneshot::Sender<bool> },
  /// Trigger an immediate status resync. Fire-and-forget.
  SyncFlagStatus,
}

/// Handle for sending control commands and awaiting their replies.
#[derive(Clone)]
pub struct ControlChannel {
  tx: mpsc::Sender<ControlCommand>,
}

impl ControlChannel {
  pub async fn skip_waiting(&self) -> Result<()> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlCommand::SkipWaiting { reply }).await?;
    rx.await.map_err(|_| eyre!("Control task dropped the reply"))
  }

  pub async fn version(&self) -> Result<String> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlCommand::GetVersion { reply }).await?;
    rx.await.map_err(|_| eyre!("Control task dropped the reply"))
  }

  pub async fn clear_cache(&self) -> Result<bool> {
    let (reply, rx) = oneshot::channel();
    self.send(ControlCommand::ClearCache { reply }).await?;
    rx.await.map_err(|_| eyre!("Control task dropped the reply"))
  }

  pub async fn sync_now(&self) -> Result<()> {
    self.send(ControlCommand::SyncFlagStatus).await
  }

  async fn send(&self, command: ControlCommand) -> Result<()> {
    self
      .tx
      .send(command)
      .await
      .map_err(|_| eyre!("Control task is no longer running"))
  }
}

/// Spawn the control task. It runs until every [`ControlChannel`] clone
/// has been dropped.
pub fn spawn_control<S, C>(
  cache: std::sync::Arc<CacheManager<S>>,
  sync: std::sync::Arc<SyncCoordinator<C>>,
) -> (ControlChannel, JoinHandle<()>)
where
  S: CacheStore + 'static,
  C: StatusSource,
{
  let (tx, mut rx) = mpsc::channel(16);

  let handle = tokio::spawn(async move {
    while let Some(command) = rx.recv().await {
      match command {
        ControlCommand::SkipWaiting { reply } => {
          if let Err(e) = cache.activate() {
            warn!(error = %e, "cache activation failed");
          } else {
            info!(version = %cache.version(), "cache generation activated");
          }
          let _ = reply.send(());
        }
        ControlCommand::GetVersion { reply } => {
          let _ = reply.send(cache.version());
        }
        ControlCommand::ClearCache { reply } => {
          let ok = match cache.clear_all() {
            Ok(()) => true,
            Err(e) => {
              warn!(error = %e, "cache clear failed");
              false
            }
          };
          let _ = reply.send(ok);
        }
        ControlCommand::SyncFlagStatus => {
          sync.trigger(SyncTrigger::Manual).await;
        }
      }
    }
  });

  (ControlChannel { tx }, handle)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::FlagStatus;
  use crate::cache::{ApiFetch, SqliteStore};
  use crate::config::SyncConfig;
  use crate::store::LocalStore;
  use crate::sync::StatusSource;
  use std::future::Future;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  struct CountingSource {
    calls: AtomicUsize,
  }

  impl StatusSource for Arc<CountingSource> {
    fn fetch_status(&self) -> impl Future<Output = ApiFetch<FlagStatus>> + Send {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let status: FlagStatus = serde_json::from_str(
        r#"{"status":"full-staff","last_updated":"2025-05-27T12:00:00Z","source":"test"}"#,
      )
      .unwrap();
      async move { ApiFetch::Fresh(status) }
    }
  }

  fn fixture() -> (
    Arc<CacheManager<SqliteStore>>,
    Arc<SyncCoordinator<Arc<CountingSource>>>,
    Arc<CountingSource>,
  ) {
    let store = SqliteStore::open_in_memory().unwrap();
    let cache = Arc::new(CacheManager::new(store, "v1.0.0"));
    let source = Arc::new(CountingSource {
      calls: AtomicUsize::new(0),
    });
    let sync = SyncCoordinator::new(
      Arc::clone(&source),
      Arc::new(LocalStore::open_in_memory()),
      SyncConfig::default(),
    );
    (cache, sync, source)
  }

  #[tokio::test]
  async fn version_and_activation_round_trip() {
    let (cache, sync, _) = fixture();
    let (channel, _task) = spawn_control(Arc::clone(&cache), sync);

    channel.skip_waiting().await.unwrap();
    assert_eq!(channel.version().await.unwrap(), "flagwatch-v1.0.0");
  }

  #[tokio::test]
  async fn clear_cache_reports_success() {
    let (cache, sync, _) = fixture();
    let (channel, _task) = spawn_control(cache, sync);

    assert!(channel.clear_cache().await.unwrap());
  }

  #[tokio::test]
  async fn sync_command_reaches_the_coordinator() {
    let (cache, sync, source) = fixture();
    let (channel, task) = spawn_control(cache, sync);

    channel.sync_now().await.unwrap();
    // Dropping the channel stops the task once the queue drains
    drop(channel);
    task.await.unwrap();

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
  }
}
