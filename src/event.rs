use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::CacheLayer;

/// Foreground/background signal from the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  /// Process became active again (reconnect)
  Foreground,
  /// Process moved to the background or became inactive
  Background,
  /// Page/process hide or visibility loss; last chance to persist
  Hidden,
}

/// Channel through which the host delivers lifecycle events to the engine.
///
/// Events are handled in order on a dedicated task, so the sender never waits
/// on persistence or network work.
pub struct LifecycleEvents {
  tx: mpsc::UnboundedSender<LifecycleEvent>,
  task: JoinHandle<()>,
}

impl LifecycleEvents {
  /// Spawn the event loop for `cache`.
  pub fn spawn(cache: CacheLayer) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        debug!(?event, "lifecycle event");
        cache.handle_lifecycle(event).await;
      }
    });

    Self { tx, task }
  }

  /// Deliver an event. Returns false once the loop has shut down.
  pub fn send(&self, event: LifecycleEvent) -> bool {
    self.tx.send(event).is_ok()
  }

  /// Stop accepting events and wait for queued ones to be handled.
  pub async fn shutdown(self) {
    drop(self.tx);
    let _ = self.task.await;
  }
}
