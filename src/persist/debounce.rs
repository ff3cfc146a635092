//! Trailing-edge debounce for persistence writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::trace;

enum Command {
  Request,
  Flush(oneshot::Sender<()>),
  Cancel,
}

/// Collapses bursts of requests into one action run on the trailing edge.
///
/// State machine: `Idle → Pending(deadline) → Idle`. Each `request` cancels
/// and resets the single pending deadline; requests never accumulate. When the
/// handle is dropped, a pending action still runs once.
pub struct Debouncer {
  tx: mpsc::UnboundedSender<Command>,
}

impl Debouncer {
  /// Spawn the timer task. Must be called within a tokio runtime.
  pub fn spawn<F>(window: Duration, action: F) -> Self
  where
    F: Fn() + Send + Sync + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(window, Arc::new(action), rx));
    Self { tx }
  }

  /// Arm (or re-arm) the timer.
  pub fn request(&self) {
    let _ = self.tx.send(Command::Request);
  }

  /// Run a pending action now, if there is one.
  pub async fn flush(&self) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if self.tx.send(Command::Flush(ack_tx)).is_ok() {
      let _ = ack_rx.await;
    }
  }

  /// Drop a pending action without running it.
  pub fn cancel(&self) {
    let _ = self.tx.send(Command::Cancel);
  }
}

async fn run(window: Duration, action: Arc<dyn Fn() + Send + Sync>, mut rx: mpsc::UnboundedReceiver<Command>) {
  let mut deadline: Option<Instant> = None;

  loop {
    tokio::select! {
      command = rx.recv() => match command {
        Some(Command::Request) => {
          trace!(pending = deadline.is_some(), "debounce re-armed");
          deadline = Some(Instant::now() + window);
        }
        Some(Command::Flush(ack)) => {
          if deadline.take().is_some() {
            action();
          }
          let _ = ack.send(());
        }
        Some(Command::Cancel) => deadline = None,
        None => {
          if deadline.take().is_some() {
            action();
          }
          break;
        }
      },
      _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
        deadline = None;
        action();
      }
    }
  }
}
