//! Optimistic mutations and their reconciliation with the server.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::entry::{CacheEntry, SyncState};
use super::fingerprint::{Params, RequestFingerprint};
use super::layer::{CacheLayer, Inner};
use super::traits::Resource;
use crate::error::{FetchError, MutationError};
use crate::remote::NetworkWrite;

/// How a mutation reconciles with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOptions {
  /// Refetch the key once the network write succeeded (or right away if
  /// there is no write). Otherwise the optimistic value is final.
  pub revalidate_after: bool,
  /// Restore the pre-mutation snapshot if the network write fails.
  pub rollback_on_server_error: bool,
}

impl Default for MutationOptions {
  fn default() -> Self {
    Self {
      revalidate_after: false,
      rollback_on_server_error: true,
    }
  }
}

impl MutationOptions {
  pub fn revalidate() -> Self {
    Self {
      revalidate_after: true,
      ..Self::default()
    }
  }
}

/// Entry as it was right before one optimistic write.
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub key: RequestFingerprint,
  pub entry: CacheEntry,
}

/// A settled mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
  pub key: RequestFingerprint,
  /// Body returned by the network write, if one was sent
  pub response: Option<Value>,
  /// Value of the entry once the mutation settled
  pub value: Option<Arc<Value>>,
  pub sync: SyncState,
}

/// Handle to a mutation whose optimistic value is already in the store.
///
/// Awaiting it yields the reconciliation result. Dropping it does not cancel
/// the network write.
pub struct MutationHandle {
  snapshot: Snapshot,
  optimistic: Option<Arc<Value>>,
  settled: BoxFuture<'static, Result<MutationOutcome, MutationError>>,
}

impl MutationHandle {
  pub fn key(&self) -> &RequestFingerprint {
    &self.snapshot.key
  }

  /// Entry before the optimistic write.
  pub fn snapshot(&self) -> &Snapshot {
    &self.snapshot
  }

  /// Value the optimistic write put in the store.
  pub fn optimistic(&self) -> Option<&Arc<Value>> {
    self.optimistic.as_ref()
  }
}

impl Future for MutationHandle {
  type Output = Result<MutationOutcome, MutationError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.settled.poll_unpin(cx)
  }
}

/// Marks a network write for one key as outstanding until dropped.
///
/// While any write for a key is outstanding, automatic revalidation of that
/// key is deferred and fetch responses never replace its value.
struct PendingWrite {
  inner: Arc<Inner>,
  key: RequestFingerprint,
}

impl PendingWrite {
  fn begin(inner: &Arc<Inner>, key: &RequestFingerprint) -> Self {
    *inner.pending_writes.lock().entry(key.clone()).or_insert(0) += 1;
    Self {
      inner: inner.clone(),
      key: key.clone(),
    }
  }
}

impl Drop for PendingWrite {
  fn drop(&mut self) {
    let mut pending = self.inner.pending_writes.lock();
    if let Some(count) = pending.get_mut(&self.key) {
      *count -= 1;
      if *count == 0 {
        pending.remove(&self.key);
      }
    }
  }
}

impl CacheLayer {
  /// Optimistically rewrite `resource_path` with `params`.
  ///
  /// The transformed value is in the store when this returns. `transform`
  /// runs under the store lock and must not touch the cache.
  pub fn mutate<F>(
    &self,
    resource_path: &str,
    params: Params,
    transform: F,
    options: MutationOptions,
    write: Option<NetworkWrite>,
  ) -> MutationHandle
  where
    F: FnOnce(Option<&Value>) -> Value,
  {
    self.mutate_key(RequestFingerprint::new(resource_path, params), transform, options, write)
  }

  pub fn mutate_key<F>(
    &self,
    key: RequestFingerprint,
    transform: F,
    options: MutationOptions,
    write: Option<NetworkWrite>,
  ) -> MutationHandle
  where
    F: FnOnce(Option<&Value>) -> Value,
  {
    match self.try_mutate_key(key, |current| Ok::<_, Infallible>(transform(current)), options, write) {
      Ok(handle) => handle,
      Err(never) => match never {},
    }
  }

  /// Typed mutation: the current value is decoded as `T` before `transform`
  /// and the result encoded back. A value that does not decode leaves the
  /// entry untouched and fails with `Decode`.
  pub fn mutate_as<T, F>(
    &self,
    params: Params,
    transform: F,
    options: MutationOptions,
    write: Option<NetworkWrite>,
  ) -> Result<MutationHandle, FetchError>
  where
    T: Resource,
    F: FnOnce(Option<T>) -> T,
  {
    let key = RequestFingerprint::new(T::resource_path(), params);
    self.try_mutate_key(
      key,
      |current| -> Result<Value, FetchError> {
        let decoded = current
          .map(|value| serde_json::from_value::<T>(value.clone()))
          .transpose()?;
        Ok(serde_json::to_value(transform(decoded))?)
      },
      options,
      write,
    )
  }

  /// Like `mutate_key`, but `transform` may refuse the edit. A refused edit
  /// leaves the entry untouched and sends nothing.
  pub fn try_mutate_key<F, E>(
    &self,
    key: RequestFingerprint,
    transform: F,
    options: MutationOptions,
    write: Option<NetworkWrite>,
  ) -> Result<MutationHandle, E>
  where
    F: FnOnce(Option<&Value>) -> Result<Value, E>,
  {
    let store = &self.inner.store;
    let revision = store.next_revision();
    let sync = if options.revalidate_after {
      SyncState::PendingRevalidation
    } else {
      SyncState::OptimisticFinal
    };

    let (previous, written) = store.try_update(&key, |current| {
      let value = transform(current.value())?;
      Ok(CacheEntry {
        value: Some(Arc::new(value)),
        sync,
        revision,
        ..current.clone()
      })
    })?;
    debug!(%key, revision, ?sync, has_write = write.is_some(), "optimistic write applied");
    let pending = write.as_ref().map(|_| PendingWrite::begin(&self.inner, &key));

    let snapshot = Snapshot {
      key: key.clone(),
      entry: previous,
    };

    let settled = if write.is_none() && !options.revalidate_after {
      future::ready(Ok(MutationOutcome {
        key,
        response: None,
        value: written.value.clone(),
        sync,
      }))
      .boxed()
    } else {
      self.chain_write(snapshot.clone(), revision, options, write, pending)
    };

    Ok(MutationHandle {
      snapshot,
      optimistic: written.value,
      settled,
    })
  }

  /// Queue the network half of a mutation behind earlier ones on the same key.
  fn chain_write(
    &self,
    snapshot: Snapshot,
    revision: u64,
    options: MutationOptions,
    write: Option<NetworkWrite>,
    pending: Option<PendingWrite>,
  ) -> BoxFuture<'static, Result<MutationOutcome, MutationError>> {
    let key = snapshot.key.clone();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let link = done_rx.map(|_| ()).boxed().shared();
    let previous = self.inner.write_chains.lock().insert(key.clone(), link.clone());

    let layer = self.clone();
    let task = tokio::spawn(async move {
      if let Some(previous) = previous {
        previous.await;
      }
      let result = layer
        .reconcile(&snapshot, revision, options, write, pending)
        .await;

      let _ = done_tx.send(());
      let mut chains = layer.inner.write_chains.lock();
      if chains.get(&snapshot.key).is_some_and(|last| last.ptr_eq(&link)) {
        chains.remove(&snapshot.key);
      }
      result
    });

    async move {
      task.await.unwrap_or_else(|e| {
        Err(MutationError {
          key,
          source: FetchError::Network(format!("mutation task failed: {}", e)),
          rolled_back: false,
        })
      })
    }
    .boxed()
  }

  async fn reconcile(
    &self,
    snapshot: &Snapshot,
    revision: u64,
    options: MutationOptions,
    write: Option<NetworkWrite>,
    pending: Option<PendingWrite>,
  ) -> Result<MutationOutcome, MutationError> {
    let key = &snapshot.key;

    let sent = match &write {
      Some(write) => Some(self.inner.fetcher.write(write).await),
      None => None,
    };
    drop(pending);

    let response = match sent {
      Some(Ok(response)) => Some(response),
      Some(Err(source)) => {
        let rolled_back = options.rollback_on_server_error;
        if rolled_back {
          warn!(%key, error = %source, "network write failed, rolling back");
          self.rollback(snapshot);
        } else {
          warn!(%key, error = %source, "network write failed, keeping optimistic value");
        }
        return Err(MutationError {
          key: key.clone(),
          source,
          rolled_back,
        });
      }
      None => None,
    };

    if options.revalidate_after {
      if let Err(e) = self.refresh(key).await {
        debug!(%key, error = %e, "revalidation after mutation failed");
      }
    } else {
      // a later local write may have replaced ours; only settle our own
      self.inner.store.update(key, |current| {
        let mut next = current.clone();
        if current.revision == revision {
          next.sync = SyncState::OptimisticFinal;
        }
        next
      });
    }

    let entry = self
      .inner
      .store
      .get(key)
      .unwrap_or_else(|| CacheEntry::empty(key.clone()));
    Ok(MutationOutcome {
      key: key.clone(),
      response,
      value: entry.value,
      sync: entry.sync,
    })
  }

  /// Restore an entry to its pre-mutation snapshot.
  ///
  /// Fetches that started before the rollback will not overwrite it.
  pub fn rollback(&self, snapshot: &Snapshot) {
    let revision = self.inner.store.next_revision();
    self.inner.store.update(&snapshot.key, |current| CacheEntry {
      is_validating: current.is_validating,
      revision,
      ..snapshot.entry.clone()
    });
    debug!(key = %snapshot.key, "rolled back to snapshot");
  }
}
