//! Stale-while-revalidate resource cache with optimistic mutations.
//!
//! This module provides a transport-agnostic caching engine that:
//! - Keys every server resource by a canonical `RequestFingerprint`
//! - Serves cached values immediately and refetches stale ones in the background
//! - Deduplicates concurrent fetches of one key into a single round trip
//! - Applies local mutations synchronously and reconciles or rolls them back
//!   once the server answers

mod entry;
mod fingerprint;
mod layer;
mod mutation;
mod scheduler;
mod store;
mod subscription;
mod traits;

pub use entry::{CacheEntry, SyncState};
pub use fingerprint::{Params, RequestFingerprint};
pub use layer::{CacheLayer, EngineSettings, SharedFetch};
pub use mutation::{MutationHandle, MutationOptions, MutationOutcome, Snapshot};
pub use scheduler::{KeyState, RevalidationScheduler};
pub use store::{CacheStore, StoreSnapshot, WriteHook};
pub use subscription::Subscription;
pub use traits::{CacheResult, CacheSource, Resource};
