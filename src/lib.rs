//! Client-side resource cache and optimistic-mutation sync engine.
//!
//! Cached server resources are served immediately and refreshed in the
//! background; local edits are applied at once and reconciled with the
//! server afterwards. The cache survives restarts through a pluggable
//! persistence backend.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod persist;
pub mod query;
pub mod remote;
pub mod session;

#[cfg(test)]
mod testing;
