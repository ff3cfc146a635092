//! Error taxonomy for fetches and mutations.
//!
//! Application-level plumbing (config, persistence backends, the CLI) uses
//! `color_eyre::Result`. The engine itself reports typed errors so callers can
//! branch on the kind of failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::RequestFingerprint;

/// Coarse classification of a failed fetch or network write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "camelCase")]
pub enum ErrorKind {
  /// No response at all (transport failure, timeout)
  Network,
  /// Non-2xx status code
  Server(u16),
  /// Response body could not be decoded
  Decode,
  /// A network write was rejected after the optimistic value was applied
  Conflict,
  /// No bearer token available
  Unauthenticated,
}

/// Failure of a single network round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),

  #[error("server returned {status}: {message}")]
  Server { status: u16, message: String },

  #[error("malformed response: {0}")]
  Decode(String),

  #[error("rejected by server: {0}")]
  Conflict(String),

  #[error("not signed in")]
  Unauthenticated,
}

impl FetchError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      FetchError::Network(_) => ErrorKind::Network,
      FetchError::Server { status, .. } => ErrorKind::Server(*status),
      FetchError::Decode(_) => ErrorKind::Decode,
      FetchError::Conflict(_) => ErrorKind::Conflict,
      FetchError::Unauthenticated => ErrorKind::Unauthenticated,
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(err: serde_json::Error) -> Self {
    FetchError::Decode(err.to_string())
  }
}

/// A failed mutation, surfaced through its `MutationHandle`.
#[derive(Debug, Clone, Error)]
#[error("mutation of {key} failed: {source}")]
pub struct MutationError {
  pub key: RequestFingerprint,
  #[source]
  pub source: FetchError,
  /// Whether the cached value was restored to its pre-mutation snapshot
  pub rolled_back: bool,
}

impl MutationError {
  pub fn kind(&self) -> ErrorKind {
    self.source.kind()
  }
}

/// Error recorded on a cache entry after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
  pub kind: ErrorKind,
  pub message: String,
  pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
  pub fn new(err: &FetchError, occurred_at: DateTime<Utc>) -> Self {
    Self {
      kind: err.kind(),
      message: err.to_string(),
      occurred_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_mapping() {
    assert_eq!(FetchError::Network("reset".into()).kind(), ErrorKind::Network);
    assert_eq!(
      FetchError::Server {
        status: 503,
        message: "unavailable".into()
      }
      .kind(),
      ErrorKind::Server(503)
    );
    assert_eq!(FetchError::Decode("eof".into()).kind(), ErrorKind::Decode);
    assert_eq!(FetchError::Conflict("stale".into()).kind(), ErrorKind::Conflict);
  }

  #[test]
  fn test_error_info_serializes_kind_with_status() {
    let info = ErrorInfo::new(
      &FetchError::Server {
        status: 404,
        message: "missing".into(),
      },
      Utc::now(),
    );
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["kind"]["kind"], "server");
    assert_eq!(json["kind"]["status"], 404);
  }
}
