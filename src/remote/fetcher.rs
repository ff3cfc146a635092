//! Authenticated fetches on top of a `Transport`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::client::{NetworkWrite, Transport};
use crate::cache::RequestFingerprint;
use crate::error::FetchError;

/// Bearer token shared by every request of a session.
///
/// Set at sign-in, cleared at sign-out. Clones share the same slot.
#[derive(Clone, Default)]
pub struct Credentials {
  token: Arc<RwLock<Option<String>>>,
}

impl Credentials {
  pub fn new(token: impl Into<String>) -> Self {
    let credentials = Self::default();
    credentials.set(token);
    credentials
  }

  pub fn set(&self, token: impl Into<String>) {
    *self.token.write() = Some(token.into());
  }

  pub fn clear(&self) {
    *self.token.write() = None;
  }

  pub fn token(&self) -> Option<String> {
    self.token.read().clone()
  }

  pub fn is_signed_in(&self) -> bool {
    self.token.read().is_some()
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("signed_in", &self.is_signed_in())
      .finish()
  }
}

/// Issues exactly one network round trip per call.
///
/// Deduplication of concurrent fetches is the cache layer's job; the fetcher
/// itself is stateless apart from the credentials it reads.
#[derive(Clone)]
pub struct Fetcher {
  transport: Arc<dyn Transport>,
  credentials: Credentials,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
    Self {
      transport,
      credentials,
    }
  }

  /// Fetch `key` with an explicit token.
  pub async fn fetch(&self, key: &RequestFingerprint, token: &str) -> Result<Value, FetchError> {
    self.transport.get(key, token).await
  }

  /// Fetch `key` with the session token.
  pub async fn fetch_authenticated(&self, key: &RequestFingerprint) -> Result<Value, FetchError> {
    let token = self.credentials.token().ok_or(FetchError::Unauthenticated)?;
    self.fetch(key, &token).await
  }

  /// Perform a network write with the session token.
  pub async fn write(&self, write: &NetworkWrite) -> Result<Value, FetchError> {
    let token = self.credentials.token().ok_or(FetchError::Unauthenticated)?;
    self.transport.send(write, &token).await
  }

  pub fn credentials(&self) -> &Credentials {
    &self.credentials
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedTransport;
  use serde_json::json;

  #[tokio::test]
  async fn test_fetch_without_token_skips_network() {
    let transport = Arc::new(ScriptedTransport::new());
    let fetcher = Fetcher::new(transport.clone(), Credentials::default());

    let err = fetcher
      .fetch_authenticated(&RequestFingerprint::path("spaces"))
      .await
      .unwrap_err();

    assert_eq!(err, FetchError::Unauthenticated);
    assert_eq!(transport.get_count(), 0);
  }

  #[tokio::test]
  async fn test_fetch_passes_session_token() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("spaces", Ok(json!([])));
    let fetcher = Fetcher::new(transport.clone(), Credentials::new("secret"));

    fetcher
      .fetch_authenticated(&RequestFingerprint::path("spaces"))
      .await
      .unwrap();

    assert_eq!(transport.last_token().as_deref(), Some("secret"));
  }

  #[test]
  fn test_credentials_debug_hides_token() {
    let credentials = Credentials::new("secret");
    assert!(!format!("{:?}", credentials).contains("secret"));
    credentials.clear();
    assert!(!credentials.is_signed_in());
  }
}
