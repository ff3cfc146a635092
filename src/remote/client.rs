use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::RequestFingerprint;
use crate::error::FetchError;

/// HTTP method of a network write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
  Post,
  Put,
  Patch,
  Delete,
}

/// A server write accompanying an optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWrite {
  pub method: WriteMethod,
  pub resource_path: String,
  pub body: Option<Value>,
}

impl NetworkWrite {
  pub fn new(method: WriteMethod, resource_path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      resource_path: resource_path.into(),
      body,
    }
  }

  pub fn patch(resource_path: impl Into<String>, body: Value) -> Self {
    Self::new(WriteMethod::Patch, resource_path, Some(body))
  }

  pub fn post(resource_path: impl Into<String>, body: Value) -> Self {
    Self::new(WriteMethod::Post, resource_path, Some(body))
  }

  pub fn delete(resource_path: impl Into<String>) -> Self {
    Self::new(WriteMethod::Delete, resource_path, None)
  }
}

/// One authenticated round trip to the API.
///
/// Implementations own timeouts; a timed out request is a `Network` error.
pub trait Transport: Send + Sync {
  /// Read the resource identified by `key`.
  fn get<'a>(&'a self, key: &'a RequestFingerprint, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>>;

  /// Perform a write. Returns the (possibly `null`) response body.
  fn send<'a>(&'a self, write: &'a NetworkWrite, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>>;
}

/// `Transport` over HTTPS with JSON bodies and bearer authentication.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  /// `{base_url}/{path}?{canonical query}`
  pub fn url_for(&self, resource_path: &str, query: &str) -> Result<Url, FetchError> {
    let mut url = Url::parse(&format!(
      "{}/{}",
      self.base_url,
      resource_path.trim_start_matches('/')
    ))
    .map_err(|e| FetchError::Network(format!("invalid request URL: {}", e)))?;

    if !query.is_empty() {
      url.set_query(Some(query));
    }
    Ok(url)
  }

  async fn get_json(&self, key: &RequestFingerprint, token: &str) -> Result<Value, FetchError> {
    let url = self.url_for(key.resource_path(), &key.query_string())?;
    debug!(%url, "GET");

    let response = self
      .client
      .get(url)
      .bearer_auth(token)
      .header(ACCEPT, "application/json")
      .send()
      .await
      .map_err(transport_error)?;

    read_json(response, false).await
  }

  async fn send_json(&self, write: &NetworkWrite, token: &str) -> Result<Value, FetchError> {
    let url = self.url_for(&write.resource_path, "")?;
    debug!(%url, method = ?write.method, "write");

    let request = match write.method {
      WriteMethod::Post => self.client.post(url),
      WriteMethod::Put => self.client.put(url),
      WriteMethod::Patch => self.client.patch(url),
      WriteMethod::Delete => self.client.delete(url),
    };
    let mut request = request
      .bearer_auth(token)
      .header(ACCEPT, "application/json");
    if let Some(body) = &write.body {
      request = request
        .header(CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(body)?);
    }

    let response = request.send().await.map_err(transport_error)?;
    read_json(response, true).await
  }
}

impl Transport for HttpTransport {
  fn get<'a>(&'a self, key: &'a RequestFingerprint, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>> {
    self.get_json(key, token).boxed()
  }

  fn send<'a>(&'a self, write: &'a NetworkWrite, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>> {
    self.send_json(write, token).boxed()
  }
}

fn transport_error(err: reqwest::Error) -> FetchError {
  if err.is_timeout() {
    FetchError::Network(format!("request timed out: {}", err))
  } else {
    FetchError::Network(err.to_string())
  }
}

/// Map status and body to a JSON value. An empty 2xx body is `null`.
async fn read_json(response: reqwest::Response, is_write: bool) -> Result<Value, FetchError> {
  let status = response.status();

  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    let message = summarize_body(&body, status);
    if is_write && matches!(status, StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED) {
      return Err(FetchError::Conflict(message));
    }
    return Err(FetchError::Server {
      status: status.as_u16(),
      message,
    });
  }

  let bytes = response.bytes().await.map_err(transport_error)?;
  parse_body(&bytes)
}

pub(crate) fn parse_body(bytes: &[u8]) -> Result<Value, FetchError> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  Ok(serde_json::from_slice(bytes)?)
}

fn summarize_body(body: &str, status: StatusCode) -> String {
  let body = body.trim();
  if body.is_empty() {
    return status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string();
  }
  body.chars().take(200).collect()
}
