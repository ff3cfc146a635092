//! Request fingerprints: the canonical identity of a cached resource request.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::form_urlencoded;

/// Request parameters. A sorted map, so insertion order never matters.
pub type Params = BTreeMap<String, String>;

/// Canonical key identifying a cached resource request (path + parameters).
///
/// Two fingerprints are equal iff their normalized paths and sorted parameter
/// sets match exactly. The string form is `path?canonical-query`, which is
/// also how fingerprints are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint {
  resource_path: String,
  params: Params,
}

impl RequestFingerprint {
  pub fn new<I, K, V>(resource_path: &str, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      resource_path: normalize_path(resource_path),
      params: params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    }
  }

  /// Fingerprint for a path without parameters.
  pub fn path(resource_path: &str) -> Self {
    Self::new(resource_path, Params::new())
  }

  pub fn resource_path(&self) -> &str {
    &self.resource_path
  }

  pub fn params(&self) -> &Params {
    &self.params
  }

  /// Form-urlencoded parameters in key order.
  pub fn query_string(&self) -> String {
    form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.params.iter())
      .finish()
  }

  /// Parse the `path?query` form produced by `Display`.
  ///
  /// Every fingerprint survives `parse(&key.to_string())` unchanged, since
  /// the path itself never contains a `?`.
  pub fn parse(s: &str) -> Self {
    let (path, query) = s.split_once('?').unwrap_or((s, ""));

    Self {
      resource_path: normalize_path(path),
      params: form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect(),
    }
  }
}

impl fmt::Display for RequestFingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}?{}", self.resource_path, self.query_string())
  }
}

impl Serialize for RequestFingerprint {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for RequestFingerprint {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(RequestFingerprint::parse(&s))
  }
}

/// Strip surrounding slashes and whitespace so "/space/labels/" and
/// "space/labels" name the same resource. A literal `?` or `#` is
/// percent-encoded, as it would be in the request URL.
fn normalize_path(path: &str) -> String {
  path
    .trim()
    .trim_matches('/')
    .replace('?', "%3F")
    .replace('#', "%23")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_order_does_not_matter() {
    let a = RequestFingerprint::new("space/tasks", [("label", "7"), ("collection", "c1")]);
    let b = RequestFingerprint::new("space/tasks", [("collection", "c1"), ("label", "7")]);
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "space/tasks?collection=c1&label=7");
  }

  #[test]
  fn test_path_is_normalized() {
    let a = RequestFingerprint::path("/space/labels/");
    let b = RequestFingerprint::path("space/labels");
    assert_eq!(a, b);
  }

  #[test]
  fn test_different_params_differ() {
    let a = RequestFingerprint::new("space/collections", [("id", "c1")]);
    let b = RequestFingerprint::new("space/collections", [("id", "c2")]);
    assert_ne!(a, b);
  }

  #[test]
  fn test_parse_display_form() {
    let key = RequestFingerprint::new("space/tasks", [("q", "a&b c"), ("id", "1")]);
    let parsed = RequestFingerprint::parse(&key.to_string());
    assert_eq!(parsed, key);
    assert_eq!(parsed.params()["q"], "a&b c");
  }

  #[test]
  fn test_empty_path_survives_display_form() {
    let key = RequestFingerprint::path("");
    assert_eq!(key.to_string(), "?");
    assert_eq!(RequestFingerprint::parse(&key.to_string()), key);
  }

  #[test]
  fn test_question_mark_in_path_is_encoded() {
    let key = RequestFingerprint::new("search?x", [("q", "a")]);
    assert_eq!(key.resource_path(), "search%3Fx");
    assert_eq!(key.to_string(), "search%3Fx?q=a");

    let parsed = RequestFingerprint::parse(&key.to_string());
    assert_eq!(parsed, key);
    assert_eq!(parsed.params().len(), 1);
  }

  #[test]
  fn test_serializes_as_string() {
    let key = RequestFingerprint::new("space/labels", Params::new());
    let json = serde_json::to_string(&key).unwrap();
    assert_eq!(json, "\"space/labels?\"");
  }
}
