//! Request identity used for cache lookups.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Method + URL identity of a request. The URL fragment is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    Self {
      method: request.method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Only GET requests take part in caching.
  pub fn is_cacheable_method(&self) -> bool {
    self.method == "GET"
  }

  /// SHA256 of `METHOD url`, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Request header values a stored response varies on.
///
/// Captured at write time from the response's `Vary` header; a later
/// request only matches when every listed header has the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarySnapshot {
  /// `Vary: *` was present, so nothing can ever match
  #[serde(default)]
  wildcard: bool,
  #[serde(default)]
  headers: Vec<(String, Option<String>)>,
}

impl VarySnapshot {
  pub fn capture(request: &Request, response: &Response) -> Self {
    let mut snapshot = Self::default();
    let Some(vary) = response.header("vary") else {
      return snapshot;
    };

    for name in vary.split(',').map(|n| n.trim().to_ascii_lowercase()) {
      if name.is_empty() {
        continue;
      }
      if name == "*" {
        snapshot.wildcard = true;
        continue;
      }
      let value = request.header(&name).map(String::from);
      snapshot.headers.push((name, value));
    }

    snapshot
  }

  pub fn is_wildcard(&self) -> bool {
    self.wildcard
  }

  pub fn matches(&self, request: &Request) -> bool {
    if self.wildcard {
      return false;
    }
    self
      .headers
      .iter()
      .all(|(name, value)| request.header(name) == value.as_deref())
  }
}
