//! Plain request and response descriptors.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Request header list with case-insensitive lookup. Order is preserved.
pub type Headers = Vec<(String, String)>;

/// Response header list. Values stay raw bytes: servers may send obs-text
/// that is not valid UTF-8, and it must reach the caller unchanged.
pub type ResponseHeaders = Vec<(String, Vec<u8>)>;

fn find_header<'a, V>(headers: &'a [(String, V)], name: &str) -> Option<&'a V> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v)
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// Uppercase HTTP method
  pub method: String,
  pub url: Url,
  pub headers: Headers,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  /// Build a GET request for an absolute URL or a path relative to `origin`.
  pub fn resolve(origin: &Url, path_or_url: &str) -> Result<Self> {
    let url = origin
      .join(path_or_url)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", path_or_url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name).map(String::as_str)
  }
}

/// How much of a response the caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response, fully readable
  Basic,
  /// Cross-origin response exposed through CORS
  Cors,
  /// Cross-origin response with hidden status, headers and body
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }
}

/// A response snapshot.
///
/// Not `Clone`: the body stands for a transport stream that can be consumed
/// once, so a second copy must come from [`duplicate`].
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: ResponseHeaders,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  /// Final URL after redirects, if known
  pub url: Option<Url>,
}

impl Response {
  /// A same-origin response with the given status and body.
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Vec::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
      url: None,
    }
  }

  /// What a no-cors cross-origin fetch exposes: nothing.
  pub fn opaque(url: Option<Url>) -> Self {
    Self {
      status: 0,
      status_text: String::new(),
      headers: Vec::new(),
      body: Vec::new(),
      kind: ResponseKind::Opaque,
      url,
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .push((name.to_string(), value.as_bytes().to_vec()));
    self
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_status_text(mut self, text: &str) -> Self {
    self.status_text = text.to_string();
    self
  }

  /// Header value as text. `None` when absent or not valid UTF-8.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .header_bytes(name)
      .and_then(|v| std::str::from_utf8(v).ok())
  }

  pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
    find_header(&self.headers, name).map(Vec::as_slice)
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain 200 same-origin responses are ever written to a store.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }
}

/// Split one response into two structurally identical copies.
pub fn duplicate(response: Response) -> (Response, Response) {
  let copy = Response {
    status: response.status,
    status_text: response.status_text.clone(),
    headers: response.headers.clone(),
    body: response.body.clone(),
    kind: response.kind,
    url: response.url.clone(),
  };
  (response, copy)
}
