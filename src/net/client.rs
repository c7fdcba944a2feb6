use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

use super::types::{Request, Response, ResponseHeaders, ResponseKind};

/// Anything that can turn a request into a live response.
///
/// `Err` means the network itself failed; HTTP error statuses are `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Fetcher backed by reqwest.
///
/// Responses are classified against `origin`: same-origin responses are
/// `Basic`, cross-origin ones are `Cors` when the server exposes them and
/// `Opaque` otherwise.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

fn classify(origin: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseKind {
  if final_url.origin() == origin.origin() {
    ResponseKind::Basic
  } else if headers.contains_key(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN) {
    ResponseKind::Cors
  } else {
    ResponseKind::Opaque
  }
}

/// Copy response headers byte for byte; values need not be UTF-8.
fn collect_headers(headers: &HeaderMap) -> ResponseHeaders {
  headers
    .iter()
    .map(|(k, v)| (k.as_str().to_string(), v.as_bytes().to_vec()))
    .collect()
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid header value for {}: {}", name, e))?;
      headers.append(name, value);
    }

    let resp = self
      .client
      .request(method, request.url.clone())
      .headers(headers)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let final_url = resp.url().clone();
    let kind = classify(&self.origin, &final_url, resp.headers());
    if kind == ResponseKind::Opaque {
      return Ok(Response::opaque(Some(final_url)));
    }

    let status = resp.status();
    let response_headers = collect_headers(resp.headers());

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", final_url, e))?;

    let mut response = Response::new(status.as_u16(), body.to_vec())
      .with_kind(kind)
      .with_status_text(status.canonical_reason().unwrap_or(""));
    response.headers = response_headers;
    response.url = Some(final_url);

    Ok(response)
  }
}
