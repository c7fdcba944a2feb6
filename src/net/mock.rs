//! Scripted fetcher for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::client::Fetcher;
use super::types::{Request, Response, ResponseHeaders, ResponseKind};

#[derive(Debug, Clone)]
enum Route {
  Respond {
    status: u16,
    body: Vec<u8>,
    kind: ResponseKind,
    headers: ResponseHeaders,
  },
  Fail,
}

/// Fetcher that answers from a fixed URL table and records every call.
///
/// Unknown URLs answer 404, like a real server would.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.respond_with(url, status, body, ResponseKind::Basic, &[]);
  }

  pub fn respond_with(
    &self,
    url: &str,
    status: u16,
    body: &str,
    kind: ResponseKind,
    headers: &[(&str, &str)],
  ) {
    let route = Route::Respond {
      status,
      body: body.as_bytes().to_vec(),
      kind,
      headers: headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect(),
    };
    self.routes.lock().unwrap().insert(url.to_string(), route);
  }

  /// Make every fetch of `url` fail at the network level.
  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Fail);
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| u.as_str() == url)
      .count()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let route = self.routes.lock().unwrap().get(&url).cloned();
    match route {
      Some(Route::Respond {
        status,
        body,
        kind,
        headers,
      }) => {
        if kind == ResponseKind::Opaque {
          return Ok(Response::opaque(Some(request.url.clone())));
        }
        let mut response = Response::new(status, body).with_kind(kind);
        response.headers = headers;
        response.url = Some(request.url.clone());
        Ok(response)
      }
      Some(Route::Fail) => Err(eyre!("Failed to fetch {}: connection refused", url)),
      None => Ok(Response::new(404, "Not Found")),
    }
  }
}
