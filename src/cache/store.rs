//! Handle on one named cache store.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;

use super::storage::CacheStorage;
use crate::net::{Fetcher, Request, Response};

/// A capability on a single named store.
///
/// Handed to whoever needs to read or write the store, instead of letting
/// them look stores up by name on the shared backend.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> CacheStore<S> {
  /// Open the named store, creating it if absent.
  pub fn open(storage: Arc<S>, name: &str) -> Result<Self> {
    storage.open(name)?;
    Ok(Self {
      storage,
      name: name.to_string(),
    })
  }

  /// Handle on a store that must already exist. `None` if it does not.
  pub fn existing(storage: Arc<S>, name: &str) -> Result<Option<Self>> {
    if !storage.has(name)? {
      return Ok(None);
    }
    Ok(Some(Self {
      storage,
      name: name.to_string(),
    }))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.storage.match_entry(&self.name, request)
  }

  pub fn put(&self, request: &Request, response: Response) -> Result<()> {
    self.storage.put(&self.name, request, response)
  }

  /// Fetch every request and store all responses, or store nothing.
  ///
  /// Fails if any fetch fails or answers with a non-2xx status.
  pub async fn add_all(&self, fetcher: &dyn Fetcher, requests: Vec<Request>) -> Result<()> {
    let fetches = requests.into_iter().map(|request| async move {
      let response = fetcher.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to cache {}: server answered {}",
          request.url,
          response.status
        ));
      }
      Ok((request, response))
    });

    let entries = try_join_all(fetches).await?;

    let store = self.clone();
    tokio::task::spawn_blocking(move || store.storage.put_all(&store.name, entries))
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", self.name, e))?
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}
