//! One versioned interceptor: installs its shell, retires older stores and
//! answers requests cache-first.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::lifecycle::WorkerState;
use super::version::CacheVersion;
use crate::cache::{CacheStorage, CacheStore};
use crate::net::{duplicate, Fetcher, Request, Response};

/// Where a response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the active store, no network traffic
  Cache,
  /// Live network response
  Network,
}

/// Result of handling one request.
#[derive(Debug)]
pub struct FetchOutcome {
  pub response: Response,
  pub source: ResponseSource,
  /// Background write of the response into the store, if one was started.
  /// Dropping the handle does not cancel the write.
  pub cache_write: Option<JoinHandle<()>>,
}

impl FetchOutcome {
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cache_write: None,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cache_write: None,
    }
  }

  /// Wait for the background cache write, if any.
  pub async fn finish_cache_write(&mut self) {
    if let Some(handle) = self.cache_write.take() {
      if let Err(e) = handle.await {
        warn!("Cache write task failed: {}", e);
      }
    }
  }
}

/// What activation did to the other stores.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  pub deleted: Vec<String>,
  /// Stores that could not be deleted, with the reason
  pub failed: Vec<(String, String)>,
}

/// A single interceptor version.
pub struct Worker<S: CacheStorage> {
  version: CacheVersion,
  shell: Vec<String>,
  origin: Url,
  state: WorkerState,
  /// This version's own store, set once install has opened it
  store: Option<CacheStore<S>>,
  /// Shared backend, used by activation to see every other store
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
}

impl<S: CacheStorage> Worker<S> {
  /// A fresh, not yet installed worker.
  pub fn new(
    version: CacheVersion,
    shell: Vec<String>,
    origin: Url,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      version,
      shell,
      origin,
      state: WorkerState::Unregistered,
      store: None,
      storage,
      fetcher,
    }
  }

  /// Rebuild a worker that already reached `state` in an earlier run,
  /// around the store it installed back then.
  pub fn restored(
    version: CacheVersion,
    state: WorkerState,
    store: CacheStore<S>,
    origin: Url,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      state,
      store: Some(store),
      ..Self::new(version, Vec::new(), origin, storage, fetcher)
    }
  }

  pub fn version(&self) -> &CacheVersion {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn cache_name(&self) -> String {
    self.version.cache_name()
  }

  pub(crate) fn set_state(&mut self, next: WorkerState) -> Result<()> {
    let previous = self.state;
    self.state.transition(next)?;
    info!("{}: {} -> {}", self.version, previous, next);
    Ok(())
  }

  /// Cache every shell resource into this version's store.
  ///
  /// On failure the worker ends up `Redundant` and the error is returned.
  pub async fn install(&mut self) -> Result<()> {
    self.set_state(WorkerState::Installing)?;

    match self.cache_shell().await {
      Ok(store) => {
        self.store = Some(store);
        self.set_state(WorkerState::Waiting)?;
        Ok(())
      }
      Err(e) => {
        warn!("Install of {} failed: {}", self.version, e);
        self.set_state(WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  async fn cache_shell(&self) -> Result<CacheStore<S>> {
    let store = CacheStore::open(Arc::clone(&self.storage), &self.cache_name())?;
    info!("Opened cache store {}", store.name());

    let requests = self
      .shell
      .iter()
      .map(|path| Request::resolve(&self.origin, path))
      .collect::<Result<Vec<_>>>()?;

    store.add_all(self.fetcher.as_ref(), requests).await?;
    Ok(store)
  }

  /// Take control: delete every store except this version's own.
  ///
  /// Deletions are independent; one failing does not stop the others or
  /// the activation itself.
  pub fn activate(&mut self) -> Result<ActivationReport> {
    self.set_state(WorkerState::Activating)?;

    let keep = self.cache_name();
    let mut report = ActivationReport::default();

    let names = match self.storage.keys() {
      Ok(names) => names,
      Err(e) => {
        warn!("Could not list cache stores, skipping cleanup: {}", e);
        Vec::new()
      }
    };

    for name in names.into_iter().filter(|n| *n != keep) {
      match self.storage.delete(&name) {
        Ok(_) => {
          info!("Deleted stale cache store {}", name);
          report.deleted.push(name);
        }
        Err(e) => {
          warn!("Failed to delete stale cache store {}: {}", name, e);
          report.failed.push((name, e.to_string()));
        }
      }
    }

    self.set_state(WorkerState::Active)?;
    Ok(report)
  }

  /// Answer one request: cache first, then network, storing cacheable
  /// network responses in the background.
  pub async fn handle(&self, request: Request) -> Result<FetchOutcome> {
    if self.state != WorkerState::Active {
      return Err(eyre!(
        "{} cannot handle requests while {}",
        self.version,
        self.state
      ));
    }

    let store = self
      .store
      .as_ref()
      .ok_or_else(|| eyre!("{} has no cache store", self.version))?;

    match lookup(store, &request).await {
      Ok(Some(response)) => {
        debug!("Cache hit for {} {}", request.method, request.url);
        return Ok(FetchOutcome::from_cache(response));
      }
      Ok(None) => debug!("Cache miss for {} {}", request.method, request.url),
      Err(e) => warn!("Cache lookup for {} failed, using network: {}", request.url, e),
    }

    let response = self.fetcher.fetch(&request).await?;

    if request.method != "GET" || !response.is_cacheable() {
      debug!(
        "Not caching {} {} (status {}, {})",
        request.method,
        request.url,
        response.status,
        response.kind.as_str()
      );
      return Ok(FetchOutcome::from_network(response));
    }

    let (response, to_cache) = duplicate(response);
    let write = spawn_cache_write(store.clone(), request, to_cache);

    Ok(FetchOutcome {
      response,
      source: ResponseSource::Network,
      cache_write: Some(write),
    })
  }
}

/// Store lookup, off the async worker threads.
async fn lookup<S: CacheStorage>(store: &CacheStore<S>, request: &Request) -> Result<Option<Response>> {
  let store = store.clone();
  let request = request.clone();
  tokio::task::spawn_blocking(move || store.match_request(&request))
    .await
    .map_err(|e| eyre!("Cache lookup task failed: {}", e))?
}

/// Detached store write. Errors are logged, never returned to the caller.
fn spawn_cache_write<S: CacheStorage>(
  store: CacheStore<S>,
  request: Request,
  response: Response,
) -> JoinHandle<()> {
  tokio::task::spawn_blocking(move || match store.put(&request, response) {
    Ok(()) => debug!("Cached {} in {}", request.url, store.name()),
    Err(e) => warn!("Failed to cache {} in {}: {}", request.url, store.name(), e),
  })
}
