//! Per-scope registration: which version is active, which is waiting, and
//! routing of requests to the active one.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::interceptor::{ActivationReport, FetchOutcome, Worker};
use super::lifecycle::WorkerState;
use super::version::CacheVersion;
use crate::cache::{CacheStorage, CacheStore, RegistrationRecord};
use crate::net::{Fetcher, Request};

/// Result of asking the registration to install a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  /// The version was installed and is now waiting
  Installed,
  /// The version is already active or waiting; nothing was fetched
  Unchanged,
}

/// Owns the active and waiting workers of one scope.
///
/// A failed install never touches the active worker, so the previous
/// version keeps serving.
pub struct Registration<S: CacheStorage> {
  scope: Url,
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  active: Option<Worker<S>>,
  waiting: Option<Worker<S>>,
}

impl<S: CacheStorage> Registration<S> {
  /// An empty registration with no workers.
  pub fn new(scope: Url, storage: Arc<S>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      scope,
      storage,
      fetcher,
      active: None,
      waiting: None,
    }
  }

  /// Rebuild the registration persisted for `scope`, if any.
  pub fn restore(scope: Url, storage: Arc<S>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    let mut registration = Self::new(scope, storage, fetcher);
    let Some(record) = registration.storage.load_registration(registration.scope.as_str())? else {
      return Ok(registration);
    };

    registration.active = registration.restore_worker(record.active, WorkerState::Active)?;
    registration.waiting = registration.restore_worker(record.waiting, WorkerState::Waiting)?;
    Ok(registration)
  }

  /// A persisted worker is only brought back if its store still exists.
  fn restore_worker(
    &self,
    cache_name: Option<String>,
    state: WorkerState,
  ) -> Result<Option<Worker<S>>> {
    let Some(cache_name) = cache_name else {
      return Ok(None);
    };
    let Some(version) = CacheVersion::parse(&cache_name) else {
      warn!("Ignoring unrecognised {} version {}", state, cache_name);
      return Ok(None);
    };
    let Some(store) = CacheStore::existing(Arc::clone(&self.storage), &cache_name)? else {
      warn!("Cache store of {} version {} is gone, dropping it", state, cache_name);
      return Ok(None);
    };

    Ok(Some(Worker::restored(
      version,
      state,
      store,
      self.scope.clone(),
      Arc::clone(&self.storage),
      Arc::clone(&self.fetcher),
    )))
  }

  fn persist(&self) -> Result<()> {
    self.storage.save_registration(&RegistrationRecord {
      scope: self.scope.to_string(),
      active: self.active.as_ref().map(|w| w.cache_name()),
      waiting: self.waiting.as_ref().map(|w| w.cache_name()),
    })
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn active(&self) -> Option<&Worker<S>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Worker<S>> {
    self.waiting.as_ref()
  }

  pub fn active_version(&self) -> Option<&CacheVersion> {
    self.active.as_ref().map(|w| w.version())
  }

  pub fn waiting_version(&self) -> Option<&CacheVersion> {
    self.waiting.as_ref().map(|w| w.version())
  }

  /// Install `version` with the given shell paths.
  ///
  /// Re-registering the active or waiting version is a no-op: changed shell
  /// files are only picked up after a version bump.
  pub async fn register(&mut self, version: CacheVersion, shell: Vec<String>) -> Result<InstallOutcome> {
    if self.active_version() == Some(&version) || self.waiting_version() == Some(&version) {
      info!("{} is already installed", version);
      return Ok(InstallOutcome::Unchanged);
    }
    if let Some(active) = self.active_version() {
      if active.app_id() == version.app_id() && active.version() > version.version() {
        warn!("Installing {} over newer {}", version, active);
      }
    }

    let mut worker = Worker::new(
      version,
      shell,
      self.scope.clone(),
      Arc::clone(&self.storage),
      Arc::clone(&self.fetcher),
    );
    worker.install().await?;

    if let Some(mut previous) = self.waiting.replace(worker) {
      previous.set_state(WorkerState::Redundant)?;
    }
    self.persist()?;

    Ok(InstallOutcome::Installed)
  }

  /// Promote the waiting worker to active and retire the old one.
  pub fn activate(&mut self) -> Result<ActivationReport> {
    let mut worker = self
      .waiting
      .take()
      .ok_or_else(|| eyre!("No waiting version to activate"))?;

    if let Some(mut previous) = self.active.take() {
      previous.set_state(WorkerState::Redundant)?;
    }

    let report = worker.activate()?;
    self.active = Some(worker);
    self.persist()?;

    Ok(report)
  }

  /// Install and immediately activate. Returns `None` if the version was
  /// already installed and nothing changed.
  pub async fn update(
    &mut self,
    version: CacheVersion,
    shell: Vec<String>,
  ) -> Result<Option<ActivationReport>> {
    let already_waiting = self.waiting_version() == Some(&version);
    match self.register(version, shell).await? {
      InstallOutcome::Installed => self.activate().map(Some),
      InstallOutcome::Unchanged if already_waiting => self.activate().map(Some),
      InstallOutcome::Unchanged => Ok(None),
    }
  }

  /// Route a request through the active worker. Without one, the request
  /// goes straight to the network and nothing is cached.
  pub async fn handle(&self, request: Request) -> Result<FetchOutcome> {
    match &self.active {
      Some(worker) => worker.handle(request).await,
      None => {
        debug!("No active version, fetching {} directly", request.url);
        let response = self.fetcher.fetch(&request).await?;
        Ok(FetchOutcome::from_network(response))
      }
    }
  }
}
