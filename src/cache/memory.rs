//! In-process storage for tests, with injectable delete failures.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::key::{RequestKey, VarySnapshot};
use super::storage::{
  prepare_entry, CacheStorage, RegistrationRecord, StoreInfo, StoredResponse,
};
use crate::net::{Request, Response};

struct MemoryStore {
  name: String,
  created_at: chrono::DateTime<Utc>,
  entries: HashMap<String, (VarySnapshot, StoredResponse)>,
}

#[derive(Default)]
struct Inner {
  stores: Vec<MemoryStore>,
  registrations: HashMap<String, RegistrationRecord>,
  failing_deletes: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStorage {
  inner: Mutex<Inner>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every `delete` of `name` fail.
  pub fn fail_delete(&self, name: &str) {
    self
      .inner
      .lock()
      .unwrap()
      .failing_deletes
      .insert(name.to_string());
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
    self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl Inner {
  fn store(&self, name: &str) -> Option<&MemoryStore> {
    self.stores.iter().find(|s| s.name == name)
  }

  fn store_mut(&mut self, name: &str) -> Option<&mut MemoryStore> {
    self.stores.iter_mut().find(|s| s.name == name)
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut inner = self.lock()?;
    if inner.store(name).is_none() {
      inner.stores.push(MemoryStore {
        name: name.to_string(),
        created_at: Utc::now(),
        entries: HashMap::new(),
      });
    }
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.store(name).is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.stores.iter().map(|s| s.name.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut inner = self.lock()?;
    if inner.failing_deletes.contains(name) {
      return Err(eyre!("Failed to delete cache store {}: storage busy", name));
    }
    let before = inner.stores.len();
    inner.stores.retain(|s| s.name != name);
    Ok(inner.stores.len() != before)
  }

  fn match_entry(&self, name: &str, request: &Request) -> Result<Option<Response>> {
    let key = RequestKey::for_request(request);
    if !key.is_cacheable_method() {
      return Ok(None);
    }

    let inner = self.lock()?;
    let hit = inner
      .store(name)
      .and_then(|s| s.entries.get(&key.cache_hash()))
      .filter(|(vary, _)| vary.matches(request))
      .map(|(_, stored)| stored.clone().into_response());
    Ok(hit)
  }

  fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
    let entry = prepare_entry(request, response)?;
    let mut inner = self.lock()?;
    let store = inner
      .store_mut(name)
      .ok_or_else(|| eyre!("Cache store {} does not exist", name))?;
    store
      .entries
      .insert(entry.key.cache_hash(), (entry.vary, entry.response));
    Ok(())
  }

  fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    let prepared = entries
      .into_iter()
      .map(|(request, response)| prepare_entry(&request, response))
      .collect::<Result<Vec<_>>>()?;

    let mut inner = self.lock()?;
    let store = inner
      .store_mut(name)
      .ok_or_else(|| eyre!("Cache store {} does not exist", name))?;
    for entry in prepared {
      store
        .entries
        .insert(entry.key.cache_hash(), (entry.vary, entry.response));
    }
    Ok(())
  }

  fn info(&self, name: &str) -> Result<Option<StoreInfo>> {
    let inner = self.lock()?;
    Ok(inner.store(name).map(|s| StoreInfo {
      name: s.name.clone(),
      entries: s.entries.len(),
      created_at: s.created_at,
    }))
  }

  fn load_registration(&self, scope: &str) -> Result<Option<RegistrationRecord>> {
    Ok(self.lock()?.registrations.get(scope).cloned())
  }

  fn save_registration(&self, record: &RegistrationRecord) -> Result<()> {
    self
      .lock()?
      .registrations
      .insert(record.scope.clone(), record.clone());
    Ok(())
  }
}
