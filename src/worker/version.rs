use std::fmt;

const CACHE_INFIX: &str = "-cache-v";

/// Identity of one interceptor version and the store it owns.
///
/// Bumping `version` is the only thing that forces the shell to be fetched
/// again and older stores to be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  app_id: String,
  version: u32,
}

impl CacheVersion {
  pub fn new(app_id: &str, version: u32) -> Self {
    Self {
      app_id: app_id.to_string(),
      version,
    }
  }

  /// Parse a store name of the form `<app-id>-cache-v<N>`.
  pub fn parse(cache_name: &str) -> Option<Self> {
    let (app_id, version) = cache_name.rsplit_once(CACHE_INFIX)?;
    if app_id.is_empty() {
      return None;
    }
    let version = version.parse().ok()?;
    Some(Self::new(app_id, version))
  }

  pub fn app_id(&self) -> &str {
    &self.app_id
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn cache_name(&self) -> String {
    format!("{}{}{}", self.app_id, CACHE_INFIX, self.version)
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.cache_name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_name() {
    let v = CacheVersion::new("grafik-firmowy", 1);
    assert_eq!(v.cache_name(), "grafik-firmowy-cache-v1");
    assert_eq!(v.to_string(), "grafik-firmowy-cache-v1");
  }

  #[test]
  fn test_parse_round_trip() {
    let v = CacheVersion::parse("grafik-firmowy-cache-v12").unwrap();
    assert_eq!(v.app_id(), "grafik-firmowy");
    assert_eq!(v.version(), 12);
  }

  #[test]
  fn test_parse_rejects_foreign_names() {
    assert!(CacheVersion::parse("workbox-precache").is_none());
    assert!(CacheVersion::parse("-cache-v1").is_none());
    assert!(CacheVersion::parse("app-cache-vX").is_none());
  }
}
