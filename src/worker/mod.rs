//! The cache interceptor: versioned install/activate lifecycle and the
//! cache-first request policy.

mod interceptor;
mod lifecycle;
mod registration;
mod version;

pub use interceptor::{ActivationReport, ResponseSource};
pub use registration::{InstallOutcome, Registration};
pub use version::CacheVersion;
