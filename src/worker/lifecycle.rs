use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// Lifecycle of one interceptor version.
///
/// ```text
/// Unregistered -> Installing -> Waiting -> Activating -> Active
///                      |            |                      |
///                      +------------+----> Redundant <-----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Unregistered,
  /// Shell resources are being cached
  Installing,
  /// Installed, waiting for the previous version to let go
  Waiting,
  /// Stale stores are being removed
  Activating,
  /// Answering requests
  Active,
  /// Failed to install or superseded; terminal
  Redundant,
}

impl WorkerState {
  pub fn can_transition_to(self, next: WorkerState) -> bool {
    use WorkerState::*;
    matches!(
      (self, next),
      (Unregistered, Installing)
        | (Installing, Waiting)
        | (Installing, Redundant)
        | (Waiting, Activating)
        | (Waiting, Redundant)
        | (Activating, Active)
        | (Active, Redundant)
    )
  }

  /// Move to `next`, or fail without changing state.
  pub fn transition(&mut self, next: WorkerState) -> Result<()> {
    if !self.can_transition_to(next) {
      return Err(eyre!("Illegal worker transition {} -> {}", self, next));
    }
    *self = next;
    Ok(())
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Unregistered => "unregistered",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
