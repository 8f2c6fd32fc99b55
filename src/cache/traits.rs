//! Core types shared by the cache and its callers.

use std::fmt;

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh response from the network
  Network,
  /// Stored copy served without touching the network
  Cache,
  /// Network unavailable, serving a stored copy
  Offline,
  /// Network unavailable and nothing stored, serving a synthesized response
  Placeholder,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Offline => write!(f, "offline"),
      CacheSource::Placeholder => write!(f, "placeholder"),
    }
  }
}
