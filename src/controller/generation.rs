//! Versioned partition naming.

use std::fmt;

/// The three partitions every generation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// App shell: documents, styles, scripts, fonts
  Static,
  /// Network-first responses and API copies
  Dynamic,
  /// Media assets
  Image,
}

impl PartitionKind {
  /// Lookup order for generation-wide matches.
  pub const ALL: [PartitionKind; 3] = [
    PartitionKind::Static,
    PartitionKind::Dynamic,
    PartitionKind::Image,
  ];

  fn suffix(self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Dynamic => "dynamic",
      PartitionKind::Image => "images",
    }
  }
}

impl fmt::Display for PartitionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.suffix())
  }
}

/// Maximum entry counts per partition. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
  pub dynamic: Option<usize>,
  pub image: Option<usize>,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      dynamic: Some(50),
      image: Some(100),
    }
  }
}

/// The partition names tied to one controller version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  version: String,
  limits: Limits,
}

impl Generation {
  pub fn new(version: impl Into<String>, limits: Limits) -> Self {
    Self {
      version: version.into(),
      limits,
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Full partition name, e.g. `storea-v5.0-images`.
  pub fn partition(&self, kind: PartitionKind) -> String {
    format!("{}-{}", self.version, kind.suffix())
  }

  /// Names of this generation's partitions, in lookup order.
  pub fn live_partitions(&self) -> Vec<String> {
    PartitionKind::ALL
      .iter()
      .map(|kind| self.partition(*kind))
      .collect()
  }

  /// Whether `name` belongs to this generation.
  pub fn is_live(&self, name: &str) -> bool {
    PartitionKind::ALL
      .iter()
      .any(|kind| self.partition(*kind) == name)
  }

  pub fn limit(&self, kind: PartitionKind) -> Option<usize> {
    match kind {
      PartitionKind::Static => None,
      PartitionKind::Dynamic => self.limits.dynamic,
      PartitionKind::Image => self.limits.image,
    }
  }
}
