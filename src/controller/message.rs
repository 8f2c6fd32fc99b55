//! Commands posted to the controller by pages.

use std::fmt;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Report, Result};
use serde::Deserialize;

/// Page-side control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Promote a waiting controller without waiting for pages to close
  SkipWaiting,
  /// Delete every partition regardless of generation
  ClearCache,
}

impl ControlMessage {
  fn tag(self) -> &'static str {
    match self {
      ControlMessage::SkipWaiting => "SKIP_WAITING",
      ControlMessage::ClearCache => "CLEAR_CACHE",
    }
  }

  /// Parse either a bare tag (`SKIP_WAITING`) or a `{"type": "..."}` envelope.
  pub fn parse(payload: &str) -> Result<Self> {
    let payload = payload.trim();
    if payload.starts_with('{') {
      return serde_json::from_str(payload)
        .map_err(|e| eyre!("Unrecognized control message {}: {}", payload, e));
    }
    payload.parse()
  }
}

impl FromStr for ControlMessage {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "SKIP_WAITING" => Ok(ControlMessage::SkipWaiting),
      "CLEAR_CACHE" => Ok(ControlMessage::ClearCache),
      other => Err(eyre!("Unrecognized control message: {}", other)),
    }
  }
}

impl fmt::Display for ControlMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.tag())
  }
}
