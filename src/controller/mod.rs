//! Offline cache controller.
//!
//! Intercepts requests, applies a caching strategy per request class, keeps
//! partitions bounded and answers with a fallback when the network is gone.
//! Lifecycle events (install, activate, messages) are explicit methods so the
//! policy stays independent of whatever host delivers them.

mod background;
mod classify;
mod fallback;
mod generation;
mod message;
mod strategy;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use color_eyre::{
  eyre::{bail, eyre},
  Report, Result,
};
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheSource, CacheStorage};
use crate::http::{Request, Response};
use crate::net::Fetcher;

use self::background::Background;
pub use self::classify::{classify, RequestClass};
pub use self::generation::{Generation, Limits, PartitionKind};
pub use self::message::ControlMessage;

/// Immutable settings for one controller instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub generation: Generation,
  /// The app's own origin
  pub origin: Url,
  /// Hosts of the external data API
  pub api_hosts: Vec<String>,
  /// Static-asset CDNs handled like the own origin
  pub trusted_hosts: Vec<String>,
  /// Assets that must all be stored before the generation can activate
  pub core_assets: Vec<Url>,
  /// App shell served to navigations when everything else fails
  pub root_document: Url,
  /// Signal readiness to replace the previous generation right after install
  pub skip_waiting_on_install: bool,
}

/// Controller lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  /// Installed, waiting to be activated
  Installed,
  Activating,
  /// Active and intercepting requests
  Activated,
  /// Failed to install or replaced by a newer generation
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// A response produced by the controller and where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: CacheSource,
}

impl Served {
  fn new(response: Response, source: CacheSource) -> Self {
    Self { response, source }
  }
}

/// Outcome of a fetch event: exactly one response, or an explicit decline.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  Respond(Served),
}

/// Result of a successful activation.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  /// Stale partitions that were deleted
  pub removed: Vec<String>,
}

/// The offline cache controller for one generation.
pub struct OfflineCache<S: CacheStorage, N: Fetcher> {
  config: Arc<CacheConfig>,
  storage: Arc<S>,
  network: Arc<N>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
  background: Background,
}

impl<S: CacheStorage, N: Fetcher> OfflineCache<S, N> {
  pub fn new(config: CacheConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    Self {
      config: Arc::new(config),
      storage,
      network,
      state: Mutex::new(WorkerState::Parsed),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
      background: Background::default(),
    }
  }

  pub fn version(&self) -> &str {
    self.config.generation.version()
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  /// Move from `from` to `to`, failing if the controller is elsewhere.
  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state != from {
      bail!(
        "Controller {} cannot go from {} to {} (expected {})",
        self.version(),
        *state,
        to,
        from
      );
    }
    *state = to;
    Ok(())
  }

  /// Whether this controller asked to replace the previous generation immediately.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Whether this controller has taken over open pages.
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }

  /// Restore a state recorded by a previous process, skipping the lifecycle work
  /// that already happened there.
  pub fn resume(&self, state: WorkerState) {
    debug!(version = self.version(), %state, "resuming controller");
    if state == WorkerState::Activated {
      self.clients_claimed.store(true, Ordering::SeqCst);
    }
    self.set_state(state);
  }

  /// Mark this controller as superseded.
  pub fn retire(&self) {
    self.set_state(WorkerState::Redundant);
    self.clients_claimed.store(false, Ordering::SeqCst);
  }

  /// Populate the static partition with every core asset.
  ///
  /// Either all assets are stored or none are. On failure the controller becomes
  /// redundant and must not be activated.
  pub async fn on_install(&self) -> Result<()> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;
    info!(
      version = self.version(),
      assets = self.config.core_assets.len(),
      "installing"
    );

    if let Err(e) = self.populate_core_assets().await {
      self.set_state(WorkerState::Redundant);
      return Err(e.wrap_err(format!("Install of {} failed", self.version())));
    }

    self.set_state(WorkerState::Installed);
    if self.config.skip_waiting_on_install {
      self.skip_waiting.store(true, Ordering::SeqCst);
    }
    info!(version = self.version(), "installed");
    Ok(())
  }

  async fn populate_core_assets(&self) -> Result<()> {
    let fetches = self.config.core_assets.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch core asset {}: {}", url, e))?;
      if !response.is_success() {
        bail!("Core asset {} returned status {}", url, response.status);
      }
      Ok::<_, Report>((request.key(), response))
    });

    let entries = try_join_all(fetches).await?;
    let partition = self.config.generation.partition(PartitionKind::Static);
    self.storage.put_batch(&partition, &entries)?;

    debug!(partition = %partition, stored = entries.len(), "core assets stored");
    Ok(())
  }

  /// Delete every partition that does not belong to this generation, then take
  /// over open pages.
  pub async fn on_activate(&self) -> Result<ActivationReport> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;
    info!(version = self.version(), "activating");

    let report = match self.cleanup_stale_partitions() {
      Ok(report) => report,
      Err(e) => {
        // Leave it installed so activation can be retried
        self.set_state(WorkerState::Installed);
        return Err(e.wrap_err(format!("Activation of {} failed", self.version())));
      }
    };

    self.set_state(WorkerState::Activated);
    self.clients_claimed.store(true, Ordering::SeqCst);
    info!(
      version = self.version(),
      removed = report.removed.len(),
      "activated"
    );
    Ok(report)
  }

  fn cleanup_stale_partitions(&self) -> Result<ActivationReport> {
    let generation = &self.config.generation;
    let mut report = ActivationReport::default();

    for name in self.storage.partition_names()? {
      if generation.is_live(&name) {
        continue;
      }
      info!(partition = %name, "deleting stale partition");
      if self.storage.delete_partition(&name)? {
        report.removed.push(name);
      }
    }

    for name in generation.live_partitions() {
      self.storage.open_partition(&name)?;
    }

    Ok(report)
  }

  /// Handle a page command.
  pub async fn on_message(&self, message: ControlMessage) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting => {
        info!(version = self.version(), "skip waiting requested");
        self.skip_waiting.store(true, Ordering::SeqCst);
      }
      ControlMessage::ClearCache => {
        // In-flight stores would repopulate the cleared partitions
        self.settle().await;
        let names = self.storage.partition_names()?;
        for name in &names {
          self.storage.delete_partition(name)?;
        }
        info!(cleared = names.len(), "cleared all partitions");
      }
    }
    Ok(())
  }

  /// Handle one intercepted request.
  ///
  /// Network failures never surface here: the caller always gets a response
  /// unless the request is declined.
  pub async fn handle_fetch(&self, request: &Request) -> FetchDisposition {
    if self.state() != WorkerState::Activated {
      return FetchDisposition::Passthrough;
    }

    let class = classify(request, &self.config);
    debug!(url = %request.url, ?class, "intercepted");

    let served = match class {
      RequestClass::Passthrough => return FetchDisposition::Passthrough,
      RequestClass::Api => self.network_with_offline_copy(request).await,
      RequestClass::Image => self.cache_first(request, PartitionKind::Image).await,
      RequestClass::Static => self.cache_first(request, PartitionKind::Static).await,
      RequestClass::Dynamic => self.network_first(request).await,
    };

    FetchDisposition::Respond(served)
  }

  /// Wait for outstanding background stores and evictions.
  pub async fn settle(&self) {
    self.background.settle().await;
  }

  /// Look up a stored response, treating storage failures as misses.
  fn lookup(&self, partitions: &[String], request: &Request) -> Option<Response> {
    match self.storage.lookup_any(partitions, &request.key()) {
      Ok(found) => found.map(|cached| {
        debug!(partition = %cached.partition, url = %request.url, "cache hit");
        cached.response
      }),
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }
}
