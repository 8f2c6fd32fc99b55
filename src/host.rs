//! Lifecycle host: decides when a controller installs, waits, activates and
//! which one answers fetch events.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::cache::{CacheStorage, RegistrationSlot};
use crate::controller::{ControlMessage, FetchDisposition, OfflineCache, WorkerState};
use crate::http::Request;
use crate::net::Fetcher;

/// Where a registered controller ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
  /// Installed and activated now
  Activated,
  /// Installed, waiting for the previous generation to be released
  Waiting,
  /// Already active according to storage; nothing was reinstalled
  Resumed,
}

/// Holds the active controller and at most one waiting controller.
pub struct Registration<S: CacheStorage, N: Fetcher> {
  storage: Arc<S>,
  active: Option<Arc<OfflineCache<S, N>>>,
  waiting: Option<Arc<OfflineCache<S, N>>>,
}

impl<S: CacheStorage, N: Fetcher> Registration<S, N> {
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      active: None,
      waiting: None,
    }
  }

  pub fn active(&self) -> Option<&Arc<OfflineCache<S, N>>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Arc<OfflineCache<S, N>>> {
    self.waiting.as_ref()
  }

  /// Attach a controller, resuming the state recorded by an earlier process when
  /// its version is already active or waiting, installing it otherwise.
  pub async fn attach(&mut self, controller: OfflineCache<S, N>) -> Result<RegisterOutcome> {
    let version = controller.version().to_string();

    if self.storage.registration(RegistrationSlot::Active)?.as_deref() == Some(version.as_str()) {
      controller.resume(WorkerState::Activated);
      self.active = Some(Arc::new(controller));
      return Ok(RegisterOutcome::Resumed);
    }

    if self.storage.registration(RegistrationSlot::Waiting)?.as_deref() == Some(version.as_str()) {
      controller.resume(WorkerState::Installed);
      self.waiting = Some(Arc::new(controller));
      return Ok(RegisterOutcome::Waiting);
    }

    self.register(controller).await
  }

  /// Install `controller`. It activates immediately when nothing is active or
  /// when it asked to skip waiting; otherwise it waits.
  ///
  /// An install failure leaves the current active controller in place.
  pub async fn register(&mut self, controller: OfflineCache<S, N>) -> Result<RegisterOutcome> {
    controller.on_install().await?;
    let controller = Arc::new(controller);

    let previous = self.storage.registration(RegistrationSlot::Active)?;
    if previous.is_none() || controller.skip_waiting_requested() {
      self.activate(controller).await?;
      return Ok(RegisterOutcome::Activated);
    }

    info!(
      version = controller.version(),
      active = previous.as_deref().unwrap_or_default(),
      "installed controller is waiting"
    );
    self
      .storage
      .set_registration(RegistrationSlot::Waiting, Some(controller.version()))?;
    if let Some(replaced) = self.waiting.replace(controller) {
      replaced.retire();
    }
    Ok(RegisterOutcome::Waiting)
  }

  /// Activate the waiting controller, if any.
  pub async fn promote_waiting(&mut self) -> Result<bool> {
    match self.waiting.take() {
      Some(controller) => {
        self.activate(controller).await?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn activate(&mut self, controller: Arc<OfflineCache<S, N>>) -> Result<()> {
    // Pending stores of the outgoing generation must land before its
    // partitions are deleted, or they recreate them
    if let Some(old) = &self.active {
      old.settle().await;
    }

    if let Err(e) = controller.on_activate().await {
      // Still installed; keep it around for another attempt
      self.waiting = Some(controller);
      return Err(e);
    }

    self
      .storage
      .set_registration(RegistrationSlot::Active, Some(controller.version()))?;
    self.storage.set_registration(RegistrationSlot::Waiting, None)?;

    if let Some(old) = self.active.replace(controller) {
      old.retire();
    }
    Ok(())
  }

  /// Route a fetch event to the active controller.
  pub async fn dispatch_fetch(&self, request: &Request) -> FetchDisposition {
    match &self.active {
      Some(controller) => controller.handle_fetch(request).await,
      None => FetchDisposition::Passthrough,
    }
  }

  /// Deliver a page command. `SKIP_WAITING` promotes the waiting controller.
  pub async fn post_message(&mut self, message: ControlMessage) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting => {
        let Some(waiting) = self.waiting.clone() else {
          warn!("skip waiting requested with no waiting controller");
          return Ok(());
        };
        waiting.on_message(message).await?;
        self.promote_waiting().await?;
        Ok(())
      }
      ControlMessage::ClearCache => {
        self.settle().await;
        let target = self
          .active
          .as_ref()
          .or(self.waiting.as_ref())
          .ok_or_else(|| eyre!("No controller registered to clear caches"))?;
        target.on_message(message).await
      }
    }
  }

  /// Wait for background work of every held controller.
  pub async fn settle(&self) {
    if let Some(active) = &self.active {
      active.settle().await;
    }
    if let Some(waiting) = &self.waiting {
      waiting.settle().await;
    }
  }
}
