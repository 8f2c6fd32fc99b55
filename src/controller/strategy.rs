//! Caching strategies applied to each request class.

use std::sync::Arc;

use tracing::debug;

use super::{fallback, OfflineCache, PartitionKind, Served};
use crate::cache::{enforce_limit, CacheSource, CacheStorage};
use crate::http::{Request, Response};
use crate::net::Fetcher;

impl<S: CacheStorage, N: Fetcher> OfflineCache<S, N> {
  /// Data API: always try the network. Keep a copy of every successful reply so
  /// the same request can be answered offline later.
  pub(super) async fn network_with_offline_copy(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_copy(PartitionKind::Dynamic, request, &response);
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "api unreachable");
        match self.lookup(&[self.partition(PartitionKind::Dynamic)], request) {
          Some(cached) => Served::new(cached, CacheSource::Offline),
          None => Served::new(fallback::offline_api(), CacheSource::Placeholder),
        }
      }
    }
  }

  /// Serve any copy stored by this generation; otherwise fetch and keep clean
  /// successes in `kind`'s partition.
  pub(super) async fn cache_first(&self, request: &Request, kind: PartitionKind) -> Served {
    let live = self.config.generation.live_partitions();
    if let Some(cached) = self.lookup(&live, request) {
      return Served::new(cached, CacheSource::Cache);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_clean_success() {
          self.store_copy(kind, request, &response);
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "offline with no stored copy");
        match kind {
          PartitionKind::Image => {
            Served::new(fallback::placeholder_image(), CacheSource::Placeholder)
          }
          _ => self.navigation_fallback(request),
        }
      }
    }
  }

  /// Fetch first; fall back to this request's stored copy, then to the app shell.
  pub(super) async fn network_first(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_clean_success() {
          self.store_copy(PartitionKind::Dynamic, request, &response);
        }
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying stored copy");
        match self.lookup(&[self.partition(PartitionKind::Dynamic)], request) {
          Some(cached) => Served::new(cached, CacheSource::Offline),
          None => self.navigation_fallback(request),
        }
      }
    }
  }

  /// Navigations degrade to the stored root document. Other requests get a
  /// plain offline response.
  fn navigation_fallback(&self, request: &Request) -> Served {
    if request.is_navigation() {
      let shell = Request::get(self.config.root_document.clone());
      if let Some(cached) = self.lookup(&self.config.generation.live_partitions(), &shell) {
        return Served::new(cached, CacheSource::Offline);
      }
    }
    Served::new(fallback::offline(), CacheSource::Placeholder)
  }

  fn partition(&self, kind: PartitionKind) -> String {
    self.config.generation.partition(kind)
  }

  /// Store an independent copy of `response` in the background, then trim the
  /// partition if it is bounded.
  fn store_copy(&self, kind: PartitionKind, request: &Request, response: &Response) {
    let storage = Arc::clone(&self.storage);
    let partition = self.partition(kind);
    let limit = self.config.generation.limit(kind);
    let key = request.key();
    let copy = response.clone();

    self.background.spawn("store", async move {
      storage.put(&partition, &key, &copy)?;
      if let Some(max) = limit {
        enforce_limit(storage.as_ref(), &partition, max)?;
      }
      Ok(())
    });
  }
}
