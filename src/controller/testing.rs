//! Scripted network and fixtures for controller tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::{CacheConfig, Generation, Limits, OfflineCache};
use crate::cache::SqliteStorage;
use crate::http::{Request, Response};
use crate::net::Fetcher;

pub const ORIGIN: &str = "https://shop.example/";
pub const API: &str = "https://api.example.dev/";

/// In-memory network: answers from a route table and records every request.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  hits: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn route(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of fetches attempted for `url`.
  pub fn hits(&self, url: &str) -> usize {
    self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
  }

  pub fn total_hits(&self) -> usize {
    self.hits.lock().unwrap().len()
  }
}

impl Fetcher for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.hits.lock().unwrap().push(url.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", url));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&url)
        .cloned()
        .unwrap_or_else(|| Response::new(404)),
    )
  }
}

pub fn url(s: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(s).unwrap()
}

pub fn config_for(version: &str) -> CacheConfig {
  CacheConfig {
    generation: Generation::new(version, Limits::default()),
    origin: url("/"),
    api_hosts: vec!["api.example.dev".to_string()],
    trusted_hosts: vec![
      "fonts.googleapis.com".to_string(),
      "fonts.gstatic.com".to_string(),
    ],
    core_assets: vec![
      url("./"),
      url("index.html"),
      url("manifest.json"),
      url("icons/icon-192.png"),
      Url::parse("https://fonts.googleapis.com/css2?family=Inter").unwrap(),
    ],
    root_document: url("./"),
    skip_waiting_on_install: true,
  }
}

pub fn config() -> CacheConfig {
  config_for("v1")
}

/// A network that serves every core asset of `config`.
pub fn network_with_core_assets(config: &CacheConfig) -> Arc<FakeNetwork> {
  let network = Arc::new(FakeNetwork::default());
  for asset in &config.core_assets {
    network.route(
      asset.as_str(),
      Response::ok("text/plain", format!("asset {}", asset.path())),
    );
  }
  network.route(url("./").as_str(), Response::ok("text/html", "<html>shell</html>"));
  network
}

pub type TestCache = OfflineCache<SqliteStorage, FakeNetwork>;

/// An installed and activated controller over a fresh in-memory database.
pub async fn active_cache(config: CacheConfig) -> (TestCache, Arc<FakeNetwork>, Arc<SqliteStorage>) {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let network = network_with_core_assets(&config);
  let cache = OfflineCache::new(config, Arc::clone(&storage), Arc::clone(&network));
  cache.on_install().await.unwrap();
  cache.on_activate().await.unwrap();
  (cache, network, storage)
}
