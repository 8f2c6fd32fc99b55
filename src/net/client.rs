use std::future::Future;

use color_eyre::{eyre::eyre, Result};

use crate::http::{Request, Response};

/// Performs a single network attempt for a request.
///
/// An `Err` means the network was unreachable. Any HTTP status, including
/// 4xx and 5xx, is a successful fetch and comes back as `Ok`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP client wrapper
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("storecache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = resp.status().as_u16();
    let mut response = Response::new(status);
    for (name, value) in resp.headers() {
      // Non-UTF-8 header values are dropped
      if let Ok(value) = value.to_str() {
        response = response.with_header(name.as_str(), value);
      }
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(response.with_body(body.to_vec()))
  }
}
