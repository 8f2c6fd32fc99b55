//! Request classification.

use reqwest::Method;

use super::CacheConfig;
use crate::http::{Destination, Request};

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  /// External data API: network, then stored copy, then an offline JSON error
  Api,
  /// Image loads: cache-first into the image partition
  Image,
  /// Own origin and trusted CDNs: cache-first into the static partition
  Static,
  /// Everything else: network-first into the dynamic partition
  Dynamic,
}

/// Decide how to handle `request`. Rules are checked in order; the first match wins.
pub fn classify(request: &Request, config: &CacheConfig) -> RequestClass {
  if request.method != Method::GET {
    return RequestClass::Passthrough;
  }

  let host = request.url.host_str().unwrap_or_default();

  if config.api_hosts.iter().any(|api| host_matches(host, api)) {
    return RequestClass::Api;
  }

  if request.destination == Destination::Image {
    return RequestClass::Image;
  }

  if request.url.origin() == config.origin.origin()
    || config.trusted_hosts.iter().any(|cdn| host_matches(host, cdn))
  {
    return RequestClass::Static;
  }

  RequestClass::Dynamic
}

/// `host` equals `pattern` or is a subdomain of it.
fn host_matches(host: &str, pattern: &str) -> bool {
  let host = host.to_ascii_lowercase();
  let pattern = pattern.trim_start_matches('.').to_ascii_lowercase();
  if pattern.is_empty() {
    return false;
  }
  host == pattern || host.ends_with(&format!(".{}", pattern))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::controller::testing::config;
  use url::Url;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_get_passes_through() {
    let config = config();
    let post = Request::new(Method::POST, Url::parse("https://api.example.dev/data").unwrap());
    let put = Request::new(Method::PUT, Url::parse("https://shop.example/index.html").unwrap());
    assert_eq!(classify(&post, &config), RequestClass::Passthrough);
    assert_eq!(classify(&put, &config), RequestClass::Passthrough);
  }

  #[test]
  fn test_api_host_wins_over_image_destination() {
    let config = config();
    assert_eq!(
      classify(&get("https://api.example.dev/data?action=getStoreData"), &config),
      RequestClass::Api
    );
    assert_eq!(
      classify(&get("https://eu.api.example.dev/data"), &config),
      RequestClass::Api
    );
    let image = get("https://api.example.dev/image/1").with_destination(Destination::Image);
    assert_eq!(classify(&image, &config), RequestClass::Api);
  }

  #[test]
  fn test_image_destination() {
    let config = config();
    let own = get("https://shop.example/icons/icon-192.png").with_destination(Destination::Image);
    let remote = get("https://images.example.net/p/1.jpg").with_destination(Destination::Image);
    assert_eq!(classify(&own, &config), RequestClass::Image);
    assert_eq!(classify(&remote, &config), RequestClass::Image);
  }

  #[test]
  fn test_own_origin_and_trusted_cdns_are_static() {
    let config = config();
    assert_eq!(classify(&get("https://shop.example/app.js"), &config), RequestClass::Static);
    assert_eq!(
      classify(&get("https://fonts.googleapis.com/css2?family=Inter"), &config),
      RequestClass::Static
    );
    assert_eq!(
      classify(&get("https://fonts.gstatic.com/s/inter.woff2"), &config),
      RequestClass::Static
    );
  }

  #[test]
  fn test_everything_else_is_dynamic() {
    let config = config();
    assert_eq!(
      classify(&get("https://cdn.jsdelivr.net/lib.js"), &config),
      RequestClass::Dynamic
    );
    // Same host, different scheme is a different origin
    assert_eq!(classify(&get("http://shop.example/app.js"), &config), RequestClass::Dynamic);
    // Lookalike hosts do not match by substring
    assert_eq!(
      classify(&get("https://notapi.example.dev.evil.io/data"), &config),
      RequestClass::Dynamic
    );
  }

  #[test]
  fn test_host_matches() {
    assert!(host_matches("api.example.dev", "api.example.dev"));
    assert!(host_matches("x.api.example.dev", "api.example.dev"));
    assert!(host_matches("API.example.dev", ".api.example.dev"));
    assert!(!host_matches("myapi.example.dev", "api.example.dev"));
    assert!(!host_matches("api.example.dev", ""));
  }
}
