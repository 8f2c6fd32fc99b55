//! Responses synthesized when neither the network nor a partition can answer.

use serde_json::json;

use crate::http::Response;

/// Neutral 300x300 rectangle shown in place of an image that cannot be loaded.
pub const PLACEHOLDER_SVG: &str = concat!(
  r##"<svg width="300" height="300" xmlns="http://www.w3.org/2000/svg">"##,
  r##"<rect width="300" height="300" fill="#f3f4f6"/>"##,
  r##"<text x="50%" y="50%" text-anchor="middle" fill="#9ca3af" font-size="16">Image unavailable</text>"##,
  "</svg>"
);

/// Message carried by the offline API response.
pub const OFFLINE_API_ERROR: &str = "offline, no cached data";

/// Placeholder image for a failed image load.
pub fn placeholder_image() -> Response {
  Response::ok("image/svg+xml", PLACEHOLDER_SVG)
}

/// Success envelope carrying an error body, so API callers parse it like any other reply.
pub fn offline_api() -> Response {
  Response::ok(
    "application/json",
    json!({ "error": OFFLINE_API_ERROR }).to_string(),
  )
}

/// Returned for non-navigation requests that failed with nothing stored.
pub fn offline() -> Response {
  Response::new(503)
    .with_header("content-type", "text/plain; charset=utf-8")
    .with_body("offline")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_api_body() {
    let resp = offline_api();
    assert_eq!(resp.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, json!({ "error": "offline, no cached data" }));
  }

  #[test]
  fn test_placeholder_is_svg() {
    let resp = placeholder_image();
    assert_eq!(resp.content_type(), Some("image/svg+xml"));
    let body = String::from_utf8(resp.body).unwrap();
    assert!(body.starts_with("<svg"));
    assert!(body.contains("Image unavailable"));
  }
}
