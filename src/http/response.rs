use std::collections::BTreeMap;

/// A complete HTTP response with its body already read.
///
/// Bodies are owned buffers, so `clone()` gives an independent copy: the copy
/// handed back to the page and the copy written to a partition never share a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  /// Header names are stored lowercase
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: Vec::new(),
    }
  }

  /// A 200 response with the given content type and body.
  pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self::new(200)
      .with_header("content-type", content_type)
      .with_body(body)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Exactly 200, the only status worth keeping for static and media assets.
  pub fn is_clean_success(&self) -> bool {
    self.status == 200
  }
}
