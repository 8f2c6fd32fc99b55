//! Network collaborator used by the controller.

mod client;

pub use client::{Fetcher, HttpFetcher};
