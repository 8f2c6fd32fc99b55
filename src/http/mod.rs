//! Request and response values exchanged between the host, the controller and the network.

mod request;
mod response;

pub use request::{Destination, Request, RequestKey, RequestMode};
pub use response::Response;

pub use reqwest::Method;
