//! Network access for the cache controller.
//!
//! The controller only ever sees the [`Network`] trait; the reqwest-backed
//! [`HttpClient`] is what the host wires in.

mod client;
mod types;

pub use client::HttpClient;
pub use types::{CacheMode, Network, Request, Response};
