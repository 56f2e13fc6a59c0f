//! Network access: request/response types and the outbound HTTP client.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{cache_key, FetchRequest, RequestMode, Response};
