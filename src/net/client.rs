use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use url::Url;

use crate::config::Config;

use super::types::{FetchRequest, Response};

/// Outbound HTTP as seen by the agent.
///
/// `Err` always means the request never produced a response (DNS, connect,
/// timeout, broken body). Any HTTP status, including 4xx/5xx, is `Ok`.
pub trait Network: Send + Sync {
  /// Perform the request as-is.
  fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Response>> + Send;

  /// POST a JSON document.
  fn post_json(&self, url: &Url, body: &Value) -> impl Future<Output = Result<Response>> + Send;
}

impl<N: Network> Network for std::sync::Arc<N> {
  fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<Response>> + Send {
    (**self).fetch(request)
  }

  fn post_json(&self, url: &Url, body: &Value) -> impl Future<Output = Result<Response>> + Send {
    (**self).post_json(url, body)
  }
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .user_agent(concat!("orders-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    into_response(response).await
  }

  async fn post_json(&self, url: &Url, body: &Value) -> Result<Response> {
    let payload =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;

    let response = self
      .client
      .post(url.clone())
      .header(CONTENT_TYPE, "application/json")
      .body(payload)
      .send()
      .await
      .map_err(|e| eyre!("Failed to POST {}: {}", url, e))?;

    into_response(response).await
  }
}

/// Buffer a reqwest response into our own type.
async fn into_response(response: reqwest::Response) -> Result<Response> {
  let url = response.url().to_string();
  let status = response.status().as_u16();

  // Non-UTF8 header values are dropped rather than mangled
  let headers = response
    .headers()
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = response
    .bytes()
    .await
    .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
    .to_vec();

  Ok(Response {
    url,
    status,
    headers,
    body,
  })
}
