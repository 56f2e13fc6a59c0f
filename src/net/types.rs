use reqwest::Method;
use url::Url;

/// How the page issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RequestMode {
  /// Full page load
  Navigate,
  #[default]
  SameOrigin,
  NoCors,
  Cors,
}

impl RequestMode {
  pub fn is_navigation(self) -> bool {
    matches!(self, RequestMode::Navigate)
  }
}

/// An outgoing request intercepted by the agent.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
}

impl FetchRequest {
  /// A plain sub-resource GET.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::SameOrigin,
    }
  }

  /// A full page navigation.
  #[allow(dead_code)]
  pub fn navigate(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Navigate,
    }
  }

  /// The key this request is stored under in a cache.
  ///
  /// Fragments never reach the server, so they are not part of the key.
  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

/// Normalize a URL into a cache key.
pub fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A response, either live from the network or replayed from cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// URL the response was produced for
  pub url: String,
  pub status: u16,
  /// Header pairs in the order the server sent them
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// True for any status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
