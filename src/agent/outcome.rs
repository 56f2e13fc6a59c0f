//! Typed results of the lifecycle handlers.

use std::fmt;

use crate::cache::CachedResponse;
use crate::net::Response;

/// How a fetch was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Served from cache, network never touched
  Cached(CachedResponse),
  /// Live response from the network (any status)
  Network(Response),
  /// Network failed on a navigation; the cached root page stands in
  OfflineFallback(CachedResponse),
  /// Nothing to answer with; the caller sees a failed fetch
  Unavailable,
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      FetchOutcome::Cached(cached) | FetchOutcome::OfflineFallback(cached) => {
        Some(&cached.response)
      }
      FetchOutcome::Network(response) => Some(response),
      FetchOutcome::Unavailable => None,
    }
  }

  /// Short label for where the answer came from.
  pub fn source(&self) -> &'static str {
    match self {
      FetchOutcome::Cached(_) => "cache",
      FetchOutcome::Network(_) => "network",
      FetchOutcome::OfflineFallback(_) => "offline-fallback",
      FetchOutcome::Unavailable => "unavailable",
    }
  }
}

/// Result of one pass over the offline order queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Orders a POST was attempted for
  pub attempted: usize,
  /// Orders the server accepted and that left the queue
  pub synced: usize,
  /// Fingerprints of orders that stayed queued
  pub failed: Vec<String>,
}

impl fmt::Display for SyncReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} attempted, {} synced, {} pending",
      self.attempted,
      self.synced,
      self.failed.len()
    )
  }
}

/// What handling a lifecycle event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed { cache_name: String, cached: usize },
  Fetched(FetchOutcome),
  Synced(SyncReport),
  /// Sync event with a tag this agent does not handle
  Ignored { tag: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unavailable_has_no_response() {
    assert!(FetchOutcome::Unavailable.response().is_none());
    assert_eq!(FetchOutcome::Unavailable.source(), "unavailable");
  }

  #[test]
  fn test_report_display() {
    let report = SyncReport {
      attempted: 3,
      synced: 2,
      failed: vec!["abc".to_string()],
    };
    assert_eq!(report.to_string(), "3 attempted, 2 synced, 1 pending");
  }
}
