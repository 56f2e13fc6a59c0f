//! The offline cache agent: install, fetch and sync handlers behind one
//! dispatch entry point.

mod outcome;

pub use outcome::{EventOutcome, FetchOutcome, SyncReport};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::event::LifecycleEvent;
use crate::net::{cache_key, FetchRequest, Network, Response};
use crate::store::{fingerprint, OrderRepository};

/// Resolved settings the agent runs with.
#[derive(Debug, Clone)]
pub struct AgentSettings {
  pub origin: Url,
  pub cache_name: String,
  /// Asset URLs in precache order
  pub assets: Vec<Url>,
  pub sync_endpoint: Url,
  pub sync_tag: String,
}

impl AgentSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;

    let assets = config
      .assets
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let sync_endpoint = origin
      .join(&config.sync.endpoint)
      .map_err(|e| eyre!("Invalid sync endpoint '{}': {}", config.sync.endpoint, e))?;

    Ok(Self {
      origin,
      cache_name: config.cache_name.clone(),
      assets,
      sync_endpoint,
      sync_tag: config.sync.tag.clone(),
    })
  }

  /// Cache key of the root document served to offline navigations.
  fn root_key(&self) -> Result<String> {
    let root = self
      .origin
      .join("/")
      .map_err(|e| eyre!("Failed to resolve root of {}: {}", self.origin, e))?;
    Ok(cache_key(&root))
  }
}

/// Offline cache agent.
///
/// Owns the cache, the network and the order queue and answers lifecycle
/// events one at a time.
pub struct OfflineCacheAgent<C, N, R> {
  settings: AgentSettings,
  cache: C,
  network: N,
  orders: R,
}

impl<C, N, R> OfflineCacheAgent<C, N, R>
where
  C: CacheStorage,
  N: Network,
  R: OrderRepository,
{
  pub fn new(settings: AgentSettings, cache: C, network: N, orders: R) -> Self {
    Self {
      settings,
      cache,
      network,
      orders,
    }
  }

  pub fn settings(&self) -> &AgentSettings {
    &self.settings
  }

  pub fn cache(&self) -> &C {
    &self.cache
  }

  pub fn orders(&self) -> &R {
    &self.orders
  }

  /// Single entry point for lifecycle events.
  pub async fn handle(&self, event: LifecycleEvent) -> Result<EventOutcome> {
    match event {
      LifecycleEvent::Install => {
        let cached = self.install().await?;
        Ok(EventOutcome::Installed {
          cache_name: self.settings.cache_name.clone(),
          cached,
        })
      }
      LifecycleEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.fetch(&request).await?)),
      LifecycleEvent::Sync { tag } => {
        if tag != self.settings.sync_tag {
          debug!(%tag, "Ignoring sync event");
          return Ok(EventOutcome::Ignored { tag });
        }
        Ok(EventOutcome::Synced(self.sync_offline_orders().await?))
      }
    }
  }

  /// Precache the asset list.
  ///
  /// Every asset must come back with an OK status; otherwise nothing is
  /// stored and the error is returned.
  pub async fn install(&self) -> Result<usize> {
    let cache_name = &self.settings.cache_name;
    self.cache.open(cache_name)?;

    let fetches = self.settings.assets.iter().map(|url| async move {
      let request = FetchRequest::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          url,
          response.status
        ));
      }

      Ok::<(String, Response), color_eyre::Report>((request.cache_key(), response))
    });

    let entries = try_join_all(fetches).await?;
    self.cache.put_all(cache_name, &entries)?;

    info!(cache = %cache_name, assets = entries.len(), "Install complete");
    Ok(entries.len())
  }

  /// Answer a request: cache, then network, then the cached root page for
  /// navigations.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
    let key = request.cache_key();

    // Only GETs are ever matched against the cache
    if request.method == reqwest::Method::GET {
      if let Some(cached) = self.cache.match_any(&key)? {
        debug!(url = %key, cache = %cached.cache_name, "Cache hit");
        return Ok(FetchOutcome::Cached(cached));
      }
    }

    debug!(url = %key, "Cache miss");
    match self.network.fetch(request).await {
      Ok(response) => Ok(FetchOutcome::Network(response)),
      Err(e) => {
        debug!(url = %key, error = %e, "Network request failed");

        if request.mode.is_navigation() {
          if let Some(root) = self.cache.match_any(&self.settings.root_key()?)? {
            info!(url = %key, "Serving cached root page while offline");
            return Ok(FetchOutcome::OfflineFallback(root));
          }
        }

        Ok(FetchOutcome::Unavailable)
      }
    }
  }

  /// POST every queued order, dropping each one the server accepts.
  ///
  /// Orders are sent one after another. The queue is persisted after every
  /// accepted order, so a crash mid-pass loses nothing.
  pub async fn sync_offline_orders(&self) -> Result<SyncReport> {
    let mut orders = self.orders.load()?;
    let mut report = SyncReport::default();

    if orders.is_empty() {
      return Ok(report);
    }

    let endpoint = &self.settings.sync_endpoint;
    let snapshot = orders.clone();

    for order in &snapshot {
      report.attempted += 1;
      let id = fingerprint(order);

      match self.network.post_json(endpoint, order).await {
        Ok(response) if response.is_ok() => {
          // First value-equal entry goes; an identical twin stays queued
          if let Some(index) = orders.iter().position(|o| o == order) {
            orders.remove(index);
            // A failed write only affects this order; the next save catches up
            if let Err(e) = self.orders.save(&orders) {
              error!(order = %id, error = %e, "Failed to persist order queue");
              report.failed.push(id);
              continue;
            }
          }
          report.synced += 1;
          debug!(order = %id, "Order synced");
        }
        Ok(response) => {
          warn!(order = %id, status = response.status, "Server rejected order");
          report.failed.push(id);
        }
        Err(e) => {
          error!(order = %id, error = %e, "Order sync failed");
          report.failed.push(id);
        }
      }
    }

    info!(
      attempted = report.attempted,
      synced = report.synced,
      pending = report.failed.len(),
      "Sync pass finished"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::net::fake::{FakeNetwork, Route};
  use crate::net::RequestMode;
  use crate::store::{LocalStorage, OfflineOrders, OFFLINE_ORDERS_KEY};
  use serde_json::{json, Value};
  use std::sync::Mutex;

  const ORIGIN: &str = "http://shop.test";

  fn settings() -> AgentSettings {
    let config = Config {
      origin: ORIGIN.to_string(),
      ..Config::default()
    };
    AgentSettings::from_config(&config).unwrap()
  }

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap().into_connection())
  }

  fn offline_orders() -> OfflineOrders {
    OfflineOrders::new(LocalStorage::new(
      Database::open_in_memory().unwrap().into_connection(),
    ))
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn full(path: &str) -> String {
    url(path).to_string()
  }

  /// Network where every default asset is served.
  fn online_network() -> FakeNetwork {
    crate::config::DEFAULT_ASSETS
      .iter()
      .fold(FakeNetwork::new(), |net, path| {
        net.route(&full(path), Route::Status(200, *path))
      })
  }

  /// Records every save so writes can be counted.
  #[derive(Default)]
  struct RecordingOrders {
    orders: Mutex<Vec<Value>>,
    saves: Mutex<Vec<Vec<Value>>>,
  }

  impl RecordingOrders {
    fn with(orders: Vec<Value>) -> Self {
      Self {
        orders: Mutex::new(orders),
        saves: Mutex::default(),
      }
    }
  }

  impl OrderRepository for RecordingOrders {
    fn load(&self) -> Result<Vec<Value>> {
      Ok(self.orders.lock().unwrap().clone())
    }

    fn save(&self, orders: &[Value]) -> Result<()> {
      *self.orders.lock().unwrap() = orders.to_vec();
      self.saves.lock().unwrap().push(orders.to_vec());
      Ok(())
    }
  }

  /// Loads fine, refuses every write.
  struct ReadOnlyOrders(Vec<Value>);

  impl OrderRepository for ReadOnlyOrders {
    fn load(&self) -> Result<Vec<Value>> {
      Ok(self.0.clone())
    }

    fn save(&self, _orders: &[Value]) -> Result<()> {
      Err(eyre!("storage quota exceeded"))
    }
  }

  #[tokio::test]
  async fn test_install_caches_every_asset() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());

    let cached = agent.install().await.unwrap();
    assert_eq!(cached, 7);

    let keys = agent.cache().keys("orders-v1").unwrap();
    let expected: Vec<String> = crate::config::DEFAULT_ASSETS.iter().map(|p| full(p)).collect();
    assert_eq!(keys, expected);
  }

  #[tokio::test]
  async fn test_install_failure_caches_nothing() {
    // Every asset but the last one is reachable
    let network = crate::config::DEFAULT_ASSETS
      .iter()
      .filter(|path| **path != "/icon-512.png")
      .fold(FakeNetwork::new(), |net, path| {
        net.route(&full(path), Route::Status(200, *path))
      });
    let agent = OfflineCacheAgent::new(settings(), storage(), network, offline_orders());

    assert!(agent.install().await.is_err());
    assert!(agent.cache().keys("orders-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let network = FakeNetwork::new().route(&full("/style.css"), Route::Status(404, "missing"));
    let network = crate::config::DEFAULT_ASSETS
      .iter()
      .filter(|path| **path != "/style.css")
      .fold(network, |net, path| net.route(&full(path), Route::Status(200, *path)));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, offline_orders());

    let err = agent.install().await.unwrap_err();
    assert!(err.to_string().contains("status 404"));
    assert!(agent.cache().keys("orders-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cached_request_never_hits_network() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());
    agent.install().await.unwrap();
    let installs = agent.network.fetched().len();

    let outcome = agent
      .fetch(&FetchRequest::get(url("/style.css")))
      .await
      .unwrap();

    assert!(matches!(outcome, FetchOutcome::Cached(_)));
    assert_eq!(outcome.response().unwrap().body, b"/style.css");
    assert_eq!(agent.network.fetched().len(), installs);
  }

  #[tokio::test]
  async fn test_fragment_does_not_defeat_cache() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());
    agent.install().await.unwrap();

    let outcome = agent
      .fetch(&FetchRequest::get(url("/index.html#orders")))
      .await
      .unwrap();
    assert_eq!(outcome.source(), "cache");
  }

  #[tokio::test]
  async fn test_miss_goes_to_network_without_caching() {
    let network = FakeNetwork::new().route(&full("/api/orders"), Route::Status(200, "[]"));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, offline_orders());

    let first = agent
      .fetch(&FetchRequest::get(url("/api/orders")))
      .await
      .unwrap();
    let second = agent
      .fetch(&FetchRequest::get(url("/api/orders")))
      .await
      .unwrap();

    assert!(matches!(first, FetchOutcome::Network(_)));
    assert!(matches!(second, FetchOutcome::Network(_)));
    assert_eq!(agent.network.fetched().len(), 2);
    assert!(agent.cache().match_any(&full("/api/orders")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_error_status_is_still_a_network_response() {
    let network = FakeNetwork::new().route(&full("/missing"), Route::Status(404, "nope"));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, offline_orders());

    let outcome = agent
      .fetch(&FetchRequest::navigate(url("/missing")))
      .await
      .unwrap();
    assert_eq!(outcome.response().unwrap().status, 404);
    assert_eq!(outcome.source(), "network");
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_root() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());
    agent.install().await.unwrap();

    let outcome = agent
      .fetch(&FetchRequest::navigate(url("/orders/42")))
      .await
      .unwrap();

    match outcome {
      FetchOutcome::OfflineFallback(root) => {
        assert_eq!(root.response.url, full("/"));
        assert_eq!(root.response.body, b"/");
      }
      other => panic!("expected fallback, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_offline_subresource_is_unavailable() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());
    agent.install().await.unwrap();

    let outcome = agent
      .fetch(&FetchRequest::get(url("/api/orders")))
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::Unavailable));
  }

  #[tokio::test]
  async fn test_offline_navigation_without_cached_root() {
    let agent = OfflineCacheAgent::new(settings(), storage(), FakeNetwork::new(), offline_orders());

    let outcome = agent
      .fetch(&FetchRequest::navigate(url("/")))
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::Unavailable));
  }

  #[tokio::test]
  async fn test_non_get_skips_cache() {
    let agent = OfflineCacheAgent::new(settings(), storage(), online_network(), offline_orders());
    agent.install().await.unwrap();

    let request = FetchRequest {
      url: url("/index.html"),
      method: reqwest::Method::POST,
      mode: RequestMode::SameOrigin,
    };
    let outcome = agent.fetch(&request).await.unwrap();
    // A POST for a cached URL still goes to the network
    assert_eq!(outcome.source(), "network");
  }

  #[tokio::test]
  async fn test_sync_keeps_failed_orders() {
    let a = json!({"id": "A", "address": "1 Main St"});
    let b = json!({"id": "B", "address": "2 Main St"});
    let repo = offline_orders();
    repo.save(&[a.clone(), b.clone()]).unwrap();

    let network = FakeNetwork::new()
      .post_result(Route::Status(200, "ok"))
      .post_result(Route::Offline);
    let agent = OfflineCacheAgent::new(settings(), storage(), network, repo);

    let report = agent.sync_offline_orders().await.unwrap();

    assert_eq!(agent.orders().load().unwrap(), vec![b.clone()]);
    assert_eq!(agent.network.posted(), vec![a, b.clone()]);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, vec![fingerprint(&b)]);
  }

  #[tokio::test]
  async fn test_sync_keeps_rejected_orders() {
    let a = json!({"id": "A"});
    let orders = RecordingOrders::with(vec![a.clone()]);
    let network = FakeNetwork::new().post_result(Route::Status(500, "boom"));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, orders);

    let report = agent.sync_offline_orders().await.unwrap();

    assert_eq!(report.synced, 0);
    assert_eq!(agent.orders().load().unwrap(), vec![a]);
    assert!(agent.orders().saves.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_sync_writes_once_per_success() {
    let orders = RecordingOrders::with(vec![json!(1), json!(2), json!(3)]);
    let network = FakeNetwork::new()
      .post_result(Route::Status(201, ""))
      .post_result(Route::Offline)
      .post_result(Route::Status(200, ""));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, orders);

    agent.sync_offline_orders().await.unwrap();

    let saves = agent.orders().saves.lock().unwrap().clone();
    assert_eq!(saves, vec![vec![json!(2), json!(3)], vec![json!(2)]]);
  }

  #[tokio::test]
  async fn test_empty_queue_makes_no_calls() {
    let orders = RecordingOrders::default();
    let agent = OfflineCacheAgent::new(settings(), storage(), FakeNetwork::new(), orders);

    let report = agent.sync_offline_orders().await.unwrap();

    assert_eq!(report, SyncReport::default());
    assert!(agent.network.posted().is_empty());
    assert!(agent.network.fetched().is_empty());
    assert!(agent.orders().saves.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_empty_queue_leaves_storage_untouched() {
    let agent = OfflineCacheAgent::new(settings(), storage(), FakeNetwork::new(), offline_orders());

    agent.sync_offline_orders().await.unwrap();
    agent.orders().save(&[]).unwrap();
    agent.sync_offline_orders().await.unwrap();

    assert!(agent.orders().load().unwrap().is_empty());
    assert!(agent.network.posted().is_empty());
  }

  #[tokio::test]
  async fn test_duplicate_orders_removed_one_at_a_time() {
    let twin = json!({"id": "T"});
    let orders = RecordingOrders::with(vec![twin.clone(), twin.clone()]);
    let network = FakeNetwork::new()
      .post_result(Route::Offline)
      .post_result(Route::Status(200, ""));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, orders);

    agent.sync_offline_orders().await.unwrap();

    // The second copy was accepted but the first matching entry is the one removed
    assert_eq!(agent.orders().load().unwrap(), vec![twin]);
  }

  #[tokio::test]
  async fn test_malformed_queue_aborts_pass() {
    let storage_conn = Database::open_in_memory().unwrap().into_connection();
    let local = LocalStorage::new(storage_conn);
    local.set_item(OFFLINE_ORDERS_KEY, "[{\"id\": ").unwrap();
    let agent = OfflineCacheAgent::new(
      settings(),
      storage(),
      FakeNetwork::new().post_result(Route::Status(200, "")),
      OfflineOrders::new(local),
    );

    assert!(agent.sync_offline_orders().await.is_err());
    assert!(agent.network.posted().is_empty());
  }

  #[tokio::test]
  async fn test_dispatch_routes_events() {
    let orders = RecordingOrders::with(vec![json!({"id": 1})]);
    let network = online_network().post_result(Route::Status(200, ""));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, orders);

    let installed = agent.handle(LifecycleEvent::Install).await.unwrap();
    assert!(matches!(installed, EventOutcome::Installed { cached: 7, .. }));

    let fetched = agent
      .handle(LifecycleEvent::Fetch(FetchRequest::get(url("/script.js"))))
      .await
      .unwrap();
    assert!(matches!(fetched, EventOutcome::Fetched(FetchOutcome::Cached(_))));

    let synced = agent
      .handle(LifecycleEvent::Sync {
        tag: "sync-orders".to_string(),
      })
      .await
      .unwrap();
    match synced {
      EventOutcome::Synced(report) => assert_eq!(report.synced, 1),
      other => panic!("expected sync, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_other_sync_tags_are_ignored() {
    let orders = RecordingOrders::with(vec![json!({"id": 1})]);
    let network = FakeNetwork::new().post_result(Route::Status(200, ""));
    let agent = OfflineCacheAgent::new(settings(), storage(), network, orders);

    let outcome = agent
      .handle(LifecycleEvent::Sync {
        tag: "sync-photos".to_string(),
      })
      .await
      .unwrap();

    assert!(matches!(outcome, EventOutcome::Ignored { ref tag } if tag == "sync-photos"));
    assert!(agent.network.posted().is_empty());
    assert_eq!(agent.orders().load().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_queue_write_does_not_stop_the_pass() {
    let a = json!({"id": "A"});
    let b = json!({"id": "B"});
    let network = FakeNetwork::new()
      .post_result(Route::Status(200, ""))
      .post_result(Route::Status(200, ""));
    let agent = OfflineCacheAgent::new(
      settings(),
      storage(),
      network,
      ReadOnlyOrders(vec![a.clone(), b.clone()]),
    );

    let report = agent.sync_offline_orders().await.unwrap();

    assert_eq!(agent.network.posted(), vec![a.clone(), b.clone()]);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.synced, 0);
    assert_eq!(report.failed, vec![fingerprint(&a), fingerprint(&b)]);
  }
}
