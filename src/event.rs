use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::net::{FetchRequest, Network};

/// Lifecycle events delivered to the agent
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
  /// Precache the application shell
  Install,
  /// Answer an outgoing request
  Fetch(FetchRequest),
  /// Background sync fired with the given tag
  Sync { tag: String },
}

/// Tracks reachability between probes.
#[derive(Debug, Default)]
pub struct Connectivity {
  online: Option<bool>,
}

impl Connectivity {
  /// Record a probe result. Returns true when the agent just came online,
  /// including the first successful probe after startup.
  pub fn observe(&mut self, reachable: bool) -> bool {
    let came_online = reachable && self.online != Some(true);
    if self.online != Some(reachable) {
      info!(online = reachable, "Connectivity changed");
    }
    self.online = Some(reachable);
    came_online
  }
}

/// Produces sync events whenever the origin becomes reachable again
pub struct ConnectivityWatcher {
  rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl ConnectivityWatcher {
  /// Probe `probe` with a GET every `interval` and emit a sync event tagged
  /// `tag` on each offline-to-online transition.
  pub fn spawn<N>(network: N, probe: FetchRequest, interval: Duration, tag: String) -> Self
  where
    N: Network + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut connectivity = Connectivity::default();

      loop {
        ticker.tick().await;

        // Any HTTP answer means the server is reachable
        let reachable = network.fetch(&probe).await.is_ok();
        debug!(url = %probe.url, reachable, "Connectivity probe");

        if connectivity.observe(reachable)
          && tx
            .send(LifecycleEvent::Sync { tag: tag.clone() })
            .is_err()
        {
          break;
        }

        if tx.is_closed() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<LifecycleEvent> {
    self.rx.recv().await
  }
}
