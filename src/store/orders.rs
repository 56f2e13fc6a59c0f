//! Queue of orders captured while offline.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::local::LocalStorage;

/// Storage key holding the JSON array of pending orders.
pub const OFFLINE_ORDERS_KEY: &str = "offline_orders";

/// Ordered list of pending offline orders.
///
/// Orders are opaque JSON values; the agent never looks inside them.
pub trait OrderRepository: Send + Sync {
  /// Read the whole list. A missing list is empty.
  fn load(&self) -> Result<Vec<Value>>;

  /// Replace the whole list.
  fn save(&self, orders: &[Value]) -> Result<()>;

  /// Append one order to the end of the list.
  fn enqueue(&self, order: Value) -> Result<()> {
    let mut orders = self.load()?;
    orders.push(order);
    self.save(&orders)
  }
}

/// Orders kept as a JSON array under [`OFFLINE_ORDERS_KEY`].
pub struct OfflineOrders {
  storage: LocalStorage,
}

impl OfflineOrders {
  pub fn new(storage: LocalStorage) -> Self {
    Self { storage }
  }
}

impl OrderRepository for OfflineOrders {
  fn load(&self) -> Result<Vec<Value>> {
    match self.storage.get_item(OFFLINE_ORDERS_KEY)? {
      Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)
        .map_err(|e| eyre!("Failed to parse stored {}: {}", OFFLINE_ORDERS_KEY, e)),
      _ => Ok(Vec::new()),
    }
  }

  fn save(&self, orders: &[Value]) -> Result<()> {
    let raw = serde_json::to_string(orders)
      .map_err(|e| eyre!("Failed to serialize {}: {}", OFFLINE_ORDERS_KEY, e))?;
    self.storage.set_item(OFFLINE_ORDERS_KEY, &raw)
  }
}

/// Short, stable identifier for an order in logs and reports.
pub fn fingerprint(order: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(order.to_string().as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..12].to_string()
}
