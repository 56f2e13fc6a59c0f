//! Durable key/value storage and the offline order queue built on it.

mod local;
mod orders;

pub use local::LocalStorage;
pub use orders::{fingerprint, OfflineOrders, OrderRepository, OFFLINE_ORDERS_KEY};
