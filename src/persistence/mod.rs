// Storage seams: the durable ledger, the time-indexed price window and the
// key-value cache. Redis and in-memory implementations live here, Postgres in db/.
pub mod memory;
pub mod redis;

pub use memory::{MemoryCache, MemoryLedger, MemoryPriceWindow};
pub use self::redis::RedisPersistence;

use crate::models::{Order, PriceObservation, Signal};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Recent price history per symbol, ordered by `observed_at` then insertion
#[async_trait]
pub trait PriceWindow: Send + Sync {
    /// Insert one observation atomically; readers never see it half-written
    async fn push(&self, observation: &PriceObservation) -> Result<()>;

    /// Up to `count` most recent observations, oldest first
    async fn recent(&self, symbol: &str, count: usize) -> Result<Vec<PriceObservation>>;

    async fn len(&self, symbol: &str) -> Result<usize>;
}

/// String key-value cache
#[async_trait]
pub trait ValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Append-only log of prices, signals and orders
#[async_trait]
pub trait TradeLedger: Send + Sync {
    async fn record_price(&self, observation: &PriceObservation) -> Result<()>;

    async fn record_signal(&self, signal: &Signal) -> Result<()>;

    /// Most recently created signal for the symbol
    async fn latest_signal(&self, symbol: &str) -> Result<Option<Signal>>;

    /// Newest first
    async fn recent_signals(&self, symbol: &str, limit: usize) -> Result<Vec<Signal>>;

    async fn record_order(&self, order: &Order) -> Result<()>;

    /// Newest first
    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<Order>>;
}
