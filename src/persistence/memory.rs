use super::{PriceWindow, TradeLedger, ValueCache};
use crate::models::{Order, PriceObservation, Signal};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

type SymbolHistory = Arc<RwLock<VecDeque<PriceObservation>>>;

/// Thread-safe in-memory price window
///
/// Keeps a bounded, time-ordered history per symbol. Each symbol has its own
/// lock, so writers for different symbols never contend; the outer map is only
/// write-locked the first time a symbol is seen.
#[derive(Clone)]
pub struct MemoryPriceWindow {
    data: Arc<RwLock<HashMap<String, SymbolHistory>>>,
    capacity: usize,
}

impl MemoryPriceWindow {
    /// # Arguments
    /// * `capacity` - Maximum number of observations to keep per symbol
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    fn history(&self, symbol: &str) -> Option<SymbolHistory> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    fn history_or_insert(&self, symbol: &str) -> SymbolHistory {
        if let Some(history) = self.history(symbol) {
            return history;
        }

        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::new())))
            .clone()
    }
}

#[async_trait]
impl PriceWindow for MemoryPriceWindow {
    async fn push(&self, observation: &PriceObservation) -> Result<()> {
        let history = self.history_or_insert(&observation.symbol);
        let mut history = history.write().unwrap_or_else(PoisonError::into_inner);

        // After every sample with an equal or earlier timestamp
        let position = history.partition_point(|o| o.observed_at <= observation.observed_at);
        history.insert(position, observation.clone());

        while history.len() > self.capacity {
            history.pop_front();
        }

        Ok(())
    }

    async fn recent(&self, symbol: &str, count: usize) -> Result<Vec<PriceObservation>> {
        let Some(history) = self.history(symbol) else {
            return Ok(Vec::new());
        };
        let history = history.read().unwrap_or_else(PoisonError::into_inner);

        let skip = history.len().saturating_sub(count);
        Ok(history.iter().skip(skip).cloned().collect())
    }

    async fn len(&self, symbol: &str) -> Result<usize> {
        Ok(self
            .history(symbol)
            .map(|h| h.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0))
    }
}

/// In-memory key-value cache with optional per-entry expiry
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (String, Option<Instant>)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        Ok(entries.get(key).and_then(|(value, expires_at)| match expires_at {
            Some(deadline) if Instant::now() >= *deadline => None,
            _ => Some(value.clone()),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// In-memory ledger used when Postgres is unavailable, and in tests
#[derive(Default)]
pub struct MemoryLedger {
    prices: Mutex<Vec<PriceObservation>>,
    signals: Mutex<Vec<Signal>>,
    orders: Mutex<Vec<Order>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded price, in recording order
    pub fn prices(&self) -> Vec<PriceObservation> {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TradeLedger for MemoryLedger {
    async fn record_price(&self, observation: &PriceObservation) -> Result<()> {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observation.clone());
        Ok(())
    }

    async fn record_signal(&self, signal: &Signal) -> Result<()> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal.clone());
        Ok(())
    }

    async fn latest_signal(&self, symbol: &str) -> Result<Option<Signal>> {
        Ok(self
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|s| s.symbol == symbol)
            .cloned())
    }

    async fn recent_signals(&self, symbol: &str, limit: usize) -> Result<Vec<Signal>> {
        Ok(self
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .filter(|s| s.symbol == symbol)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_order(&self, order: &Order) -> Result<()> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(order.clone());
        Ok(())
    }

    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .filter(|o| o.symbol == symbol)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn observation(symbol: &str, price: Decimal, observed_at: DateTime<Utc>) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            price,
            observed_at,
        }
    }

    fn prices(observations: &[PriceObservation]) -> Vec<Decimal> {
        observations.iter().map(|o| o.price).collect()
    }

    #[tokio::test]
    async fn test_recent_returns_oldest_first() {
        let window = MemoryPriceWindow::new(100);

        for i in 0..10 {
            window
                .push(&observation("BTCUSDT", Decimal::from(100 + i), at(i)))
                .await
                .unwrap();
        }

        let recent = window.recent("BTCUSDT", 3).await.unwrap();
        assert_eq!(prices(&recent), vec![dec!(107), dec!(108), dec!(109)]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let window = MemoryPriceWindow::new(5);

        for i in 0..10 {
            window
                .push(&observation("BTCUSDT", Decimal::from(100 + i), at(i)))
                .await
                .unwrap();
        }

        assert_eq!(window.len("BTCUSDT").await.unwrap(), 5);
        let all = window.recent("BTCUSDT", 100).await.unwrap();
        assert_eq!(all[0].price, dec!(105));
        assert_eq!(all[4].price, dec!(109));
    }

    #[tokio::test]
    async fn test_out_of_order_insert_is_sorted_by_time() {
        let window = MemoryPriceWindow::new(100);

        window.push(&observation("BTCUSDT", dec!(1), at(10))).await.unwrap();
        window.push(&observation("BTCUSDT", dec!(2), at(30))).await.unwrap();
        window.push(&observation("BTCUSDT", dec!(3), at(20))).await.unwrap();

        let all = window.recent("BTCUSDT", 3).await.unwrap();
        assert_eq!(prices(&all), vec![dec!(1), dec!(3), dec!(2)]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let window = MemoryPriceWindow::new(100);

        window.push(&observation("BTCUSDT", dec!(1), at(5))).await.unwrap();
        window.push(&observation("BTCUSDT", dec!(2), at(5))).await.unwrap();
        window.push(&observation("BTCUSDT", dec!(3), at(5))).await.unwrap();

        let latest = window.recent("BTCUSDT", 1).await.unwrap();
        assert_eq!(latest[0].price, dec!(3));
    }

    #[tokio::test]
    async fn test_symbols_are_isolated() {
        let window = MemoryPriceWindow::new(100);

        window.push(&observation("BTCUSDT", dec!(1), at(0))).await.unwrap();
        window.push(&observation("ETHUSDT", dec!(2), at(0))).await.unwrap();

        assert_eq!(window.len("BTCUSDT").await.unwrap(), 1);
        assert_eq!(window.len("ETHUSDT").await.unwrap(), 1);
        assert!(window.recent("SOLUSDT", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_pushes() {
        let window = MemoryPriceWindow::new(1000);
        let start = Utc::now();

        let mut handles = Vec::new();
        for task in 0..4 {
            let window = window.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let observed_at = start + ChronoDuration::milliseconds(i * 4 + task);
                    window
                        .push(&observation("BTCUSDT", dec!(100), observed_at))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(window.len("BTCUSDT").await.unwrap(), 200);
        let all = window.recent("BTCUSDT", 200).await.unwrap();
        assert!(all.windows(2).all(|w| w[0].observed_at <= w[1].observed_at));
    }

    #[tokio::test]
    async fn test_cache_ttl_expires() {
        let cache = MemoryCache::new();

        cache
            .set("sma:BTCUSDT:5", "100.5", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        cache.set("sma:BTCUSDT:20", "99", None).await.unwrap();
        assert_eq!(
            cache.get("sma:BTCUSDT:5").await.unwrap().as_deref(),
            Some("100.5")
        );

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("sma:BTCUSDT:5").await.unwrap().is_none());
        assert_eq!(cache.get("sma:BTCUSDT:20").await.unwrap().as_deref(), Some("99"));

        cache.delete("sma:BTCUSDT:20").await.unwrap();
        assert!(cache.get("sma:BTCUSDT:20").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_latest_signal_is_newest_for_symbol() {
        let ledger = MemoryLedger::new();

        let first = Signal::new("BTCUSDT", Side::Buy, dec!(1), dec!(2), dec!(1));
        let other = Signal::new("ETHUSDT", Side::Sell, dec!(1), dec!(1), dec!(2));
        let second = Signal::new("BTCUSDT", Side::Sell, dec!(1), dec!(1), dec!(2));

        ledger.record_signal(&first).await.unwrap();
        ledger.record_signal(&other).await.unwrap();
        ledger.record_signal(&second).await.unwrap();

        let latest = ledger.latest_signal("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let recent = ledger.recent_signals("BTCUSDT", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);

        assert!(ledger.latest_signal("SOLUSDT").await.unwrap().is_none());
    }
}
