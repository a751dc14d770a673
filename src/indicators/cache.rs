use crate::error::{with_timeout, Result};
use crate::execution::PriceStore;
use crate::metrics::{instrumented, MetricsSink, Operation};
use crate::persistence::ValueCache;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// When a cached moving average stops being served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Refreshed only on a miss or an explicit `set`
    Never,
    /// Entries expire after the given duration
    Ttl(Duration),
    /// Every appended price drops the symbol's entries
    InvalidateOnAppend,
}

impl StalenessPolicy {
    fn ttl(&self) -> Option<Duration> {
        match self {
            StalenessPolicy::Ttl(ttl) => Some(*ttl),
            _ => None,
        }
    }
}

fn cache_key(symbol: &str, period: usize) -> String {
    format!("sma:{}:{}", symbol, period)
}

/// Memoizes simple moving averages per (symbol, period)
///
/// A hit is returned as is, without checking it against the price window.
/// "Not enough history" is never cached, so a period becomes available as
/// soon as the window fills.
pub struct MovingAverageCache {
    store: Arc<PriceStore>,
    cache: Arc<dyn ValueCache>,
    policy: StalenessPolicy,
    metrics: Arc<dyn MetricsSink>,
    io_timeout: Duration,
    /// Periods written per symbol, so `invalidate` knows which keys to drop
    periods: Mutex<HashMap<String, BTreeSet<usize>>>,
}

impl MovingAverageCache {
    pub fn new(
        store: Arc<PriceStore>,
        cache: Arc<dyn ValueCache>,
        policy: StalenessPolicy,
        metrics: Arc<dyn MetricsSink>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            policy,
            metrics,
            io_timeout,
            periods: Mutex::new(HashMap::new()),
        }
    }

    /// Cached SMA, or compute and cache it on a miss
    pub async fn get_or_compute(&self, symbol: &str, period: usize) -> Result<Option<Decimal>> {
        instrumented(self.metrics.as_ref(), Operation::SmaCalculation, async {
            if let Some(value) = self.cached(symbol, period).await {
                tracing::debug!(symbol, period, value = %value, "SMA cache hit");
                return Ok(Some(value));
            }

            let Some(value) = self.store.windowed_mean(symbol, period).await? else {
                tracing::debug!(symbol, period, "Not enough history for SMA");
                return Ok(None);
            };

            if let Err(e) = self.set(symbol, period, value).await {
                tracing::warn!(symbol, period, error = %e, "Failed to cache SMA");
            }
            tracing::debug!(symbol, period, value = %value, "SMA computed");

            Ok(Some(value))
        })
        .await
    }

    /// Write a value for (symbol, period) out of band
    pub async fn set(&self, symbol: &str, period: usize, value: Decimal) -> Result<()> {
        let key = cache_key(symbol, period);
        let rendered = value.to_string();

        with_timeout(
            "cache.set",
            self.io_timeout,
            self.cache.set(&key, &rendered, self.policy.ttl()),
        )
        .await?;

        self.periods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.to_string())
            .or_default()
            .insert(period);

        Ok(())
    }

    /// Drop the cached values for the given periods
    pub async fn clear(&self, symbol: &str, periods: &[usize]) -> Result<()> {
        for period in periods {
            with_timeout(
                "cache.delete",
                self.io_timeout,
                self.cache.delete(&cache_key(symbol, *period)),
            )
            .await?;
        }

        if let Some(known) = self
            .periods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(symbol)
        {
            for period in periods {
                known.remove(period);
            }
        }

        Ok(())
    }

    /// Drop every cached period for the symbol
    pub async fn invalidate(&self, symbol: &str) -> Result<()> {
        let periods: Vec<usize> = self
            .periods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        self.clear(symbol, &periods).await
    }

    /// Called after each appended price
    pub async fn on_price_appended(&self, symbol: &str) -> Result<()> {
        match self.policy {
            StalenessPolicy::InvalidateOnAppend => self.invalidate(symbol).await,
            StalenessPolicy::Never | StalenessPolicy::Ttl(_) => Ok(()),
        }
    }

    /// A cache that cannot be read or holds garbage counts as a miss
    async fn cached(&self, symbol: &str, period: usize) -> Option<Decimal> {
        let key = cache_key(symbol, period);

        match with_timeout("cache.get", self.io_timeout, self.cache.get(&key)).await {
            Ok(Some(raw)) => match Decimal::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding unreadable cached SMA");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "SMA cache read failed, recomputing");
                None
            }
        }
    }
}
