use crate::error::{with_timeout, PipelineError, Result};
use crate::indicators::calculate_sma;
use crate::metrics::{instrumented, MetricsSink, Operation};
use crate::models::PriceObservation;
use crate::persistence::{PriceWindow, TradeLedger};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Append-only, time-ordered price history
///
/// Every observation goes to the durable ledger first and then to the
/// time-indexed window that serves `latest` and `windowed_mean`.
pub struct PriceStore {
    ledger: Arc<dyn TradeLedger>,
    window: Arc<dyn PriceWindow>,
    metrics: Arc<dyn MetricsSink>,
    io_timeout: Duration,
}

impl PriceStore {
    pub fn new(
        ledger: Arc<dyn TradeLedger>,
        window: Arc<dyn PriceWindow>,
        metrics: Arc<dyn MetricsSink>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            window,
            metrics,
            io_timeout,
        }
    }

    /// Record one observation
    ///
    /// Rejects empty symbols and non-positive prices. If the durable write
    /// fails the window is left untouched.
    pub async fn append(
        &self,
        symbol: &str,
        price: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<PriceObservation> {
        instrumented(self.metrics.as_ref(), Operation::ProcessPrice, async {
            if symbol.trim().is_empty() {
                return Err(PipelineError::InvalidInput("symbol must not be empty".into()));
            }
            if price <= Decimal::ZERO {
                return Err(PipelineError::InvalidInput(format!(
                    "price must be positive, got {}",
                    price
                )));
            }

            let observation = PriceObservation {
                symbol: symbol.to_string(),
                price,
                observed_at,
            };

            with_timeout(
                "ledger.record_price",
                self.io_timeout,
                self.ledger.record_price(&observation),
            )
            .await?;
            with_timeout("window.push", self.io_timeout, self.window.push(&observation)).await?;

            tracing::debug!(symbol, price = %price, "Price appended");

            Ok(observation)
        })
        .await
    }

    /// Most recent observation, if any
    pub async fn latest(&self, symbol: &str) -> Result<Option<PriceObservation>> {
        let mut recent =
            with_timeout("window.recent", self.io_timeout, self.window.recent(symbol, 1)).await?;
        Ok(recent.pop())
    }

    /// Mean of the `period` most recent observations
    ///
    /// `None` while fewer than `period` observations exist.
    pub async fn windowed_mean(&self, symbol: &str, period: usize) -> Result<Option<Decimal>> {
        if period == 0 {
            return Err(PipelineError::InvalidInput("period must be positive".into()));
        }

        let recent = with_timeout(
            "window.recent",
            self.io_timeout,
            self.window.recent(symbol, period),
        )
        .await?;
        let prices: Vec<Decimal> = recent.iter().map(|o| o.price).collect();

        Ok(calculate_sma(&prices, period))
    }

    /// Number of observations currently held in the window
    pub async fn window_len(&self, symbol: &str) -> Result<usize> {
        with_timeout("window.len", self.io_timeout, self.window.len(symbol)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{NoopMetrics, PrometheusMetrics};
    use crate::models::{Order, Signal};
    use crate::persistence::{MemoryLedger, MemoryPriceWindow};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn create_store(capacity: usize) -> (PriceStore, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = PriceStore::new(
            ledger.clone(),
            Arc::new(MemoryPriceWindow::new(capacity)),
            Arc::new(NoopMetrics),
            Duration::from_secs(1),
        );
        (store, ledger)
    }

    /// Ledger whose writes always fail
    struct FailingLedger;

    #[async_trait]
    impl TradeLedger for FailingLedger {
        async fn record_price(&self, _observation: &PriceObservation) -> Result<()> {
            Err(PipelineError::Feed("connection reset".into()))
        }
        async fn record_signal(&self, _signal: &Signal) -> Result<()> {
            Ok(())
        }
        async fn latest_signal(&self, _symbol: &str) -> Result<Option<Signal>> {
            Ok(None)
        }
        async fn recent_signals(&self, _symbol: &str, _limit: usize) -> Result<Vec<Signal>> {
            Ok(Vec::new())
        }
        async fn record_order(&self, _order: &Order) -> Result<()> {
            Ok(())
        }
        async fn recent_orders(&self, _symbol: &str, _limit: usize) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_windowed_mean_needs_full_period() {
        let (store, _) = create_store(100);
        let now = Utc::now();

        for (i, price) in [dec!(10), dec!(20)].into_iter().enumerate() {
            store
                .append("BTCUSDT", price, now + ChronoDuration::seconds(i as i64))
                .await
                .unwrap();
        }

        assert_eq!(store.windowed_mean("BTCUSDT", 3).await.unwrap(), None);
        assert_eq!(store.windowed_mean("BTCUSDT", 2).await.unwrap(), Some(dec!(15)));
        assert_eq!(store.windowed_mean("ETHUSDT", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_windowed_mean_follows_timestamps_not_arrival() {
        let (store, _) = create_store(100);
        let base = Utc::now();

        // Arrives out of order; newest by timestamp are 30 and 40
        store.append("BTCUSDT", dec!(40), base + ChronoDuration::seconds(4)).await.unwrap();
        store.append("BTCUSDT", dec!(10), base + ChronoDuration::seconds(1)).await.unwrap();
        store.append("BTCUSDT", dec!(30), base + ChronoDuration::seconds(3)).await.unwrap();
        store.append("BTCUSDT", dec!(20), base + ChronoDuration::seconds(2)).await.unwrap();

        assert_eq!(store.windowed_mean("BTCUSDT", 2).await.unwrap(), Some(dec!(35)));
        assert_eq!(store.latest("BTCUSDT").await.unwrap().unwrap().price, dec!(40));
    }

    #[tokio::test]
    async fn test_append_rejects_bad_input() {
        let (store, ledger) = create_store(100);
        let now = Utc::now();

        let zero = store.append("BTCUSDT", Decimal::ZERO, now).await;
        assert!(matches!(zero, Err(PipelineError::InvalidInput(_))));

        let negative = store.append("BTCUSDT", dec!(-1), now).await;
        assert!(matches!(negative, Err(PipelineError::InvalidInput(_))));

        let empty = store.append("", dec!(1), now).await;
        assert!(matches!(empty, Err(PipelineError::InvalidInput(_))));

        assert!(store.latest("BTCUSDT").await.unwrap().is_none());
        assert!(ledger.prices().is_empty());
    }

    #[tokio::test]
    async fn test_zero_period_is_invalid() {
        let (store, _) = create_store(100);
        let result = store.windowed_mean("BTCUSDT", 0).await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_failed_durable_write_leaves_window_untouched() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let store = PriceStore::new(
            Arc::new(FailingLedger),
            Arc::new(MemoryPriceWindow::new(100)),
            metrics.clone(),
            Duration::from_secs(1),
        );

        let result = store.append("BTCUSDT", dec!(100), Utc::now()).await;

        assert!(result.is_err());
        assert_eq!(store.window_len("BTCUSDT").await.unwrap(), 0);
        assert_eq!(metrics.data_loss_count(Operation::ProcessPrice), 1);
    }

    #[tokio::test]
    async fn test_append_writes_ledger_and_window() {
        let (store, ledger) = create_store(2);
        let now = Utc::now();

        for i in 0..3 {
            store
                .append("BTCUSDT", Decimal::from(100 + i), now + ChronoDuration::seconds(i))
                .await
                .unwrap();
        }

        // Durable log keeps everything, the window only its capacity
        assert_eq!(ledger.prices().len(), 3);
        assert_eq!(store.window_len("BTCUSDT").await.unwrap(), 2);
    }
}
