use crate::error::Result;
use crate::metrics::{instrumented, MetricsSink, Operation};
use crate::models::{OrderConfirmation, OrderStatus, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Order placement sink
///
/// Calls may fail or time out; callers never retry automatically.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place(&self, symbol: &str, side: Side, quantity: Decimal)
        -> Result<OrderConfirmation>;

    fn name(&self) -> &str;
}

/// Dry-run gateway that fills every order locally
#[derive(Debug, Default)]
pub struct PaperGateway {
    next_id: AtomicU64,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderConfirmation> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!("  → Would {} {} {} (paper order #{})", side, quantity, symbol, id);

        Ok(OrderConfirmation {
            order_id: format!("paper-{}", id),
            quantity,
            filled_quantity: quantity,
            status: OrderStatus::Filled,
        })
    }

    fn name(&self) -> &str {
        "paper"
    }
}

/// Records latency and failures of every placement
pub struct InstrumentedGateway<G> {
    inner: G,
    metrics: Arc<dyn MetricsSink>,
}

impl<G: OrderGateway> InstrumentedGateway<G> {
    pub fn new(inner: G, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<G: OrderGateway> OrderGateway for InstrumentedGateway<G> {
    async fn place(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderConfirmation> {
        instrumented(
            self.metrics.as_ref(),
            Operation::CreateMarketOrder,
            self.inner.place(symbol, side, quantity),
        )
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl<G: OrderGateway + ?Sized> OrderGateway for Arc<G> {
    async fn place(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderConfirmation> {
        (**self).place(symbol, side, quantity).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::metrics::PrometheusMetrics;
    use rust_decimal_macros::dec;

    struct RejectingGateway;

    #[async_trait]
    impl OrderGateway for RejectingGateway {
        async fn place(
            &self,
            _symbol: &str,
            _side: Side,
            _quantity: Decimal,
        ) -> Result<OrderConfirmation> {
            Err(PipelineError::Exchange {
                code: -1013,
                message: "Filter failure: LOT_SIZE".into(),
            })
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    #[tokio::test]
    async fn test_paper_gateway_fills_in_full() {
        let gateway = PaperGateway::new();

        let first = gateway.place("BTCUSDT", Side::Buy, dec!(0.001)).await.unwrap();
        let second = gateway.place("BTCUSDT", Side::Sell, dec!(0.001)).await.unwrap();

        assert_eq!(first.order_id, "paper-1");
        assert_eq!(second.order_id, "paper-2");
        assert_eq!(first.status, OrderStatus::Filled);
        assert_eq!(first.filled_quantity, dec!(0.001));
    }

    #[tokio::test]
    async fn test_instrumented_gateway_counts_calls_and_errors() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());

        let paper = InstrumentedGateway::new(PaperGateway::new(), metrics.clone());
        paper.place("BTCUSDT", Side::Buy, dec!(1)).await.unwrap();
        assert_eq!(paper.name(), "paper");

        let rejecting = InstrumentedGateway::new(RejectingGateway, metrics.clone());
        assert!(rejecting.place("BTCUSDT", Side::Buy, dec!(1)).await.is_err());

        assert_eq!(metrics.latency_count(Operation::CreateMarketOrder), 2);
        assert_eq!(
            metrics.error_count(Operation::CreateMarketOrder, crate::ErrorKind::TransientIo),
            1
        );
        assert_eq!(metrics.data_loss_count(Operation::CreateMarketOrder), 0);
    }
}
