use super::gateway::OrderGateway;
use super::price_store::PriceStore;
use crate::error::{with_timeout, PipelineError, Result};
use crate::indicators::MovingAverageCache;
use crate::metrics::{instrumented, MetricsSink, Operation};
use crate::models::{Order, Signal};
use crate::persistence::TradeLedger;
use crate::strategy::{decide, CrossoverParams, PositionState};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Sequential calls one `evaluate` can make, each bounded by `io_timeout`:
/// latest price, two SMAs (cache get, window read, cache set each), last
/// signal, record signal, place order, record order
pub const MAX_EVALUATION_IO_CALLS: u64 = 11;

/// Result of one evaluation cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// No price has been recorded for the symbol yet
    NoPrice,
    /// Fewer observations than the given period
    InsufficientHistory { period: usize },
    /// Averages did not cross; position unchanged
    Hold { state: PositionState },
    /// A signal was recorded and its order placed
    Emitted { signal: Signal, order: Order },
}

/// Crossover state machine
///
/// Reads the latest price and both moving averages, compares them with the
/// last recorded signal and emits at most one new signal per call. The signal
/// is persisted before the order is placed; if placement fails the signal
/// stays and the call returns `PipelineError::Inconsistent`.
pub struct SignalEngine {
    params: CrossoverParams,
    store: Arc<PriceStore>,
    averages: Arc<MovingAverageCache>,
    ledger: Arc<dyn TradeLedger>,
    gateway: Arc<dyn OrderGateway>,
    metrics: Arc<dyn MetricsSink>,
    io_timeout: Duration,
    // One evaluation at a time, so two callers can never both see the same
    // last signal and emit the same transition
    guard: Mutex<()>,
}

impl SignalEngine {
    pub fn new(
        params: CrossoverParams,
        store: Arc<PriceStore>,
        averages: Arc<MovingAverageCache>,
        ledger: Arc<dyn TradeLedger>,
        gateway: Arc<dyn OrderGateway>,
        metrics: Arc<dyn MetricsSink>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            params,
            store,
            averages,
            ledger,
            gateway,
            metrics,
            io_timeout,
            guard: Mutex::new(()),
        }
    }

    /// Run one evaluation for `symbol`
    pub async fn evaluate(&self, symbol: &str) -> Result<Evaluation> {
        let _serialized = self.guard.lock().await;

        instrumented(
            self.metrics.as_ref(),
            Operation::GenerateSignal,
            self.evaluate_locked(symbol),
        )
        .await
    }

    /// Current position implied by the ledger
    pub async fn position(&self, symbol: &str) -> Result<PositionState> {
        let last = with_timeout(
            "ledger.latest_signal",
            self.io_timeout,
            self.ledger.latest_signal(symbol),
        )
        .await?;
        Ok(PositionState::from_last(last.map(|s| s.kind)))
    }

    async fn evaluate_locked(&self, symbol: &str) -> Result<Evaluation> {
        let Some(current) = self.store.latest(symbol).await? else {
            tracing::debug!(symbol, "No price yet, skipping evaluation");
            return Ok(Evaluation::NoPrice);
        };

        let short_period = self.params.short_period();
        let long_period = self.params.long_period();

        let Some(short_sma) = self.averages.get_or_compute(symbol, short_period).await? else {
            return Ok(Evaluation::InsufficientHistory {
                period: short_period,
            });
        };
        let Some(long_sma) = self.averages.get_or_compute(symbol, long_period).await? else {
            return Ok(Evaluation::InsufficientHistory {
                period: long_period,
            });
        };

        let state = self.position(symbol).await?;

        tracing::debug!(
            symbol,
            price = %current.price,
            short_sma = %short_sma,
            long_sma = %long_sma,
            state = %state,
            "Evaluating crossover"
        );

        let Some(side) = decide(state, short_sma, long_sma) else {
            return Ok(Evaluation::Hold { state });
        };

        let signal = Signal::new(symbol, side, current.price, short_sma, long_sma);
        with_timeout(
            "ledger.record_signal",
            self.io_timeout,
            self.ledger.record_signal(&signal),
        )
        .await?;

        tracing::info!(
            "📈 {} signal for {} @ {} (short {:.4} / long {:.4}, was {})",
            side,
            symbol,
            current.price,
            short_sma,
            long_sma,
            state
        );

        match self.place_order(&signal).await {
            Ok(order) => {
                tracing::info!(
                    "  ✓ Order {} {} {} {} ({})",
                    order.exchange_order_id,
                    order.side,
                    order.quantity,
                    order.symbol,
                    order.status
                );
                Ok(Evaluation::Emitted { signal, order })
            }
            Err(e) => {
                tracing::error!(
                    signal_id = %signal.id,
                    symbol,
                    side = %side,
                    error = %e,
                    "  ✗ Signal recorded but order was not"
                );
                Err(PipelineError::Inconsistent {
                    signal_id: signal.id,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn place_order(&self, signal: &Signal) -> Result<Order> {
        let confirmation = with_timeout(
            "gateway.place",
            self.io_timeout,
            self.gateway
                .place(&signal.symbol, signal.kind, self.params.order_quantity()),
        )
        .await?;

        let order = Order::from_confirmation(signal, confirmation, Utc::now());
        with_timeout(
            "ledger.record_order",
            self.io_timeout,
            self.ledger.record_order(&order),
        )
        .await?;

        Ok(order)
    }
}
