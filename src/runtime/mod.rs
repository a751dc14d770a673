// Wiring and the two long-running loops: feed ingestion and timed evaluation
pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownTrigger};

use crate::config::{Settings, StorageSettings};
use crate::db::PostgresPersistence;
use crate::error::{ErrorKind, Result};
use crate::execution::{Evaluation, OrderGateway, PriceFeed, PriceStore, SignalEngine};
use crate::indicators::MovingAverageCache;
use crate::metrics::MetricsSink;
use crate::models::BookSnapshot;
use crate::persistence::{
    MemoryCache, MemoryLedger, MemoryPriceWindow, PriceWindow, RedisPersistence, TradeLedger,
    ValueCache,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const POSTGRES_MAX_CONNECTIONS: u32 = 5;

/// Storage behind the pipeline
#[derive(Clone)]
pub struct Backends {
    pub ledger: Arc<dyn TradeLedger>,
    pub window: Arc<dyn PriceWindow>,
    pub cache: Arc<dyn ValueCache>,
}

impl Backends {
    pub fn in_memory(history_capacity: usize) -> Self {
        let (window, cache) = memory_window(history_capacity);
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            window,
            cache,
        }
    }

    /// Connect to Postgres and Redis where configured
    ///
    /// Anything missing or unreachable falls back to its in-memory
    /// counterpart with a warning.
    pub async fn connect(storage: &StorageSettings) -> Self {
        let ledger: Arc<dyn TradeLedger> = match &storage.database_url {
            Some(url) => match PostgresPersistence::new(url, POSTGRES_MAX_CONNECTIONS).await {
                Ok(postgres) => {
                    tracing::info!("✓ Postgres ledger enabled");
                    Arc::new(postgres)
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to connect to Postgres ({}), continuing with in-memory ledger",
                        e
                    );
                    Arc::new(MemoryLedger::new())
                }
            },
            None => {
                tracing::info!("No DATABASE_URL set, using in-memory ledger");
                Arc::new(MemoryLedger::new())
            }
        };

        let (window, cache) = match &storage.redis_url {
            Some(url) => match RedisPersistence::new(url, storage.history_capacity).await {
                Ok(redis) => {
                    tracing::info!("✓ Redis price window and SMA cache enabled");
                    let redis = Arc::new(redis);
                    let window: Arc<dyn PriceWindow> = redis.clone();
                    let cache: Arc<dyn ValueCache> = redis;
                    (window, cache)
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to connect to Redis ({}), continuing with in-memory window",
                        e
                    );
                    memory_window(storage.history_capacity)
                }
            },
            None => {
                tracing::info!("No REDIS_URL set, using in-memory window");
                memory_window(storage.history_capacity)
            }
        };

        Self {
            ledger,
            window,
            cache,
        }
    }
}

fn memory_window(capacity: usize) -> (Arc<dyn PriceWindow>, Arc<dyn ValueCache>) {
    (
        Arc::new(MemoryPriceWindow::new(capacity)),
        Arc::new(MemoryCache::new()),
    )
}

/// The assembled single-symbol pipeline
pub struct Pipeline {
    pub symbol: String,
    pub store: Arc<PriceStore>,
    pub averages: Arc<MovingAverageCache>,
    pub engine: Arc<SignalEngine>,
    pub feed: Arc<PriceFeed>,
    pub evaluation_interval: Duration,
}

impl Pipeline {
    /// Validate parameters and wire every component to shared instances
    pub fn build(
        settings: &Settings,
        backends: Backends,
        gateway: Arc<dyn OrderGateway>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let params = settings.crossover_params()?;
        let io_timeout = settings.io_timeout();
        let symbol = settings.strategy.trading_pair.clone();

        let store = Arc::new(PriceStore::new(
            backends.ledger.clone(),
            backends.window,
            metrics.clone(),
            io_timeout,
        ));
        let averages = Arc::new(MovingAverageCache::new(
            store.clone(),
            backends.cache,
            settings.staleness_policy(),
            metrics.clone(),
            io_timeout,
        ));
        let engine = Arc::new(SignalEngine::new(
            params,
            store.clone(),
            averages.clone(),
            backends.ledger,
            gateway,
            metrics,
            io_timeout,
        ));
        let feed = Arc::new(PriceFeed::new(&symbol, store.clone(), averages.clone()));

        Ok(Self {
            symbol,
            store,
            averages,
            engine,
            feed,
            evaluation_interval: settings.evaluation_interval(),
        })
    }
}

/// One evaluation with its outcome logged; failures end only this cycle
pub async fn run_cycle(engine: &SignalEngine, symbol: &str) -> Option<Evaluation> {
    match engine.evaluate(symbol).await {
        Ok(evaluation) => {
            match &evaluation {
                Evaluation::NoPrice => {
                    tracing::info!("⏳ {}: no price yet", symbol);
                }
                Evaluation::InsufficientHistory { period } => {
                    tracing::info!("⏳ {}: waiting for {} observations", symbol, period);
                }
                Evaluation::Hold { state } => {
                    tracing::info!("  {} holding ({})", symbol, state);
                }
                Evaluation::Emitted { .. } => {}
            }
            Some(evaluation)
        }
        Err(e) if e.kind() == ErrorKind::Inconsistent => {
            // Already logged by the engine; the recorded signal stands
            tracing::warn!("Continuing after inconsistent cycle for {}", symbol);
            None
        }
        Err(e) => {
            tracing::warn!("Evaluation failed for {} ({}): {}", symbol, e.kind().as_str(), e);
            None
        }
    }
}

/// Evaluate every `period` until shutdown
///
/// An evaluation that has started always runs to completion; shutdown is
/// only observed between cycles.
pub async fn run_signal_loop(
    engine: Arc<SignalEngine>,
    symbol: String,
    period: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("💹 Signal loop started: {} every {:?}", symbol, period);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        run_cycle(&engine, &symbol).await;
    }

    tracing::info!("Signal loop stopped");
}

/// Ingest snapshots from the depth stream until shutdown or the stream ends
pub async fn run_feed_loop(
    feed: Arc<PriceFeed>,
    mut snapshots: mpsc::Receiver<BookSnapshot>,
    mut shutdown: Shutdown,
) {
    tracing::info!("🔄 Feed loop started for {}", feed.symbol());
    let mut ingested: u64 = 0;

    loop {
        let snapshot = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            snapshot = snapshots.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => break,
            },
        };

        match feed.ingest(&snapshot).await {
            Ok(observation) => {
                ingested += 1;
                tracing::debug!(
                    symbol = %observation.symbol,
                    price = %observation.price,
                    ingested,
                    "Price recorded"
                );
            }
            Err(e) if e.kind() == ErrorKind::InvalidInput => {
                tracing::debug!("Skipping snapshot: {}", e);
            }
            Err(e) => {
                tracing::warn!("Failed to record price for {}: {}", feed.symbol(), e);
            }
        }
    }

    tracing::info!("Feed loop stopped after {} prices", ingested);
}
