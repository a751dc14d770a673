use anyhow::Context;
use clap::Parser;
use crossbot::api::{BinanceClient, DepthStream};
use crossbot::config::Settings;
use crossbot::execution::{InstrumentedGateway, OrderGateway, PaperGateway};
use crossbot::metrics::{MetricsSink, PrometheusMetrics};
use crossbot::runtime::{self, shutdown, Backends, Pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// Snapshots buffered between the depth stream and the feed loop
const SNAPSHOT_BUFFER: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "crossbot", version, about = "SMA crossover signal pipeline")]
struct Cli {
    /// TOML file layered over config/default.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Fill orders locally instead of sending them to the exchange
    #[arg(long)]
    paper: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.paper {
        settings.exchange.paper = true;
    }
    settings.validate().context("Invalid configuration")?;

    if cli.check {
        tracing::info!("✅ Configuration OK");
        tracing::info!("{:#?}", settings);
        return Ok(());
    }

    tracing::info!("🚀 crossbot starting");
    log_configuration(&settings);

    let metrics = Arc::new(PrometheusMetrics::new()?);
    let gateway = create_gateway(&settings, metrics.clone()).await?;
    let backends = Backends::connect(&settings.storage).await;
    let pipeline = Pipeline::build(&settings, backends, gateway, metrics.clone())?;

    let (trigger, shutdown) = shutdown::channel();
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

    tracing::info!("\n🔄 Spawning loops...");

    let stream = DepthStream::new(
        &pipeline.symbol,
        settings.feed.depth,
        settings.feed.use_testnet,
        settings.reconnect_delay(),
    )
    .with_timeouts(settings.io_timeout(), settings.feed_idle_timeout());
    let stream_shutdown = shutdown.clone();
    let stream_handle = tokio::spawn(async move { stream.run(tx, stream_shutdown).await });

    let feed_handle = tokio::spawn(runtime::run_feed_loop(
        pipeline.feed.clone(),
        rx,
        shutdown.clone(),
    ));

    let signal_handle = tokio::spawn(runtime::run_signal_loop(
        pipeline.engine.clone(),
        pipeline.symbol.clone(),
        pipeline.evaluation_interval,
        shutdown,
    ));

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
    trigger.trigger();

    // An evaluation in flight finishes before the signal loop returns
    let drain = settings.shutdown_drain();
    let drained = tokio::time::timeout(drain, async {
        let (stream, feed, signal) = tokio::join!(stream_handle, feed_handle, signal_handle);
        for (name, result) in [("depth stream", stream), ("feed", feed), ("signal", signal)] {
            if let Err(e) = result {
                tracing::error!("{} task failed: {}", name, e);
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Loops still running after {:?}, exiting anyway", drain);
    }

    tracing::info!("\n📊 Operation summary:");
    for line in metrics.summary() {
        tracing::info!("  {}", line);
    }
    match metrics.render() {
        Ok(exposition) => tracing::debug!("Final metrics:\n{}", exposition),
        Err(e) => tracing::warn!("Failed to render metrics: {}", e),
    }

    tracing::info!("👋 crossbot stopped");

    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crossbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(settings: &Settings) {
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Trading pair: {}", settings.strategy.trading_pair);
    tracing::info!(
        "  SMA periods: {} / {}",
        settings.strategy.short_period,
        settings.strategy.long_period
    );
    tracing::info!("  Order quantity: {}", settings.strategy.order_quantity);
    tracing::info!("  Evaluation every: {:?}", settings.evaluation_interval());
    tracing::info!("  SMA cache: {:?}", settings.staleness_policy());
    tracing::info!(
        "  Exchange: {}{}",
        if settings.exchange.use_testnet { "testnet" } else { "live" },
        if settings.exchange.paper { " (paper)" } else { "" }
    );
}

async fn create_gateway(
    settings: &Settings,
    metrics: Arc<dyn MetricsSink>,
) -> anyhow::Result<Arc<dyn OrderGateway>> {
    if settings.exchange.paper {
        tracing::info!("📝 Paper trading: orders are filled locally");
        return Ok(Arc::new(InstrumentedGateway::new(PaperGateway::new(), metrics)));
    }

    let exchange = &settings.exchange;
    let client = BinanceClient::new(
        exchange.api_key.clone(),
        exchange.api_secret.clone(),
        exchange.use_testnet,
        exchange.rate_limit_per_minute,
        settings.io_timeout(),
    )
    .context("Failed to create Binance client")?;

    match client.ping().await {
        Ok(()) => tracing::info!("✓ Binance reachable at {}", client.base_url()),
        Err(e) => tracing::warn!(
            "Binance ping failed ({}), orders will fail until it recovers",
            e
        ),
    }

    Ok(Arc::new(InstrumentedGateway::new(client, metrics)))
}
