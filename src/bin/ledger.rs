use anyhow::Context;
use clap::Parser;
use crossbot::config::Settings;
use crossbot::db::PostgresPersistence;
use crossbot::persistence::TradeLedger;
use std::collections::HashMap;
use std::path::PathBuf;

/// Print the most recent signals and the orders they produced
#[derive(Debug, Parser)]
#[command(name = "ledger")]
struct Args {
    /// Defaults to the configured trading pair
    #[arg(long)]
    symbol: Option<String>,

    #[arg(long, default_value_t = 20)]
    limit: usize,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("crossbot=warn")
        .init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    let symbol = args
        .symbol
        .unwrap_or_else(|| settings.strategy.trading_pair.clone());

    let database_url = settings
        .storage
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    let postgres = PostgresPersistence::new(database_url, 1).await?;

    let signals = postgres.recent_signals(&symbol, args.limit).await?;
    let orders = postgres.recent_orders(&symbol, args.limit).await?;
    let orders_by_signal: HashMap<_, _> = orders.iter().map(|o| (o.signal_id, o)).collect();

    println!("\n═══════════════════════════════════════════════════════");
    println!("         LAST {} SIGNALS: {}", args.limit, symbol);
    println!("═══════════════════════════════════════════════════════\n");

    println!("Prices recorded: {}\n", postgres.count_prices(&symbol).await?);

    if signals.is_empty() {
        println!("No signals recorded for {}", symbol);
        return Ok(());
    }

    for signal in &signals {
        let order = match orders_by_signal.get(&signal.id) {
            Some(order) => format!(
                "order {} {} {}/{}",
                order.exchange_order_id, order.status, order.filled_quantity, order.quantity
            ),
            None => "NO ORDER".to_string(),
        };

        println!(
            "{}  {:<4} @ {:<14} short {:<14.4} long {:<14.4} {}",
            signal.created_at.format("%Y-%m-%d %H:%M:%S"),
            signal.kind.as_str(),
            signal.price,
            signal.short_sma,
            signal.long_sma,
            order
        );
    }

    let unmatched = signals
        .iter()
        .filter(|s| !orders_by_signal.contains_key(&s.id))
        .count();
    if unmatched > 0 {
        println!("\n⚠️  {} signal(s) without an order", unmatched);
    }

    Ok(())
}
