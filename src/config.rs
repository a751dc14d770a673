//! Layered settings
//!
//! Sources, lowest precedence first: built-in defaults, `config/default.toml`
//! (optional), an explicit file, `CROSSBOT__SECTION__KEY` environment
//! variables, and finally the well-known `DATABASE_URL`, `REDIS_URL`,
//! `BINANCE_API_KEY` and `BINANCE_API_SECRET` variables.

use crate::error::{PipelineError, Result};
use crate::execution::MAX_EVALUATION_IO_CALLS;
use crate::indicators::StalenessPolicy;
use crate::strategy::CrossoverParams;
use config::{Config, Environment, File, FileFormat, Map};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CROSSBOT";
const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Partial depth levels the exchange streams
const SUPPORTED_DEPTHS: [u32; 3] = [5, 10, 20];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strategy: StrategySettings,
    pub feed: FeedSettings,
    pub exchange: ExchangeSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub trading_pair: String,
    pub short_period: usize,
    pub long_period: usize,
    pub order_quantity: Decimal,
    pub evaluation_interval_secs: u64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            trading_pair: "BTCUSDT".to_string(),
            short_period: 5,
            long_period: 20,
            order_quantity: Decimal::new(1, 3), // 0.001
            evaluation_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub depth: u32,
    pub use_testnet: bool,
    pub reconnect_delay_secs: u64,
    /// Reconnect when the socket stays silent this long
    pub idle_timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            depth: 5,
            use_testnet: true,
            reconnect_delay_secs: 5,
            idle_timeout_secs: 60,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub api_key: String,
    pub api_secret: String,
    pub use_testnet: bool,
    pub rate_limit_per_minute: u32,
    /// Fill orders locally instead of sending them
    pub paper: bool,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            use_testnet: true,
            rate_limit_per_minute: 60,
            paper: false,
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("use_testnet", &self.use_testnet)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("paper", &self.paper)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// Observations kept per symbol in the price window
    pub history_capacity: usize,
    pub io_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            history_capacity: 1000,
            io_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicyKind {
    Never,
    Ttl,
    InvalidateOnAppend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub policy: CachePolicyKind,
    /// Defaults to half the evaluation interval; must stay below it
    pub ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            policy: CachePolicyKind::Ttl,
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub shutdown_drain_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            shutdown_drain_secs: 60,
        }
    }
}

impl Settings {
    /// Load from every source, reading the process environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let vars: Map<String, String> = std::env::vars().collect();
        Self::load_with_vars(config_path, vars)
    }

    /// Load with an explicit set of environment variables
    pub fn load_with_vars(config_path: Option<&Path>, vars: Map<String, String>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let well_known = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();
        let database_url = well_known("DATABASE_URL");
        let redis_url = well_known("REDIS_URL");
        let api_key = well_known("BINANCE_API_KEY");
        let api_secret = well_known("BINANCE_API_SECRET");

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .set_override_option("storage.database_url", database_url)?
            .set_override_option("storage.redis_url", redis_url)?
            .set_override_option("exchange.api_key", api_key)?
            .set_override_option("exchange.api_secret", api_secret)?
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Parse a TOML document on top of the built-in defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Reject inconsistent values before anything connects
    pub fn validate(&self) -> Result<()> {
        self.crossover_params()?;

        if self.strategy.trading_pair.trim().is_empty() {
            return Err(PipelineError::Config("trading_pair must be set".into()));
        }
        if self.strategy.evaluation_interval_secs == 0 {
            return Err(PipelineError::Config(
                "evaluation_interval_secs must be positive".into(),
            ));
        }
        if !SUPPORTED_DEPTHS.contains(&self.feed.depth) {
            return Err(PipelineError::Config(format!(
                "feed depth must be one of {:?}, got {}",
                SUPPORTED_DEPTHS, self.feed.depth
            )));
        }
        if self.storage.history_capacity < self.strategy.long_period {
            return Err(PipelineError::Config(format!(
                "history_capacity ({}) must be at least long_period ({})",
                self.storage.history_capacity, self.strategy.long_period
            )));
        }
        if self.feed.idle_timeout_secs == 0 {
            return Err(PipelineError::Config("feed idle_timeout_secs must be positive".into()));
        }
        if self.storage.io_timeout_secs == 0 {
            return Err(PipelineError::Config("io_timeout_secs must be positive".into()));
        }
        if self.cache.ttl_secs == Some(0) {
            return Err(PipelineError::Config("cache ttl_secs must be positive".into()));
        }
        // A cached SMA that outlives a tick is served to the next evaluation
        if let Some(ttl) = self.cache.ttl_secs {
            if ttl >= self.strategy.evaluation_interval_secs {
                return Err(PipelineError::Config(format!(
                    "cache ttl_secs ({}) must be below evaluation_interval_secs ({})",
                    ttl, self.strategy.evaluation_interval_secs
                )));
            }
        }
        let worst_evaluation = self
            .storage
            .io_timeout_secs
            .saturating_mul(MAX_EVALUATION_IO_CALLS);
        if self.runtime.shutdown_drain_secs < worst_evaluation {
            return Err(PipelineError::Config(format!(
                "shutdown_drain_secs ({}) must cover one evaluation, {} calls x io_timeout_secs ({}) = {}s",
                self.runtime.shutdown_drain_secs,
                MAX_EVALUATION_IO_CALLS,
                self.storage.io_timeout_secs,
                worst_evaluation
            )));
        }
        if !self.exchange.paper
            && (self.exchange.api_key.is_empty() || self.exchange.api_secret.is_empty())
        {
            return Err(PipelineError::Config(
                "BINANCE_API_KEY and BINANCE_API_SECRET are required unless paper mode is on"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn crossover_params(&self) -> Result<CrossoverParams> {
        CrossoverParams::new(
            self.strategy.short_period,
            self.strategy.long_period,
            self.strategy.order_quantity,
        )
    }

    pub fn staleness_policy(&self) -> StalenessPolicy {
        match self.cache.policy {
            CachePolicyKind::Never => StalenessPolicy::Never,
            CachePolicyKind::InvalidateOnAppend => StalenessPolicy::InvalidateOnAppend,
            CachePolicyKind::Ttl => StalenessPolicy::Ttl(match self.cache.ttl_secs {
                Some(secs) => Duration::from_secs(secs),
                None => self.evaluation_interval() / 2,
            }),
        }
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.strategy.evaluation_interval_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.io_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.feed.reconnect_delay_secs)
    }

    pub fn feed_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.idle_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.runtime.shutdown_drain_secs)
    }
}
