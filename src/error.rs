use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used for metrics labels and loop-level handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad price, quantity or symbol; the single operation is rejected
    InvalidInput,
    /// Feed, database, cache or exchange call failed or timed out
    TransientIo,
    /// A signal was recorded but its order was not
    Inconsistent,
    /// Startup-time misconfiguration
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange rejected request ({code}): {message}")]
    Exchange { code: i64, message: String },

    #[error("feed error: {0}")]
    Feed(String),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("signal {signal_id} recorded but its order was not: {source}")]
    Inconsistent {
        signal_id: Uuid,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::Config(_) | PipelineError::Metrics(_) => ErrorKind::Config,
            PipelineError::Inconsistent { .. } => ErrorKind::Inconsistent,
            PipelineError::Database(_)
            | PipelineError::Migration(_)
            | PipelineError::Cache(_)
            | PipelineError::Http(_)
            | PipelineError::Exchange { .. }
            | PipelineError::Feed(_)
            | PipelineError::Decode(_)
            | PipelineError::Corrupt(_)
            | PipelineError::Timeout { .. } => ErrorKind::TransientIo,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// Connection and timeout failures, where the data in flight is lost
    pub fn is_data_loss(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } | PipelineError::Feed(_) => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect(),
            PipelineError::Cache(e) => {
                e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            PipelineError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            PipelineError::Inconsistent { source, .. } => source.is_data_loss(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        PipelineError::Config(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Feed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Run `fut` with an upper bound on its duration
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            operation,
            timeout: limit,
        }),
    }
}
