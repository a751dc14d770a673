use super::PriceStore;
use crate::indicators::MovingAverageCache;
use crate::models::{BookSnapshot, PriceObservation};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;

/// Turns order-book snapshots into stored mid prices for one symbol
pub struct PriceFeed {
    symbol: String,
    store: Arc<PriceStore>,
    averages: Arc<MovingAverageCache>,
}

impl PriceFeed {
    pub fn new(symbol: &str, store: Arc<PriceStore>, averages: Arc<MovingAverageCache>) -> Self {
        Self {
            symbol: symbol.to_string(),
            store,
            averages,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Record the snapshot's mid price, observed now
    ///
    /// Snapshots with an empty or non-positive side are rejected with
    /// `InvalidInput` and nothing is stored.
    pub async fn ingest(&self, snapshot: &BookSnapshot) -> Result<PriceObservation> {
        let mid = snapshot.mid_price()?;
        let observation = self.store.append(&self.symbol, mid, Utc::now()).await?;

        // The price is already stored; a failed invalidation only leaves a stale SMA
        if let Err(e) = self.averages.on_price_appended(&self.symbol).await {
            tracing::warn!(symbol = %self.symbol, error = %e, "Failed to invalidate SMA cache");
        }

        tracing::debug!(
            symbol = %self.symbol,
            price = %mid,
            update_id = snapshot.last_update_id,
            "Ingested mid price"
        );

        Ok(observation)
    }
}
