use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A single price sample for a symbol. Never mutated once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceObservation {
    pub symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Direction of a signal, and of the order it produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown side '{}'",
                other
            ))),
        }
    }
}

/// Crossover signal. The newest one for a symbol is the current position state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub kind: Side,
    pub price: Decimal,
    pub short_sma: Decimal,
    pub long_sma: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: &str,
        kind: Side,
        price: Decimal,
        short_sma: Decimal,
        long_sma: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            kind,
            price,
            short_sma,
            long_sma,
            created_at: Utc::now(),
        }
    }
}

/// Exchange order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }

    /// Anything the exchange adds later maps to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "PENDING_CANCEL" => OrderStatus::PendingCancel,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gateway reports back for a placed order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
}

/// Market order created for exactly one signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub exchange_order_id: String,
    pub signal_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_confirmation(
        signal: &Signal,
        confirmation: OrderConfirmation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange_order_id: confirmation.order_id,
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.kind,
            quantity: confirmation.quantity,
            filled_quantity: confirmation.filled_quantity,
            price: signal.price,
            status: confirmation.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial order-book snapshot as pushed by the depth stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookSnapshot {
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: u64,
    /// (price, quantity), best first
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(price, _)| *price)
    }

    /// Midpoint of best bid and best ask
    pub fn mid_price(&self) -> Result<Decimal> {
        let bid = self
            .best_bid()
            .ok_or_else(|| PipelineError::InvalidInput("book snapshot has no bids".into()))?;
        let ask = self
            .best_ask()
            .ok_or_else(|| PipelineError::InvalidInput("book snapshot has no asks".into()))?;

        if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
            return Err(PipelineError::InvalidInput(format!(
                "non-positive top of book: bid {} ask {}",
                bid, ask
            )));
        }

        Ok((bid + ask) / Decimal::TWO)
    }
}
