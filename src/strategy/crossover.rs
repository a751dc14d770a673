use crate::error::{PipelineError, Result};
use crate::models::Side;
use rust_decimal::Decimal;
use std::fmt;

/// Validated crossover parameters
///
/// # Example
/// ```
/// use crossbot::strategy::CrossoverParams;
/// use rust_decimal::Decimal;
///
/// let params = CrossoverParams::new(5, 20, Decimal::new(1, 3)).unwrap();
/// assert_eq!(params.long_period(), 20);
/// assert!(CrossoverParams::new(20, 5, Decimal::ONE).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossoverParams {
    short_period: usize,
    long_period: usize,
    order_quantity: Decimal,
}

impl CrossoverParams {
    pub fn new(short_period: usize, long_period: usize, order_quantity: Decimal) -> Result<Self> {
        if short_period == 0 {
            return Err(PipelineError::Config("short_period must be positive".into()));
        }
        if long_period <= short_period {
            return Err(PipelineError::Config(format!(
                "long_period ({}) must be greater than short_period ({})",
                long_period, short_period
            )));
        }
        if order_quantity <= Decimal::ZERO {
            return Err(PipelineError::Config(format!(
                "order_quantity must be positive, got {}",
                order_quantity
            )));
        }

        Ok(Self {
            short_period,
            long_period,
            order_quantity,
        })
    }

    pub fn short_period(&self) -> usize {
        self.short_period
    }

    pub fn long_period(&self) -> usize {
        self.long_period
    }

    pub fn order_quantity(&self) -> Decimal {
        self.order_quantity
    }
}

/// Position implied by the most recent signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    NoSignal,
    Long,
    Short,
}

impl PositionState {
    pub fn from_last(last: Option<Side>) -> Self {
        match last {
            None => PositionState::NoSignal,
            Some(Side::Buy) => PositionState::Long,
            Some(Side::Sell) => PositionState::Short,
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PositionState::NoSignal => "NO_SIGNAL",
            PositionState::Long => "LONG",
            PositionState::Short => "SHORT",
        })
    }
}

/// Signal to emit for the current state and averages, if any
///
/// With no prior signal a tie counts as bearish. Once positioned, only a
/// strict cross flips the state.
pub fn decide(state: PositionState, short_sma: Decimal, long_sma: Decimal) -> Option<Side> {
    match state {
        PositionState::NoSignal if short_sma > long_sma => Some(Side::Buy),
        PositionState::NoSignal => Some(Side::Sell),
        PositionState::Long if short_sma < long_sma => Some(Side::Sell),
        PositionState::Short if short_sma > long_sma => Some(Side::Buy),
        PositionState::Long | PositionState::Short => None,
    }
}
