// Crossover strategy: parameters and the position state machine
pub mod crossover;

pub use crossover::{decide, CrossoverParams, PositionState};
