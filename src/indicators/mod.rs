// Moving averages over the stored price window
pub mod cache;
pub mod moving_average;

pub use cache::{MovingAverageCache, StalenessPolicy};
pub use moving_average::calculate_sma;
