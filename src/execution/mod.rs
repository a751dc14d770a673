// Signal generation and order execution
pub mod engine;
pub mod gateway;
pub mod price_feed;
pub mod price_store;

pub use engine::{Evaluation, SignalEngine, MAX_EVALUATION_IO_CALLS};
pub use gateway::{InstrumentedGateway, OrderGateway, PaperGateway};
pub use price_feed::PriceFeed;
pub use price_store::PriceStore;
