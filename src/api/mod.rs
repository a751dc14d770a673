// Exchange connectivity: signed REST orders and the depth stream
pub mod binance;
pub mod binance_stream;

pub use binance::BinanceClient;
pub use binance_stream::{parse_depth, DepthStream};
