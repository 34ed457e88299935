pub mod direction;
pub mod price;
pub mod session;
pub mod timeframe;

pub use direction::*;
pub use price::{PriceSample, PriceSeries};
pub use timeframe::Timeframe;
