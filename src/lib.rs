pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod prices;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
