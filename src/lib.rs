pub mod config;
pub mod dashboard;
pub mod market_data;
pub mod telemetry;
pub mod views;
