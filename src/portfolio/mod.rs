pub mod types;
pub mod pricing;
pub mod rewards;
pub mod signal;
pub mod engine;
pub mod stats;
pub mod store;
pub mod price_feed;
pub mod ai_client;
pub mod manager;

pub use manager::PortfolioManager;
pub use types::*;
