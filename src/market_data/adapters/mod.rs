// Shared trait for order book sources

use crate::market_data::error::FeedResult;
use crate::market_data::types::BookRequest;

pub use coinbase::CoinbaseAdapter;
pub use coinbase_types::{RawBook, RawLevel};

#[async_trait::async_trait]
pub trait BookSource: Send + Sync {
    /// One REST round trip. The feed decides when to call it.
    async fn fetch_book(&self, request: &BookRequest) -> FeedResult<RawBook>;
}

pub mod coinbase;
pub mod coinbase_types;
