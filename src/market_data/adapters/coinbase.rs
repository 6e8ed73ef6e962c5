// Coinbase Exchange public REST adapter

use super::coinbase_types::RawBook;
use super::BookSource;
use crate::market_data::error::{FeedResult, FetchError, ParseError};
use crate::market_data::types::BookRequest;
use serde_json::error::Category;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

pub struct CoinbaseAdapter {
    pub base_url: String, // "https://api.exchange.coinbase.com"
    client: reqwest::Client,
}

impl CoinbaseAdapter {
    /// Coinbase rejects requests without a User-Agent, so one is always set.
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(base_url: &str, user_agent: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent.to_string());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| FetchError::Transport {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn book_url(&self, request: &BookRequest) -> String {
        format!(
            "{}/products/{}/book?level={}",
            self.base_url,
            request.product,
            request.level.as_query()
        )
    }
}

/// Not-JSON is a fetch failure; JSON of the wrong shape is a parse failure.
pub(crate) fn decode_book(url: &str, body: &[u8]) -> FeedResult<RawBook> {
    serde_json::from_slice::<RawBook>(body).map_err(|e| match e.classify() {
        Category::Data => ParseError::Shape(e.to_string()).into(),
        Category::Syntax | Category::Eof | Category::Io => FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        }
        .into(),
    })
}

#[async_trait::async_trait]
impl BookSource for CoinbaseAdapter {
    #[instrument(skip(self), fields(request = %request))]
    async fn fetch_book(&self, request: &BookRequest) -> FeedResult<RawBook> {
        let url = self.book_url(request);
        debug!(%url, "GET order book");

        let res = self.client.get(&url).send().await.map_err(|e| FetchError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = res.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "order book request rejected");
            return Err(FetchError::Status { url, status: status.as_u16() }.into());
        }

        let body = res.bytes().await.map_err(|e| FetchError::Body {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let book = decode_book(&url, &body)?;
        debug!(bids = book.bids.len(), asks = book.asks.len(), sequence = ?book.sequence, "decoded order book");
        Ok(book)
    }
}
