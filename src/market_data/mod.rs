// Market data module entrypoint
pub mod adapters;    // venue-specific fetchers (Coinbase REST)
pub mod backoff;     // optional retry spacing for failing subscriptions
pub mod error;       // FetchError / ParseError taxonomy
pub mod feed;        // shared cache, request coalescing, subscriptions
pub mod normaliser;  // converts strings -> ticks/lots
pub mod snapshot;    // immutable normalised book
pub mod types;       // product / request / level types

pub use error::{FeedError, FeedResult, FetchError, ParseError};
pub use feed::{OrderBookFeed, Subscription, SubscriptionHandle, SubscriptionSpec};
pub use snapshot::BookSnapshot;
pub use types::{BookLevel, BookRequest, PriceLevel, ProductId};
