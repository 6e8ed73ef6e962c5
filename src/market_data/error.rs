use thiserror::Error;

/// Network / HTTP failures talking to the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("unreadable response body from {url}: {reason}")]
    Body { url: String, reason: String },
    #[error("fetch task ended before completing: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Price,
    Size,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Price => write!(f, "price"),
            Field::Size => write!(f, "size"),
        }
    }
}

/// The response arrived but its contents are not a usable book.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid {field} {value:?}")]
    InvalidDecimal { field: Field, value: String },
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Everything the feed can report. `Clone` so one coalesced failure reaches every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Fetch(_) => "fetch",
            FeedError::Parse(_) => "parse",
        }
    }
}
