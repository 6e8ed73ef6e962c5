//! Layered settings: built-in defaults, then an optional TOML file, then
//! `BOOKWATCH__SECTION__KEY` environment variables. CLI flags are applied on
//! top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::market_data::adapters::coinbase::{CoinbaseAdapter, DEFAULT_BASE_URL};
use crate::market_data::backoff::BackoffPolicy;
use crate::market_data::error::FetchError;
use crate::market_data::feed::{FeedOptions, SubscriptionSpec};
use crate::market_data::normaliser::Normaliser;
use crate::market_data::types::{BookLevel, BookRequest, ProductId};

pub const DEFAULT_CONFIG_FILE: &str = "bookwatch.toml";
pub const ENV_PREFIX: &str = "BOOKWATCH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub feed: FeedSettings,
    pub views: ViewSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub user_agent: String,
    /// Unset means no timeout on the REST call.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("bookwatch-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub product: String,
    pub max_levels: usize,
    pub price_decimals: u32,
    pub size_decimals: u32,
    pub error_channel_capacity: usize,
    pub backoff: BackoffPolicy,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            product: "BTC-USD".to_string(),
            max_levels: 50,
            price_decimals: 8,
            size_decimals: 8,
            error_channel_capacity: 16,
            backoff: BackoffPolicy::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ViewTiming {
    pub interval_ms: u64,
    pub max_staleness_ms: u64,
}

impl ViewTiming {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub order_table: ViewTiming,
    pub spread: ViewTiming,
    pub imbalance: ViewTiming,
    pub depth: ViewTiming,
    pub table_rows: usize,
    pub spread_window: usize,
    pub imbalance_levels: usize,
    pub depth_levels: usize,
}

// Poll every second; the spread view tolerates 2s of staleness, the rest 5s.
impl Default for ViewSettings {
    fn default() -> Self {
        let relaxed = ViewTiming { interval_ms: 1_000, max_staleness_ms: 5_000 };
        Self {
            order_table: relaxed,
            spread: ViewTiming { interval_ms: 1_000, max_staleness_ms: 2_000 },
            imbalance: relaxed,
            depth: relaxed,
            table_rows: 10,
            spread_window: 60,
            imbalance_levels: 10,
            depth_levels: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub frame_ms: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self { frame_ms: 250 }
    }
}

impl Settings {
    /// `path` must exist when given; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file: PathBuf = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let settings: Settings = Config::builder()
            .add_source(File::from(file).required(path.is_some()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.product.trim().is_empty() {
            return Err(ConfigError::Message("feed.product must not be empty".into()));
        }
        if self.feed.max_levels == 0 {
            return Err(ConfigError::Message("feed.max_levels must be at least 1".into()));
        }
        if self.feed.price_decimals > 18 || self.feed.size_decimals > 18 {
            return Err(ConfigError::Message("feed decimals must be 18 or fewer".into()));
        }
        let timings = [
            ("order_table", self.views.order_table),
            ("spread", self.views.spread),
            ("imbalance", self.views.imbalance),
            ("depth", self.views.depth),
        ];
        for (name, timing) in timings {
            if timing.interval_ms == 0 {
                return Err(ConfigError::Message(format!("views.{}.interval_ms must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn product(&self) -> ProductId {
        ProductId::new(self.feed.product.clone())
    }

    pub fn request(&self, level: BookLevel) -> BookRequest {
        BookRequest::new(self.product(), level)
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            normaliser: Normaliser::new(self.feed.price_decimals, self.feed.size_decimals),
            max_levels: self.feed.max_levels,
            error_channel_capacity: self.feed.error_channel_capacity,
        }
    }

    pub fn coinbase_adapter(&self) -> Result<CoinbaseAdapter, FetchError> {
        CoinbaseAdapter::new(
            &self.api.base_url,
            &self.api.user_agent,
            self.api.request_timeout_ms.map(Duration::from_millis),
        )
    }

    pub fn subscription(&self, level: BookLevel, timing: ViewTiming) -> SubscriptionSpec {
        SubscriptionSpec::new(self.request(level), timing.interval())
            .with_max_staleness(timing.max_staleness())
            .with_backoff(self.feed.backoff)
    }
}
