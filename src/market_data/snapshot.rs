use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::market_data::adapters::{RawBook, RawLevel};
use crate::market_data::error::ParseError;
use crate::market_data::normaliser::Normaliser;
use crate::market_data::types::{BookLevel, BookRequest, PriceLevel, ProductId, Scale};

/// Normalised state of one book at one instant. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub product: ProductId,
    pub level: BookLevel,
    pub bids: Vec<PriceLevel>, // descending, best first
    pub asks: Vec<PriceLevel>, // ascending, best first
    pub scale: Scale,
    /// Monotonic fetch time, used for staleness.
    pub fetched_at: Instant,
    /// Wall-clock fetch time in unix millis, for display.
    pub ts_ms: u64,
}

impl BookSnapshot {
    /// Build from a raw response. Takes the first `max_levels` of each side in
    /// the order the exchange sent them; the exchange already sorts best-first.
    pub fn from_raw(
        request: &BookRequest,
        raw: &RawBook,
        normaliser: &Normaliser,
        max_levels: usize,
        fetched_at: Instant,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            product: request.product.clone(),
            level: request.level,
            bids: norm_side(normaliser, &raw.bids, max_levels)?,
            asks: norm_side(normaliser, &raw.asks, max_levels)?,
            scale: normaliser.scale,
            fetched_at,
            ts_ms: unix_millis(),
        })
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn bbo(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (self.best_bid(), self.best_ask())
    }

    /// best ask - best bid, in ticks
    pub fn spread_ticks(&self) -> Option<i64> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        self.spread_ticks().map(|t| self.price_f64(t))
    }

    pub fn mid(&self) -> Option<f64> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some((self.price_f64(bid.price) + self.price_f64(ask.price)) / 2.0),
            _ => None,
        }
    }

    /// Crossed books are a data-quality signal, surfaced rather than rejected.
    pub fn is_crossed(&self) -> bool {
        matches!(self.spread_ticks(), Some(s) if s <= 0)
    }

    pub fn price_f64(&self, ticks: i64) -> f64 {
        ticks as f64 / self.scale.price_factor()
    }

    pub fn size_f64(&self, lots: u64) -> f64 {
        lots as f64 / self.scale.size_factor()
    }
}

// Convert raw string levels into normalized (price_ticks, size_lots)
fn norm_side(norm: &Normaliser, side: &[RawLevel], max_levels: usize) -> Result<Vec<PriceLevel>, ParseError> {
    side.iter()
        .take(max_levels)
        .map(|lvl| norm.level(&lvl.price, &lvl.size))
        .collect()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn raw_book(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> RawBook {
    RawBook {
        bids: bids.iter().map(|(p, s)| RawLevel::new(*p, *s)).collect(),
        asks: asks.iter().map(|(p, s)| RawLevel::new(*p, *s)).collect(),
        sequence: None,
    }
}
