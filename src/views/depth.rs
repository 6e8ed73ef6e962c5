use super::View;
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::{BookLevel, PriceLevel};

/// Running total of size along one side, best level first.
pub fn cumulative(side: &[PriceLevel], levels: usize) -> Vec<u64> {
    side.iter()
        .take(levels)
        .scan(0u64, |acc, l| {
            *acc = acc.saturating_add(l.size);
            Some(*acc)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct DepthCurve {
    levels: usize,
    pub bids: Vec<f64>,
    pub asks: Vec<f64>,
}

impl DepthCurve {
    pub const DEFAULT_LEVELS: usize = 50;

    pub fn new(levels: usize) -> Self {
        Self { levels, bids: Vec::new(), asks: Vec::new() }
    }

    /// (level number starting at 1, cumulative size)
    pub fn bid_points(&self) -> Vec<(f64, f64)> {
        points(&self.bids)
    }

    pub fn ask_points(&self) -> Vec<(f64, f64)> {
        points(&self.asks)
    }

    pub fn max_total(&self) -> f64 {
        let last = |v: &[f64]| v.last().copied().unwrap_or(0.0);
        last(&self.bids).max(last(&self.asks))
    }
}

fn points(side: &[f64]) -> Vec<(f64, f64)> {
    side.iter().enumerate().map(|(i, v)| ((i + 1) as f64, *v)).collect()
}

impl Default for DepthCurve {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVELS)
    }
}

impl View for DepthCurve {
    fn name(&self) -> &'static str {
        "depth"
    }

    fn level(&self) -> BookLevel {
        BookLevel::Level2
    }

    fn apply(&mut self, snapshot: &BookSnapshot) {
        let to_sizes = |side: &[PriceLevel]| {
            cumulative(side, self.levels).into_iter().map(|lots| snapshot.size_f64(lots)).collect::<Vec<_>>()
        };
        let bids = to_sizes(&snapshot.bids);
        let asks = to_sizes(&snapshot.asks);
        self.bids = bids;
        self.asks = asks;
    }

    fn summary(&self) -> String {
        format!(
            "depth bids {:.4} over {} levels | asks {:.4} over {} levels",
            self.bids.last().copied().unwrap_or(0.0),
            self.bids.len(),
            self.asks.last().copied().unwrap_or(0.0),
            self.asks.len()
        )
    }
}
