use std::collections::VecDeque;

use super::View;
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::BookLevel;

/// Rolling window of best-ask minus best-bid samples.
#[derive(Debug, Clone)]
pub struct SpreadSeries {
    window: usize,
    samples: VecDeque<f64>,
}

impl SpreadSeries {
    pub const DEFAULT_WINDOW: usize = 60;

    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self { window, samples: VecDeque::with_capacity(window) }
    }

    pub fn push(&mut self, spread: f64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(spread);
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn min(&self) -> Option<f64> {
        self.samples().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples().reduce(f64::max)
    }

    /// (sample index, spread) pairs for line charts
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.samples().enumerate().map(|(i, s)| (i as f64, s)).collect()
    }
}

impl Default for SpreadSeries {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

impl View for SpreadSeries {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn level(&self) -> BookLevel {
        BookLevel::Level1
    }

    // A snapshot with an empty side contributes no sample.
    fn apply(&mut self, snapshot: &BookSnapshot) {
        if let Some(spread) = snapshot.spread() {
            self.push(spread);
        }
    }

    fn summary(&self) -> String {
        match (self.latest(), self.min(), self.max()) {
            (Some(last), Some(lo), Some(hi)) => {
                format!("spread {:.2} (min {:.2} max {:.2}, {} samples)", last, lo, hi, self.len())
            }
            _ => "spread: no data".to_string(),
        }
    }
}
