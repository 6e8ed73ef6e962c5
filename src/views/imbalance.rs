use super::View;
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::{BookLevel, PriceLevel};

/// `(bid size - ask size) / (bid size + ask size)` over the top `depth`
/// levels. `None` when there is no size on either side.
pub fn imbalance(snapshot: &BookSnapshot, depth: usize) -> Option<f64> {
    let total = |side: &[PriceLevel]| side.iter().take(depth).map(|l| l.size as u128).sum::<u128>();
    let bid = total(&snapshot.bids);
    let ask = total(&snapshot.asks);
    if bid + ask == 0 {
        return None;
    }
    Some((bid as f64 - ask as f64) / (bid + ask) as f64)
}

#[derive(Debug, Clone)]
pub struct Imbalance {
    depth: usize,
    value: Option<f64>,
}

impl Imbalance {
    pub const DEFAULT_DEPTH: usize = 10;

    pub fn new(depth: usize) -> Self {
        Self { depth, value: None }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Maps [-1, 1] onto [0, 1] for gauges.
    pub fn gauge_ratio(&self) -> f64 {
        self.value.map_or(0.5, |v| ((v + 1.0) / 2.0).clamp(0.0, 1.0))
    }
}

impl Default for Imbalance {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEPTH)
    }
}

impl View for Imbalance {
    fn name(&self) -> &'static str {
        "imbalance"
    }

    fn level(&self) -> BookLevel {
        BookLevel::Level2
    }

    fn apply(&mut self, snapshot: &BookSnapshot) {
        self.value = imbalance(snapshot, self.depth);
    }

    fn summary(&self) -> String {
        match self.value {
            Some(v) if v >= 0.0 => format!("imbalance +{:.4} (bid heavy)", v),
            Some(v) => format!("imbalance {:.4} (ask heavy)", v),
            None => "imbalance: no data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::normaliser::Normaliser;
    use crate::market_data::snapshot::raw_book;
    use crate::market_data::types::BookRequest;
    use proptest::prelude::*;
    use tokio::time::Instant;

    fn snapshot(bids: &[PriceLevel], asks: &[PriceLevel]) -> BookSnapshot {
        let req = BookRequest::new("BTC-USD", BookLevel::Level2);
        let mut snap =
            BookSnapshot::from_raw(&req, &raw_book(&[], &[]), &Normaliser::default(), 50, Instant::now()).unwrap();
        snap.bids = bids.to_vec();
        snap.asks = asks.to_vec();
        snap
    }

    #[test]
    fn test_known_book() {
        let raw = raw_book(&[("100.00", "1"), ("99.50", "2")], &[("100.50", "1"), ("101.00", "3")]);
        let req = BookRequest::new("BTC-USD", BookLevel::Level2);
        let snap = BookSnapshot::from_raw(&req, &raw, &Normaliser::default(), 50, Instant::now()).unwrap();

        let mut view = Imbalance::default();
        view.apply(&snap);
        assert!((view.value().unwrap() - (-1.0 / 7.0)).abs() < 1e-12);
        assert!(view.summary().contains("ask heavy"));
    }

    #[test]
    fn test_only_top_levels_count() {
        let bids: Vec<PriceLevel> = (0..12).map(|i| PriceLevel { price: 100 - i, size: 1 }).collect();
        let mut asks: Vec<PriceLevel> = (0..10).map(|i| PriceLevel { price: 200 + i, size: 1 }).collect();
        asks.push(PriceLevel { price: 300, size: 1_000 });
        // 10 vs 10 inside the window; the tails are ignored
        assert_eq!(imbalance(&snapshot(&bids, &asks), 10), Some(0.0));
    }

    #[test]
    fn test_empty_book() {
        let view_value = imbalance(&snapshot(&[], &[]), 10);
        assert_eq!(view_value, None);
        assert_eq!(Imbalance::default().gauge_ratio(), 0.5);
    }

    #[test]
    fn test_one_sided() {
        let bids = [PriceLevel { price: 1, size: 5 }];
        assert_eq!(imbalance(&snapshot(&bids, &[]), 10), Some(1.0));
        assert_eq!(imbalance(&snapshot(&[], &bids), 10), Some(-1.0));
    }

    proptest! {
        #[test]
        fn imbalance_stays_in_range(
            bid_sizes in proptest::collection::vec(0u64..u64::MAX / 64, 0..60),
            ask_sizes in proptest::collection::vec(0u64..u64::MAX / 64, 0..60),
        ) {
            let bids: Vec<PriceLevel> = bid_sizes.iter().map(|&size| PriceLevel { price: 1, size }).collect();
            let asks: Vec<PriceLevel> = ask_sizes.iter().map(|&size| PriceLevel { price: 2, size }).collect();
            if let Some(v) = imbalance(&snapshot(&bids, &asks), 10) {
                prop_assert!((-1.0..=1.0).contains(&v));
            }
        }
    }
}
