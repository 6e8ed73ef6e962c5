use super::View;
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::{BookLevel, PriceLevel};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    pub price: f64,
    pub size: f64,
}

impl TableRow {
    pub fn price_label(&self) -> String {
        format!("{:.2}", self.price)
    }

    pub fn size_label(&self) -> String {
        format!("{:.8}", self.size)
    }
}

/// Top of book, both sides, as the exchange ordered them.
#[derive(Debug, Clone)]
pub struct OrderTable {
    depth: usize,
    pub bids: Vec<TableRow>,
    pub asks: Vec<TableRow>,
}

impl OrderTable {
    pub const DEFAULT_DEPTH: usize = 10;

    pub fn new(depth: usize) -> Self {
        Self { depth, bids: Vec::new(), asks: Vec::new() }
    }

    /// Rows shown per side.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Default for OrderTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEPTH)
    }
}

impl View for OrderTable {
    fn name(&self) -> &'static str {
        "order_table"
    }

    fn level(&self) -> BookLevel {
        BookLevel::Level2
    }

    fn apply(&mut self, snapshot: &BookSnapshot) {
        let depth = self.depth;
        let rows = |side: &[PriceLevel]| {
            side.iter()
                .take(depth)
                .map(|l| TableRow { price: snapshot.price_f64(l.price), size: snapshot.size_f64(l.size) })
                .collect::<Vec<_>>()
        };
        self.bids = rows(&snapshot.bids);
        self.asks = rows(&snapshot.asks);
    }

    fn summary(&self) -> String {
        match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => format!(
                "BID {} @ {} | ASK {} @ {} ({} x {} rows)",
                b.size_label(),
                b.price_label(),
                a.size_label(),
                a.price_label(),
                self.bids.len(),
                self.asks.len()
            ),
            _ => "book: no data".to_string(),
        }
    }
}
