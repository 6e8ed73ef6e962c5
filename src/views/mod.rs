//! Display values derived from book snapshots. Each view owns its own state
//! and is fed by a feed subscription at its own cadence.

pub mod depth;
pub mod imbalance;
pub mod order_table;
pub mod spread;

pub use depth::DepthCurve;
pub use imbalance::Imbalance;
pub use order_table::OrderTable;
pub use spread::SpreadSeries;

use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::BookLevel;

pub trait View: Send {
    fn name(&self) -> &'static str;

    /// Book depth this view needs from the feed.
    fn level(&self) -> BookLevel;

    fn apply(&mut self, snapshot: &BookSnapshot);

    /// One-line summary for the plain printer.
    fn summary(&self) -> String;
}
