//! Wires the four views to feed subscriptions and keeps their latest state
//! for the terminal front ends.

pub mod tui;
pub mod watch;

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Settings, ViewTiming};
use crate::market_data::error::FeedError;
use crate::market_data::feed::{OrderBookFeed, SubscriptionHandle};
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::ProductId;
use crate::views::{DepthCurve, Imbalance, OrderTable, SpreadSeries, View};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Panel {
    Spread,
    Imbalance,
    Depth,
    OrderTable,
}

impl Panel {
    pub const ALL: [Panel; 4] = [Panel::Spread, Panel::Imbalance, Panel::Depth, Panel::OrderTable];

    pub fn title(self) -> &'static str {
        match self {
            Panel::Spread => "Spread Indicator",
            Panel::Imbalance => "Orderbook Imbalance",
            Panel::Depth => "Market Depth",
            Panel::OrderTable => "Order Book",
        }
    }

    pub fn timing(self, settings: &Settings) -> ViewTiming {
        match self {
            Panel::Spread => settings.views.spread,
            Panel::Imbalance => settings.views.imbalance,
            Panel::Depth => settings.views.depth,
            Panel::OrderTable => settings.views.order_table,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardState {
    pub product: ProductId,
    pub spread: SpreadSeries,
    pub imbalance: Imbalance,
    pub depth: DepthCurve,
    pub order_table: OrderTable,
    pub last_update_ms: Option<u64>,
    pub status: AHashMap<Panel, PanelStatus>,
}

/// Outcome of a panel's most recent poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelStatus {
    pub last_error: Option<String>,
    pub crossed: bool,
}

impl DashboardState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            product: settings.product(),
            spread: SpreadSeries::new(settings.views.spread_window),
            imbalance: Imbalance::new(settings.views.imbalance_levels),
            depth: DepthCurve::new(settings.views.depth_levels),
            order_table: OrderTable::new(settings.views.table_rows),
            last_update_ms: None,
            status: AHashMap::new(),
        }
    }

    /// Feed one panel's view and clear that panel's error.
    pub fn absorb(&mut self, panel: Panel, snapshot: &BookSnapshot) {
        self.view_mut(panel).apply(snapshot);
        self.last_update_ms = Some(snapshot.ts_ms);
        let status = self.status.entry(panel).or_default();
        status.crossed = snapshot.is_crossed();
        status.last_error = None;
    }

    pub fn record_error(&mut self, panel: Panel, error: impl fmt::Display) {
        self.status.entry(panel).or_default().last_error = Some(error.to_string());
    }

    pub fn panel_error(&self, panel: Panel) -> Option<&str> {
        self.status.get(&panel).and_then(|s| s.last_error.as_deref())
    }

    pub fn panel_crossed(&self, panel: Panel) -> bool {
        self.status.get(&panel).map_or(false, |s| s.crossed)
    }

    /// First failing panel, in display order, as "Title: error".
    pub fn last_error(&self) -> Option<String> {
        Panel::ALL
            .iter()
            .find_map(|&p| self.panel_error(p).map(|e| format!("{}: {}", p.title(), e)))
    }

    pub fn any_crossed(&self) -> bool {
        Panel::ALL.iter().any(|&p| self.panel_crossed(p))
    }

    pub fn view(&self, panel: Panel) -> &dyn View {
        match panel {
            Panel::Spread => &self.spread,
            Panel::Imbalance => &self.imbalance,
            Panel::Depth => &self.depth,
            Panel::OrderTable => &self.order_table,
        }
    }

    pub fn view_mut(&mut self, panel: Panel) -> &mut dyn View {
        match panel {
            Panel::Spread => &mut self.spread,
            Panel::Imbalance => &mut self.imbalance,
            Panel::Depth => &mut self.depth,
            Panel::OrderTable => &mut self.order_table,
        }
    }
}

/// Called after a panel has absorbed a new snapshot.
pub type UpdateHook = Arc<dyn Fn(Panel, &DashboardState) + Send + Sync>;

pub struct Dashboard {
    pub state: Arc<Mutex<DashboardState>>,
    handles: Vec<SubscriptionHandle>,
    error_pumps: Vec<JoinHandle<()>>,
}

impl Dashboard {
    /// One subscription per panel, each at its own cadence and staleness.
    pub fn start(feed: &OrderBookFeed, settings: &Settings, hook: Option<UpdateHook>) -> Self {
        let state = Arc::new(Mutex::new(DashboardState::new(settings)));
        let mut handles = Vec::with_capacity(Panel::ALL.len());
        let mut error_pumps = Vec::with_capacity(Panel::ALL.len());

        for panel in Panel::ALL {
            let level = state.lock().view(panel).level();
            let spec = settings.subscription(level, panel.timing(settings));
            let sub = feed.subscribe(spec, {
                let state = Arc::clone(&state);
                let hook = hook.clone();
                move |snapshot| {
                    let mut st = state.lock();
                    st.absorb(panel, &snapshot);
                    if let Some(hook) = &hook {
                        hook(panel, &st);
                    }
                }
            });
            debug!(?panel, subscription = sub.handle.id(), "panel subscribed");
            error_pumps.push(tokio::spawn(pump_errors(panel, sub.errors, Arc::clone(&state))));
            handles.push(sub.handle);
        }

        Self { state, handles, error_pumps }
    }

    pub fn stop(&mut self) {
        for handle in &self.handles {
            handle.cancel();
        }
        for pump in self.error_pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pump_errors(panel: Panel, mut errors: mpsc::Receiver<FeedError>, state: Arc<Mutex<DashboardState>>) {
    while let Some(e) = errors.recv().await {
        warn!(?panel, error = %e, "panel refresh failed");
        state.lock().record_error(panel, &e);
    }
}
