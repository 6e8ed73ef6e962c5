// Plain line printer: one line per panel update, no terminal takeover.

use std::sync::Arc;

use tracing::info;

use super::{Dashboard, DashboardState, Panel, UpdateHook};
use crate::config::Settings;
use crate::market_data::feed::OrderBookFeed;

pub fn format_update(panel: Panel, state: &DashboardState) -> String {
    let ts = state.last_update_ms.unwrap_or_default();
    let crossed = if state.panel_crossed(panel) { " [crossed]" } else { "" };
    format!("[{}] {:<20} {}{}", ts, panel.title(), state.view(panel).summary(), crossed)
}

/// Prints until Ctrl-C.
pub async fn run(feed: &OrderBookFeed, settings: &Settings) -> anyhow::Result<()> {
    println!("Watching {} (Ctrl+C to stop)", settings.product());
    let hook: UpdateHook = Arc::new(|panel, state| println!("{}", format_update(panel, state)));
    let mut dashboard = Dashboard::start(feed, settings, Some(hook));

    tokio::signal::ctrl_c().await?;
    info!("interrupted, stopping subscriptions");
    dashboard.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_update() {
        let mut state = DashboardState::new(&Settings::default());
        state.last_update_ms = Some(1_700_000_000_000);
        state.spread.push(0.5);
        let line = format_update(Panel::Spread, &state);
        assert!(line.starts_with("[1700000000000] Spread Indicator"));
        assert!(line.contains("spread 0.50"));

        state.status.entry(Panel::Imbalance).or_default().crossed = true;
        assert!(format_update(Panel::Imbalance, &state).ends_with("[crossed]"));
        assert!(!format_update(Panel::Depth, &state).ends_with("[crossed]"));
    }
}
