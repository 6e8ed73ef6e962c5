//! ratatui front end: spread line, imbalance gauge, depth curves, book table.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::cursor::Show;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::Span;
use ratatui::widgets::block::{Position, Title};
use ratatui::widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, GraphType, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{Dashboard, DashboardState, Panel};
use crate::views::View;

type Term = Terminal<CrosstermBackend<Stdout>>;

// Runs `restore` on drop, including early `?` returns during setup.
struct RestoreOnDrop<F: FnMut()> {
    restore: F,
}

impl<F: FnMut()> Drop for RestoreOnDrop<F> {
    fn drop(&mut self) {
        (self.restore)();
    }
}

fn restore_terminal() {
    if let Err(e) = disable_raw_mode() {
        warn!(error = %e, "failed to leave raw mode");
    }
    if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, Show) {
        warn!(error = %e, "failed to leave alternate screen");
    }
}

/// Takes over the terminal until `q`, `Esc` or Ctrl-C, then restores it.
pub async fn run(dashboard: &Dashboard, frame: Duration) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let _restore = RestoreOnDrop { restore: restore_terminal };
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    event_loop(&mut terminal, dashboard, frame).await
}

async fn event_loop(terminal: &mut Term, dashboard: &Dashboard, frame: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(frame.max(Duration::from_millis(16)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        {
            let state = dashboard.state.lock().clone();
            terminal.draw(|f| render(f, &state))?;
        }
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    info!("dashboard closed by user");
                    return Ok(());
                }
            }
        }
    }
}

pub fn render(f: &mut Frame, state: &DashboardState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Percentage(28),
            Constraint::Length(3),
            Constraint::Percentage(28),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(f.size());

    let title = format!("{} Orderbook & Indicators   (q to quit)", state.product);
    f.render_widget(
        Paragraph::new(Span::styled(title, Style::default().add_modifier(Modifier::BOLD))),
        rows[0],
    );
    render_spread(f, state, rows[1]);
    render_imbalance(f, state, rows[2]);
    render_depth(f, state, rows[3]);
    render_table(f, state, rows[4]);
    render_status(f, state, rows[5]);
}

fn panel_block(panel: Panel) -> Block<'static> {
    Block::default().title(panel.title()).borders(Borders::ALL)
}

fn render_spread(f: &mut Frame, state: &DashboardState, area: Rect) {
    let points = state.spread.points();
    let (lo, hi) = match (state.spread.min(), state.spread.max()) {
        (Some(lo), Some(hi)) => {
            let pad = ((hi - lo) * 0.1).max(0.01);
            (lo - pad, hi + pad)
        }
        _ => (0.0, 1.0),
    };
    let window = points.len().max(2) as f64 - 1.0;

    let datasets = vec![Dataset::default()
        .name("spread")
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&points)];
    let chart = Chart::new(datasets)
        .block(panel_block(Panel::Spread).title(Title::from(state.spread.summary()).position(Position::Bottom)))
        .x_axis(Axis::default().bounds([0.0, window]))
        .y_axis(
            Axis::default()
                .bounds([lo, hi])
                .labels(vec![Span::raw(format!("{:.2}", lo)), Span::raw(format!("{:.2}", hi))]),
        );
    f.render_widget(chart, area);
}

fn render_imbalance(f: &mut Frame, state: &DashboardState, area: Rect) {
    let color = match state.imbalance.value() {
        Some(v) if v < 0.0 => Color::Red,
        Some(_) => Color::Green,
        None => Color::DarkGray,
    };
    let gauge = Gauge::default()
        .block(panel_block(Panel::Imbalance))
        .gauge_style(Style::default().fg(color))
        .ratio(state.imbalance.gauge_ratio())
        .label(state.imbalance.summary());
    f.render_widget(gauge, area);
}

fn render_depth(f: &mut Frame, state: &DashboardState, area: Rect) {
    let bids = state.depth.bid_points();
    let asks = state.depth.ask_points();
    let levels = bids.len().max(asks.len()).max(2) as f64;
    let top = state.depth.max_total().max(f64::EPSILON);

    let datasets = vec![
        Dataset::default()
            .name("bids")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Green))
            .data(&bids),
        Dataset::default()
            .name("asks")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Red))
            .data(&asks),
    ];
    let chart = Chart::new(datasets)
        .block(panel_block(Panel::Depth))
        .x_axis(Axis::default().bounds([1.0, levels]))
        .y_axis(
            Axis::default()
                .bounds([0.0, top])
                .labels(vec![Span::raw("0"), Span::raw(format!("{:.4}", top))]),
        );
    f.render_widget(chart, area);
}

fn render_table(f: &mut Frame, state: &DashboardState, area: Rect) {
    let table = &state.order_table;
    let n = table.bids.len().max(table.asks.len());
    let rows = (0..n).map(|i| {
        let bid = table.bids.get(i);
        let ask = table.asks.get(i);
        Row::new(vec![
            Cell::from(bid.map(|r| r.size_label()).unwrap_or_default()),
            Cell::from(bid.map(|r| r.price_label()).unwrap_or_default()).style(Style::default().fg(Color::Green)),
            Cell::from(ask.map(|r| r.price_label()).unwrap_or_default()).style(Style::default().fg(Color::Red)),
            Cell::from(ask.map(|r| r.size_label()).unwrap_or_default()),
        ])
    });
    let header = Row::new(vec!["Bid Size", "Bid Price", "Ask Price", "Ask Size"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let widths = [Constraint::Percentage(25); 4];
    let block = Block::default()
        .title(format!("{} (top {})", Panel::OrderTable.title(), table.depth()))
        .borders(Borders::ALL);
    f.render_widget(Table::new(rows, widths).header(header).block(block), area);
}

fn render_status(f: &mut Frame, state: &DashboardState, area: Rect) {
    let (text, style) = match (state.last_error(), state.any_crossed()) {
        (Some(err), _) => (format!("stale: {}", err), Style::default().fg(Color::Yellow)),
        (None, true) => ("crossed book received".to_string(), Style::default().fg(Color::Yellow)),
        (None, false) => match state.last_update_ms {
            Some(ts) => (format!("last update {} ms", ts), Style::default().fg(Color::DarkGray)),
            None => ("waiting for data...".to_string(), Style::default().fg(Color::DarkGray)),
        },
    };
    f.render_widget(Paragraph::new(Span::styled(text, style)), area);
}
