use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use bookwatch_rs::config::Settings;
use bookwatch_rs::dashboard::{tui, watch, Dashboard};
use bookwatch_rs::market_data::feed::OrderBookFeed;
use bookwatch_rs::market_data::snapshot::BookSnapshot;
use bookwatch_rs::market_data::types::BookLevel;
use bookwatch_rs::telemetry::{self, LogTarget};
use bookwatch_rs::views::{DepthCurve, Imbalance, OrderTable, View};

#[derive(Debug, Parser)]
#[command(name = "bookwatch", version, about = "Order book dashboard over the Coinbase public REST API")]
struct Cli {
    /// Settings file (TOML). Defaults to ./bookwatch.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Product to watch, e.g. BTC-USD
    #[arg(long, global = true)]
    product: Option<String>,

    /// Exchange REST base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Write logs here instead of stderr (the dashboard defaults to ./bookwatch.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Prometheus exporter port (needs the metrics-exporter feature)
    #[arg(long, global = true, default_value_t = 9000)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Full-screen dashboard (default)
    Dashboard,
    /// Print one line per view update
    Watch,
    /// Fetch one snapshot, print it and exit
    Snapshot {
        #[arg(long, value_enum, default_value_t = LevelArg::Two)]
        level: LevelArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<LevelArg> for BookLevel {
    fn from(l: LevelArg) -> Self {
        match l {
            LevelArg::One => BookLevel::Level1,
            LevelArg::Two => BookLevel::Level2,
        }
    }
}

// Helper function to print one snapshot through every view
fn print_snapshot(snapshot: &BookSnapshot, settings: &Settings) {
    let mut table = OrderTable::new(settings.views.table_rows);
    let mut imbalance = Imbalance::new(settings.views.imbalance_levels);
    let mut depth = DepthCurve::new(settings.views.depth_levels);
    table.apply(snapshot);
    imbalance.apply(snapshot);
    depth.apply(snapshot);

    println!("\n=== {} {} @ {} ===", snapshot.product, snapshot.level, snapshot.ts_ms);
    println!("{:>16} {:>12} | {:<12} {:<16}", "Bid Size", "Bid Price", "Ask Price", "Ask Size");
    for i in 0..table.bids.len().max(table.asks.len()) {
        let bid = table.bids.get(i);
        let ask = table.asks.get(i);
        println!(
            "{:>16} {:>12} | {:<12} {:<16}",
            bid.map(|r| r.size_label()).unwrap_or_default(),
            bid.map(|r| r.price_label()).unwrap_or_default(),
            ask.map(|r| r.price_label()).unwrap_or_default(),
            ask.map(|r| r.size_label()).unwrap_or_default(),
        );
    }

    match snapshot.spread() {
        Some(spread) => println!("Spread: {:.2}{}", spread, if snapshot.is_crossed() { " (crossed!)" } else { "" }),
        None => println!("Spread: N/A"),
    }
    println!("{}", imbalance.summary());
    println!("{}", depth.summary());
    println!("========================\n");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Dashboard);

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(product) = cli.product {
        settings.feed.product = product;
    }
    if let Some(base_url) = cli.base_url {
        settings.api.base_url = base_url;
    }
    settings.validate()?;

    let fullscreen = matches!(command, Command::Dashboard);
    match LogTarget::choose(cli.log_file.as_deref(), fullscreen) {
        LogTarget::File(path) => telemetry::init_tracing_to_file("bookwatch_rs=debug,info", &path)
            .with_context(|| format!("opening log file {}", path.display()))?,
        LogTarget::Stderr => telemetry::init_tracing("bookwatch_rs=info,warn"),
    }
    telemetry::init_metrics(cli.metrics_port)?;

    let adapter = settings.coinbase_adapter()?;
    info!(base_url = %adapter.base_url, product = %settings.product(), "starting bookwatch");
    let feed = OrderBookFeed::new(Arc::new(adapter), settings.feed_options());

    match command {
        Command::Dashboard => {
            let mut dashboard = Dashboard::start(&feed, &settings, None);
            let result = tui::run(&dashboard, Duration::from_millis(settings.dashboard.frame_ms)).await;
            dashboard.stop();
            result?;
        }
        Command::Watch => watch::run(&feed, &settings).await?,
        Command::Snapshot { level } => {
            let request = settings.request(level.into());
            let snapshot = feed.get_snapshot(&request, Duration::ZERO).await?;
            print_snapshot(&snapshot, &settings);
        }
    }

    feed.shutdown();
    Ok(())
}
