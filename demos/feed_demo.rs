// Standalone walk through the order book feed against the live Coinbase API
// Run with: cargo run --example feed_demo

use std::sync::Arc;
use std::time::Duration;

use bookwatch_rs::config::Settings;
use bookwatch_rs::market_data::feed::{OrderBookFeed, SubscriptionSpec};
use bookwatch_rs::market_data::types::BookLevel;
use bookwatch_rs::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("bookwatch_rs=debug,info");

    println!("Order Book Feed Demo");
    println!("====================");
    println!("1. Two concurrent level-2 requests share one HTTP call");
    println!("2. A 1s subscription served from a 3s cache for five seconds");
    println!();

    let settings = Settings::default();
    let feed = OrderBookFeed::new(Arc::new(settings.coinbase_adapter()?), settings.feed_options());
    let request = settings.request(BookLevel::Level2);

    let (a, b) = tokio::join!(
        feed.get_snapshot(&request, Duration::ZERO),
        feed.get_snapshot(&request, Duration::ZERO)
    );
    let (a, b) = (a?, b?);
    println!("Coalesced: same snapshot = {}", Arc::ptr_eq(&a, &b));

    let spec = SubscriptionSpec::new(settings.request(BookLevel::Level1), Duration::from_secs(1))
        .with_max_staleness(Duration::from_secs(3));
    let mut sub = feed.subscribe(spec, |snapshot| match snapshot.spread() {
        Some(spread) => println!("[{}] spread {:.2}", snapshot.ts_ms, spread),
        None => println!("[{}] one-sided book", snapshot.ts_ms),
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    sub.handle.cancel();
    while let Ok(e) = sub.errors.try_recv() {
        println!("error during demo: {}", e);
    }
    Ok(())
}
