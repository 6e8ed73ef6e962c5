//! Shared polling and caching layer for order book snapshots.
//!
//! `OrderBookFeed` owns the only mutable state: a cache with one entry per
//! [`BookRequest`] and a registry of in-flight fetches. Every consumer reads
//! through [`OrderBookFeed::get_snapshot`] or a [`Subscription`], so concurrent
//! readers of one request share a single HTTP call and never see a cache entry
//! mid-replacement.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::market_data::adapters::BookSource;
use crate::market_data::backoff::BackoffPolicy;
use crate::market_data::error::{FeedError, FeedResult, FetchError};
use crate::market_data::normaliser::Normaliser;
use crate::market_data::snapshot::BookSnapshot;
use crate::market_data::types::BookRequest;

type SharedFetch = Shared<BoxFuture<'static, FeedResult<Arc<BookSnapshot>>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: Arc<BookSnapshot>,
    fetched_at: Instant,
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub normaliser: Normaliser,
    /// Levels kept per side after each fetch.
    pub max_levels: usize,
    /// Per-subscription error channel capacity; overflow is logged and dropped.
    pub error_channel_capacity: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            normaliser: Normaliser::default(),
            max_levels: 50,
            error_channel_capacity: 16,
        }
    }
}

#[derive(Default)]
struct FeedState {
    cache: AHashMap<BookRequest, CacheEntry>,
    in_flight: AHashMap<BookRequest, SharedFetch>,
}

struct Inner {
    source: Arc<dyn BookSource>,
    options: FeedOptions,
    state: Mutex<FeedState>,
    subscriptions: Mutex<Vec<Weak<SubscriptionState>>>,
    next_subscription_id: AtomicU64,
}

/// Cheap to clone; all clones share one cache.
#[derive(Clone)]
pub struct OrderBookFeed {
    inner: Arc<Inner>,
}

impl OrderBookFeed {
    pub fn new(source: Arc<dyn BookSource>, options: FeedOptions) -> Self {
        info!(max_levels = options.max_levels, "order book feed created");
        Self {
            inner: Arc::new(Inner {
                source,
                options,
                state: Mutex::new(FeedState::default()),
                subscriptions: Mutex::new(Vec::new()),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    /// Cached snapshot if it is younger than `max_staleness`, otherwise a fresh
    /// one. A zero `max_staleness` always refreshes. Callers that arrive while
    /// a refresh for the same request is running wait on that refresh.
    #[instrument(level = "debug", skip(self), fields(request = %request))]
    pub async fn get_snapshot(&self, request: &BookRequest, max_staleness: Duration) -> FeedResult<Arc<BookSnapshot>> {
        let fetch = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.cache.get(request) {
                let age = entry.fetched_at.elapsed();
                if age < max_staleness {
                    trace!(age_ms = age.as_millis() as u64, "cache hit");
                    metrics::counter!("bookwatch_cache_hits_total", "product" => request.product.to_string())
                        .increment(1);
                    return Ok(Arc::clone(&entry.snapshot));
                }
            }
            match state.in_flight.get(request) {
                Some(pending) => {
                    debug!("joining in-flight fetch");
                    metrics::counter!("bookwatch_coalesced_total", "product" => request.product.to_string())
                        .increment(1);
                    pending.clone()
                }
                None => {
                    let pending = self.start_fetch(request.clone());
                    state.in_flight.insert(request.clone(), pending.clone());
                    pending
                }
            }
        };
        fetch.await
    }

    /// Last known-good snapshot, without fetching.
    pub fn cached(&self, request: &BookRequest) -> Option<Arc<BookSnapshot>> {
        self.inner.state.lock().cache.get(request).map(|e| Arc::clone(&e.snapshot))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    // The fetch runs on its own task so it completes, updates the cache and
    // clears its in-flight slot even if every waiter has gone away.
    fn start_fetch(&self, request: BookRequest) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.refresh(request));
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Aborted(e.to_string()).into()),
            }
        }
        .boxed()
        .shared()
    }

    /// Poll `spec.request` every `spec.interval`, starting immediately.
    ///
    /// `on_snapshot` runs for every successful poll, whether it was served from
    /// cache or fetched. Failures go to [`Subscription::errors`] instead and
    /// polling carries on with the next tick.
    pub fn subscribe<F>(&self, spec: SubscriptionSpec, on_snapshot: F) -> Subscription
    where
        F: FnMut(Arc<BookSnapshot>) + Send + 'static,
    {
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriptionState {
            id,
            request: spec.request.clone(),
            live: AtomicBool::new(true),
            delivery: ReentrantMutex::new(()),
            task: Mutex::new(None),
        });
        let (tx, rx) = mpsc::channel(self.inner.options.error_channel_capacity.max(1));

        info!(
            subscription = id,
            request = %spec.request,
            interval_ms = spec.interval.as_millis() as u64,
            max_staleness_ms = spec.max_staleness.as_millis() as u64,
            "subscribed"
        );

        let task = tokio::spawn(poll_loop(self.clone(), spec, Arc::clone(&state), on_snapshot, tx));
        *state.task.lock() = Some(task.abort_handle());

        let mut registry = self.inner.subscriptions.lock();
        registry.retain(|w| w.upgrade().map_or(false, |s| s.is_active()));
        registry.push(Arc::downgrade(&state));

        Subscription {
            handle: SubscriptionHandle { state },
            errors: rx,
        }
    }

    /// Idempotent. Same as [`SubscriptionHandle::cancel`].
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.cancel();
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.is_active())
            .count()
    }

    /// Cancel every subscription started from this feed. Handles stay valid.
    pub fn shutdown(&self) {
        let subs: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
        let mut cancelled = 0;
        for sub in subs.iter().filter_map(Weak::upgrade) {
            if sub.cancel() {
                cancelled += 1;
            }
        }
        info!(cancelled, "order book feed shut down");
    }
}

impl Inner {
    async fn refresh(self: Arc<Self>, request: BookRequest) -> FeedResult<Arc<BookSnapshot>> {
        metrics::counter!("bookwatch_fetch_total", "product" => request.product.to_string()).increment(1);
        let started = Instant::now();

        let fetched = AssertUnwindSafe(self.source.fetch_book(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(FetchError::Aborted("book source panicked".into()).into()));

        let result = fetched
            .and_then(|raw| {
                BookSnapshot::from_raw(
                    &request,
                    &raw,
                    &self.options.normaliser,
                    self.options.max_levels,
                    Instant::now(),
                )
                .map_err(FeedError::from)
            })
            .map(Arc::new);

        // cache write and in-flight release happen together
        {
            let mut state = self.state.lock();
            state.in_flight.remove(&request);
            if let Ok(snapshot) = &result {
                state.cache.insert(
                    request.clone(),
                    CacheEntry {
                        snapshot: Arc::clone(snapshot),
                        fetched_at: snapshot.fetched_at,
                    },
                );
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(snapshot) => {
                debug!(
                    request = %request,
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    elapsed_ms,
                    "cache refreshed"
                );
                if snapshot.is_crossed() {
                    metrics::counter!("bookwatch_crossed_books_total", "product" => request.product.to_string())
                        .increment(1);
                    warn!(request = %request, spread = ?snapshot.spread(), "crossed book received");
                }
            }
            Err(e) => {
                metrics::counter!(
                    "bookwatch_fetch_errors_total",
                    "product" => request.product.to_string(),
                    "kind" => e.kind()
                )
                .increment(1);
                warn!(request = %request, error = %e, elapsed_ms, "refresh failed, keeping previous snapshot");
            }
        }
        result
    }
}

/// What to poll and how often.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub request: BookRequest,
    pub interval: Duration,
    /// Oldest cached snapshot this subscriber accepts. Defaults to `interval`.
    pub max_staleness: Duration,
    pub backoff: BackoffPolicy,
}

impl SubscriptionSpec {
    pub fn new(request: BookRequest, interval: Duration) -> Self {
        Self { request, interval, max_staleness: interval, backoff: BackoffPolicy::None }
    }

    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

struct SubscriptionState {
    id: u64,
    request: BookRequest,
    live: AtomicBool,
    // Held for the length of a callback. Reentrant so a callback may cancel
    // its own subscription.
    delivery: ReentrantMutex<()>,
    task: Mutex<Option<AbortHandle>>,
}

impl SubscriptionState {
    fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Runs `f` only while live; cancellation waits for a running `f` to finish.
    fn deliver(&self, f: impl FnOnce()) -> bool {
        let _delivery = self.delivery.lock();
        if !self.is_active() {
            return false;
        }
        f();
        true
    }

    fn cancel(&self) -> bool {
        let was_live = {
            let _delivery = self.delivery.lock();
            self.live.swap(false, Ordering::AcqRel)
        };
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if was_live {
            info!(subscription = self.id, request = %self.request, "unsubscribed");
        }
        was_live
    }
}

/// Cancellation handle. Cloneable, and usable after the feed is gone.
#[derive(Clone)]
pub struct SubscriptionHandle {
    state: Arc<SubscriptionState>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Stops future ticks and discards any in-flight result for this
    /// subscription. When this returns no callback is running and none will
    /// start. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.state.id)
            .field("request", &self.state.request)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Dropping a `Subscription` does not cancel it; use the handle.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub errors: mpsc::Receiver<FeedError>,
}

async fn poll_loop<F>(
    feed: OrderBookFeed,
    spec: SubscriptionSpec,
    state: Arc<SubscriptionState>,
    mut on_snapshot: F,
    errors: mpsc::Sender<FeedError>,
) where
    F: FnMut(Arc<BookSnapshot>) + Send + 'static,
{
    let mut ticker = tokio::time::interval(spec.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        ticker.tick().await;
        if !state.is_active() {
            break;
        }

        match feed.get_snapshot(&spec.request, spec.max_staleness).await {
            Ok(snapshot) => {
                failures = 0;
                if !state.deliver(|| on_snapshot(snapshot)) {
                    trace!(subscription = state.id, "discarding result for cancelled subscription");
                    break;
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delivered = state.deliver(|| {
                    if let Err(mpsc::error::TrySendError::Full(e)) = errors.try_send(e) {
                        warn!(subscription = state.id, error = %e, "error channel full, dropping error");
                    }
                });
                if !delivered {
                    break;
                }
                let extra = spec.backoff.extra_delay(failures);
                if !extra.is_zero() {
                    debug!(subscription = state.id, failures, delay_ms = extra.as_millis() as u64, "backing off");
                    tokio::time::sleep(extra).await;
                    ticker.reset();
                }
            }
        }
    }
    debug!(subscription = state.id, "poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::RawBook;
    use crate::market_data::error::{Field, ParseError};
    use crate::market_data::snapshot::raw_book;
    use crate::market_data::types::BookLevel;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;
    use tokio::sync::Semaphore;

    /// Replays queued responses (a default book once the queue is empty).
    /// With `gated`, each fetch waits for a permit so tests can hold it in flight.
    struct ScriptedSource {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<FeedResult<RawBook>>>,
        gate: Option<Semaphore>,
    }

    impl ScriptedSource {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), responses: Mutex::new(VecDeque::new()), gate: None })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(VecDeque::new()),
                gate: Some(Semaphore::new(0)),
            })
        }

        fn push(&self, response: FeedResult<RawBook>) {
            self.responses.lock().push_back(response);
        }

        fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl BookSource for ScriptedSource {
        async fn fetch_book(&self, _request: &BookRequest) -> FeedResult<RawBook> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.responses.lock().pop_front().unwrap_or_else(|| Ok(default_book()))
        }
    }

    fn default_book() -> RawBook {
        raw_book(&[("100.00", "1"), ("99.50", "2")], &[("100.50", "1"), ("101.00", "3")])
    }

    fn req() -> BookRequest {
        BookRequest::new("BTC-USD", BookLevel::Level2)
    }

    fn feed(source: Arc<ScriptedSource>) -> OrderBookFeed {
        OrderBookFeed::new(source, FeedOptions::default())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn transport_error() -> FeedError {
        FetchError::Transport { url: "http://test".into(), reason: "connection reset".into() }.into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_staleness_always_fetches() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        for n in 1..=3 {
            feed.get_snapshot(&req(), Duration::ZERO).await.unwrap();
            assert_eq!(source.calls(), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_coalesce() {
        let source = ScriptedSource::gated();
        let feed = feed(source.clone());

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let feed = feed.clone();
                tokio::spawn(async move { feed.get_snapshot(&req(), Duration::ZERO).await })
            })
            .collect();
        settle().await;
        assert_eq!(source.calls(), 1);
        assert_eq!(feed.in_flight(), 1);

        source.release(1);
        let mut results = Vec::new();
        for w in waiters {
            results.push(w.await.unwrap().unwrap());
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(feed.in_flight(), 0);
        assert!(results.iter().all(|s| Arc::ptr_eq(s, &results[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_callers_coalesce() {
        let source = ScriptedSource::gated();
        let feed = feed(source.clone());

        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let feed = feed.clone();
                tokio::spawn(async move { feed.get_snapshot(&req(), Duration::ZERO).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        source.release(1);
        for w in waiters {
            w.await.unwrap().unwrap();
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_served_without_fetch() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());

        let first = feed.get_snapshot(&req(), Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = feed.get_snapshot(&req(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        tokio::time::advance(Duration::from_secs(4)).await;
        let third = feed.get_snapshot(&req(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_is_per_call() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        feed.get_snapshot(&req(), Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        feed.get_snapshot(&req(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(source.calls(), 1);
        feed.get_snapshot(&req(), Duration::from_secs(2)).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_keeps_previous_entry() {
        let source = ScriptedSource::new();
        source.push(Ok(default_book()));
        source.push(Ok(raw_book(&[("abc", "1")], &[("100.50", "1")])));
        let feed = feed(source.clone());

        let good = feed.get_snapshot(&req(), Duration::ZERO).await.unwrap();
        let err = feed.get_snapshot(&req(), Duration::ZERO).await.unwrap_err();
        assert_eq!(err, FeedError::Parse(ParseError::InvalidDecimal { field: Field::Price, value: "abc".into() }));

        let cached = feed.cached(&req()).unwrap();
        assert!(Arc::ptr_eq(&good, &cached));
        assert_eq!(feed.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_then_recovery() {
        let source = ScriptedSource::new();
        source.push(Err(transport_error()));
        let feed = feed(source.clone());

        assert!(matches!(feed.get_snapshot(&req(), Duration::ZERO).await, Err(FeedError::Fetch(_))));
        assert!(feed.cached(&req()).is_none());
        assert!(feed.get_snapshot(&req(), Duration::ZERO).await.is_ok());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_waiters_share_failure() {
        let source = ScriptedSource::gated();
        source.push(Err(transport_error()));
        let feed = feed(source.clone());

        let a = tokio::spawn({
            let feed = feed.clone();
            async move { feed.get_snapshot(&req(), Duration::ZERO).await }
        });
        let b = tokio::spawn({
            let feed = feed.clone();
            async move { feed.get_snapshot(&req(), Duration::ZERO).await }
        });
        settle().await;
        source.release(1);
        assert_eq!(a.await.unwrap().unwrap_err(), transport_error());
        assert_eq!(b.await.unwrap().unwrap_err(), transport_error());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_products_do_not_coalesce() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let btc = feed.get_snapshot(&req(), Duration::from_secs(5)).await.unwrap();
        let eth = feed
            .get_snapshot(&BookRequest::new("ETH-USD", BookLevel::Level2), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(btc.product.as_str(), "BTC-USD");
        assert_eq!(eth.product.as_str(), "ETH-USD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_fetch_still_fills_cache() {
        let source = ScriptedSource::gated();
        let feed = feed(source.clone());

        let waiter = tokio::spawn({
            let feed = feed.clone();
            async move { feed.get_snapshot(&req(), Duration::ZERO).await }
        });
        settle().await;
        waiter.abort();
        source.release(1);
        settle().await;

        assert!(feed.cached(&req()).is_some());
        assert_eq!(feed.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_delivers_every_tick() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let seen = Arc::new(AtomicUsize::new(0));

        let spec = SubscriptionSpec::new(req(), Duration::from_secs(1)).with_max_staleness(Duration::from_secs(5));
        let sub = feed.subscribe(spec, {
            let seen = seen.clone();
            move |_snapshot| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        // ticks at 0, 1, 2, 3; only the first misses the cache
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(source.calls(), 1);
        sub.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fetch_resolves() {
        let source = ScriptedSource::gated();
        let feed = feed(source.clone());
        let seen = Arc::new(AtomicUsize::new(0));

        let sub = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), {
            let seen = seen.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        assert_eq!(source.calls(), 1);

        assert!(sub.handle.cancel());
        source.release(10);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(source.calls(), 1);
        assert!(feed.cached(&req()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_affects_its_own_subscription() {
        let source = ScriptedSource::gated();
        let feed = feed(source.clone());
        let a_seen = Arc::new(AtomicUsize::new(0));
        let b_seen = Arc::new(AtomicUsize::new(0));
        let spec = SubscriptionSpec::new(req(), Duration::from_secs(10));

        let a = feed.subscribe(spec.clone(), {
            let a_seen = a_seen.clone();
            move |_| {
                a_seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        let b = feed.subscribe(spec, {
            let b_seen = b_seen.clone();
            move |_| {
                b_seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        assert_eq!(source.calls(), 1);

        a.handle.cancel();
        source.release(1);
        settle().await;

        assert_eq!(a_seen.load(Ordering::SeqCst), 0);
        assert_eq!(b_seen.load(Ordering::SeqCst), 1);
        b.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reported_and_polling_continues() {
        let source = ScriptedSource::new();
        source.push(Err(transport_error()));
        source.push(Ok(raw_book(&[("1.0", "x")], &[])));
        let feed = feed(source.clone());
        let seen = Arc::new(AtomicUsize::new(0));

        let mut sub = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), {
            let seen = seen.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert!(matches!(sub.errors.try_recv(), Ok(FeedError::Fetch(_))));
        assert!(matches!(sub.errors.try_recv(), Ok(FeedError::Parse(_))));
        assert!(sub.errors.try_recv().is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls(), 3);
        sub.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_cadence_during_failure_streak() {
        let source = ScriptedSource::new();
        for _ in 0..20 {
            source.push(Err(transport_error()));
        }
        let feed = feed(source.clone());
        let sub = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), |_| {});

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(source.calls(), 11);
        sub.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_spaces_out_failures() {
        let source = ScriptedSource::new();
        for _ in 0..20 {
            source.push(Err(transport_error()));
        }
        let feed = feed(source.clone());
        let backoff = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), Duration::ZERO);
        let spec = SubscriptionSpec::new(req(), Duration::from_secs(1)).with_backoff(backoff);
        let sub = feed.subscribe(spec, |_| {});

        // polls at t = 0, 2, 5, 10
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(source.calls(), 4);
        sub.handle.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_callback_may_query_feed_while_another_thread_subscribes() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<usize>();
        let mut signals = Some((entered_tx, done_tx));

        let a = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(60)), {
            let feed = feed.clone();
            move |_| {
                if let Some((entered, done)) = signals.take() {
                    entered.send(()).unwrap();
                    // give the other thread time to get into subscribe()
                    std::thread::sleep(Duration::from_millis(200));
                    let _ = done.send(feed.active_subscriptions());
                }
            }
        });

        let subscriber = tokio::task::spawn_blocking({
            let feed = feed.clone();
            move || {
                entered_rx.recv().unwrap();
                feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(60)), |_| {})
            }
        });

        let b = tokio::time::timeout(Duration::from_secs(3), subscriber)
            .await
            .expect("subscribe blocked behind a running callback")
            .unwrap();
        let active = tokio::time::timeout(Duration::from_secs(3), done_rx)
            .await
            .expect("callback blocked inside active_subscriptions")
            .unwrap();
        assert!((1..=2).contains(&active));

        feed.shutdown();
        assert!(!a.handle.is_active());
        assert!(!b.handle.is_active());
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_cancel_itself() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let handle_cell: Arc<OnceLock<SubscriptionHandle>> = Arc::new(OnceLock::new());

        let sub = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), {
            let seen = seen.clone();
            let handle_cell = handle_cell.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = handle_cell.get() {
                    handle.cancel();
                }
            }
        });
        handle_cell.set(sub.handle.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!sub.handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let sub = feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), |_| {});
        assert_eq!(feed.active_subscriptions(), 1);

        feed.unsubscribe(&sub.handle);
        feed.unsubscribe(&sub.handle);
        assert!(!sub.handle.cancel());
        assert_eq!(feed.active_subscriptions(), 0);

        feed.shutdown();
        drop(feed);
        assert!(!sub.handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let source = ScriptedSource::new();
        let feed = feed(source.clone());
        let subs: Vec<_> = (0..3)
            .map(|_| feed.subscribe(SubscriptionSpec::new(req(), Duration::from_secs(1)), |_| {}))
            .collect();
        settle().await;

        feed.shutdown();
        assert!(subs.iter().all(|s| !s.handle.is_active()));
        let calls = source.calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.calls(), calls);
    }
}
