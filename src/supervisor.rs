//! Session supervision.
//!
//! One monitoring session per owner: a spec of symbols, exchanges, a
//! spread threshold, and a cadence, plus a task that scans the shared
//! cache on that cadence and pushes consolidated quotes and arbitrage
//! signals through a notification sink. Sessions are isolated; underlying
//! streams are shared through the subscription manager's ref counts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::arbitrage::ArbitrageEngine;
use crate::cache::MarketDataCache;
use crate::client::ExchangeDataClient;
use crate::config::AppConfig;
use crate::consolidation::{consolidate, should_emit, ConsolidationEngine};
use crate::error::{MarketError, Result};
use crate::models::{ArbitrageSignal, ConsolidatedQuote, SessionKind, SessionSpec};
use crate::stream::{SnapshotCallback, StreamSubscriptionManager, SubscriptionId};

/// Backoff after an unexpected cycle failure.
const CYCLE_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Snapshots older than this multiple of the poll interval are ignored.
const FRESHNESS_FACTOR: u32 = 2;

/// Delivery boundary for session output. The transport behind it (bot,
/// webhook, test recorder) is the caller's concern.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_arbitrage_signal(&self, owner_id: i64, signal: &ArbitrageSignal);
    async fn on_market_update(
        &self,
        owner_id: i64,
        quote: &ConsolidatedQuote,
        is_manual_refresh: bool,
    );
}

/// Partial update to a running session; `None` leaves a field unchanged.
#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub symbols: Option<BTreeSet<String>>,
    pub exchanges: Option<BTreeSet<String>>,
    pub threshold_pct: Option<f64>,
    pub poll_interval: Option<Duration>,
    pub kind: Option<SessionKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    pub active_sessions: usize,
    pub cached_snapshots: usize,
    pub signals_in_history: usize,
    pub transport: String,
}

/// The periodic worker behind one session.
struct SessionRunner {
    owner_id: i64,
    spec: Arc<RwLock<SessionSpec>>,
    cache: Arc<MarketDataCache>,
    arbitrage: Arc<ArbitrageEngine>,
    sink: Arc<dyn NotificationSink>,
    /// Last quote pushed per symbol, for emission gating.
    last_quotes: Mutex<HashMap<String, ConsolidatedQuote>>,
}

impl SessionRunner {
    async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.run_cycle().await {
                warn!(owner_id = self.owner_id, error = %e, "session cycle failed");
                tokio::time::sleep(CYCLE_ERROR_BACKOFF).await;
                continue;
            }
            let interval = self.spec.read().poll_interval;
            tokio::time::sleep(interval).await;
        }
    }

    /// One scan over every watched symbol: arbitrage first, then the
    /// consolidated view, both over the same coherent snapshot set.
    async fn run_cycle(&self) -> Result<()> {
        let (symbols, exchanges, threshold_pct, kind, max_age) = {
            let spec = self.spec.read();
            (
                spec.symbols.iter().cloned().collect::<Vec<_>>(),
                spec.exchanges.iter().cloned().collect::<Vec<_>>(),
                spec.threshold_pct,
                spec.kind,
                spec.poll_interval * FRESHNESS_FACTOR,
            )
        };

        for symbol in &symbols {
            let fresh = self.cache.fresh_snapshots(symbol, &exchanges, max_age);

            if kind.wants_arbitrage() {
                match self.arbitrage.scan(symbol, &fresh, threshold_pct) {
                    Ok(signals) => {
                        for signal in &signals {
                            self.sink.on_arbitrage_signal(self.owner_id, signal).await;
                        }
                    }
                    Err(MarketError::InsufficientData { fresh, .. }) => {
                        debug!(
                            owner_id = self.owner_id,
                            symbol = %symbol,
                            fresh,
                            "skipping arbitrage scan"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            if kind.wants_market_view() {
                match consolidate(symbol, &fresh) {
                    Ok(quote) => {
                        let emit = {
                            let mut last = self.last_quotes.lock();
                            if should_emit(last.get(symbol), &quote) {
                                last.insert(symbol.clone(), quote.clone());
                                true
                            } else {
                                false
                            }
                        };
                        if emit {
                            self.sink.on_market_update(self.owner_id, &quote, false).await;
                        }
                    }
                    Err(MarketError::InsufficientData { fresh, .. }) => {
                        debug!(
                            owner_id = self.owner_id,
                            symbol = %symbol,
                            fresh,
                            "skipping consolidation"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

struct SessionEntry {
    spec: Arc<RwLock<SessionSpec>>,
    task: JoinHandle<()>,
    subscriptions: HashMap<(String, String), SubscriptionId>,
}

/// Owns every monitoring session and the shared housekeeping task.
pub struct SessionSupervisor {
    config: AppConfig,
    client: Arc<ExchangeDataClient>,
    cache: Arc<MarketDataCache>,
    streams: Arc<StreamSubscriptionManager>,
    consolidation: ConsolidationEngine,
    arbitrage: Arc<ArbitrageEngine>,
    sink: Arc<dyn NotificationSink>,
    sessions: RwLock<HashMap<i64, SessionEntry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSupervisor {
    pub fn new(
        config: AppConfig,
        client: Arc<ExchangeDataClient>,
        cache: Arc<MarketDataCache>,
        streams: Arc<StreamSubscriptionManager>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let consolidation = ConsolidationEngine::new(Arc::clone(&cache));
        let arbitrage = Arc::new(ArbitrageEngine::new(
            config.alert_cooldown,
            config.history_retention,
        ));
        Self {
            config,
            client,
            cache,
            streams,
            consolidation,
            arbitrage,
            sink,
            sessions: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the stream transport and the housekeeping sweeper. Idempotent.
    pub fn start(&self) {
        self.streams.start();

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            let cache = Arc::clone(&self.cache);
            let arbitrage = Arc::clone(&self.arbitrage);
            let stale_ceiling = self.config.stale_ceiling;
            let sweep_interval = self.config.sweep_interval;
            *sweeper = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    cache.sweep(stale_ceiling);
                    arbitrage.cleanup();
                }
            }));
            info!("supervisor started");
        }
    }

    /// Start a session, or update it in place if the owner already has one.
    pub fn start_session(&self, spec: SessionSpec) -> Result<()> {
        self.validate_exchanges(&spec.exchanges)?;

        let owner_id = spec.owner_id;
        if self.sessions.read().contains_key(&owner_id) {
            info!(owner_id, "session exists, updating in place");
            return self.apply_spec(spec);
        }
        if self.sessions.read().len() >= self.config.max_sessions {
            return Err(MarketError::InvalidSession(format!(
                "session limit of {} reached",
                self.config.max_sessions
            )));
        }

        let subscriptions = self.subscribe_pairs(&spec.pairs())?;
        let shared_spec = Arc::new(RwLock::new(spec));
        let runner = Arc::new(SessionRunner {
            owner_id,
            spec: Arc::clone(&shared_spec),
            cache: Arc::clone(&self.cache),
            arbitrage: Arc::clone(&self.arbitrage),
            sink: Arc::clone(&self.sink),
            last_quotes: Mutex::new(HashMap::new()),
        });
        let task = tokio::spawn(runner.run());

        self.sessions.write().insert(
            owner_id,
            SessionEntry {
                spec: shared_spec,
                task,
                subscriptions,
            },
        );
        info!(owner_id, "session started");
        Ok(())
    }

    /// Stop a session and release its stream subscriptions. Returns false
    /// when the owner had none.
    pub fn stop_session(&self, owner_id: i64) -> bool {
        match self.sessions.write().remove(&owner_id) {
            Some(entry) => {
                entry.task.abort();
                for id in entry.subscriptions.into_values() {
                    self.streams.unsubscribe(id);
                }
                info!(owner_id, "session stopped");
                true
            }
            None => {
                warn!(owner_id, "no session to stop");
                false
            }
        }
    }

    /// Apply a partial update to a running session. The merged spec is
    /// re-validated as a whole.
    pub fn update_session(&self, owner_id: i64, patch: SessionPatch) -> Result<()> {
        let current = {
            let sessions = self.sessions.read();
            let entry = sessions
                .get(&owner_id)
                .ok_or(MarketError::SessionNotFound(owner_id))?;
            let spec = entry.spec.read().clone();
            spec
        };

        let merged = SessionSpec::new(
            owner_id,
            patch.symbols.unwrap_or(current.symbols),
            patch.exchanges.unwrap_or(current.exchanges),
            patch.threshold_pct.unwrap_or(current.threshold_pct),
            patch.poll_interval.unwrap_or(current.poll_interval),
            patch.kind.unwrap_or(current.kind),
        )?;
        self.validate_exchanges(&merged.exchanges)?;
        self.apply_spec(merged)
    }

    /// Fetch live tickers for `symbol` across `exchanges` and consolidate
    /// them. Venues that fail to answer are skipped; fetched snapshots go
    /// through the normal delivery path so cache and subscribers stay
    /// current.
    pub async fn get_current_cbbo(
        &self,
        symbol: &str,
        exchanges: &[String],
    ) -> Result<ConsolidatedQuote> {
        let mut snapshots = HashMap::new();
        for exchange in exchanges {
            match self.client.get_ticker(exchange, symbol).await {
                Ok(snapshot) => {
                    self.streams.deliver(snapshot.clone());
                    snapshots.insert(exchange.clone(), snapshot);
                }
                Err(e) => {
                    warn!(%exchange, symbol, error = %e, "venue skipped for live cbbo");
                }
            }
        }
        consolidate(symbol, &snapshots)
    }

    /// Consolidate what the cache already holds, without touching the
    /// network.
    pub fn cached_cbbo(&self, symbol: &str, exchanges: &[String]) -> Result<ConsolidatedQuote> {
        self.consolidation
            .compute_cbbo(symbol, exchanges, self.config.stale_ceiling)
    }

    /// Push a fresh consolidated quote for every symbol a session watches,
    /// flagged as a manual refresh. Symbols that cannot be consolidated
    /// right now are skipped.
    pub async fn refresh(&self, owner_id: i64) -> Result<()> {
        let (symbols, exchanges) = {
            let sessions = self.sessions.read();
            let entry = sessions
                .get(&owner_id)
                .ok_or(MarketError::SessionNotFound(owner_id))?;
            let spec = entry.spec.read();
            (
                spec.symbols.iter().cloned().collect::<Vec<_>>(),
                spec.exchanges.iter().cloned().collect::<Vec<_>>(),
            )
        };

        for symbol in &symbols {
            match self.get_current_cbbo(symbol, &exchanges).await {
                Ok(quote) => self.sink.on_market_update(owner_id, &quote, true).await,
                Err(e) => {
                    warn!(owner_id, symbol = %symbol, error = %e, "refresh skipped symbol");
                }
            }
        }
        Ok(())
    }

    pub fn session(&self, owner_id: i64) -> Option<SessionSpec> {
        self.sessions
            .read()
            .get(&owner_id)
            .map(|entry| entry.spec.read().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn signal_history(&self, symbol: Option<&str>, window: Duration) -> Vec<ArbitrageSignal> {
        self.arbitrage.history(symbol, window)
    }

    pub fn statistics(&self) -> SupervisorStats {
        SupervisorStats {
            active_sessions: self.sessions.read().len(),
            cached_snapshots: self.cache.len(),
            signals_in_history: self.arbitrage.history_len(),
            transport: format!("{:?}", self.streams.status().state),
        }
    }

    /// Stop every session, the sweeper, and the stream transport.
    pub fn shutdown(&self) {
        let owners: Vec<i64> = self.sessions.read().keys().copied().collect();
        for owner_id in owners {
            self.stop_session(owner_id);
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.streams.shutdown();
        info!("supervisor shut down");
    }

    fn validate_exchanges(&self, exchanges: &BTreeSet<String>) -> Result<()> {
        for exchange in exchanges {
            if !self.config.is_supported_exchange(exchange) {
                return Err(MarketError::UnsupportedExchange(exchange.clone()));
            }
        }
        Ok(())
    }

    fn subscribe_pairs(
        &self,
        pairs: &[(String, String)],
    ) -> Result<HashMap<(String, String), SubscriptionId>> {
        let mut subscriptions = HashMap::new();
        for (exchange, symbol) in pairs {
            // the session loop consumes from the cache on its own cadence;
            // per-update reactions are not needed here
            let callback: SnapshotCallback = Arc::new(|_| {});
            match self.streams.subscribe(exchange, symbol, callback) {
                Ok(id) => {
                    subscriptions.insert((exchange.clone(), symbol.clone()), id);
                }
                Err(e) => {
                    for id in subscriptions.into_values() {
                        self.streams.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(subscriptions)
    }

    /// Swap a session's spec, diffing stream subscriptions. Additions are
    /// subscribed before removals so shared streams never bounce through
    /// zero subscribers.
    fn apply_spec(&self, new_spec: SessionSpec) -> Result<()> {
        let owner_id = new_spec.owner_id;
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&owner_id)
            .ok_or(MarketError::SessionNotFound(owner_id))?;

        let new_pairs: HashSet<(String, String)> = new_spec.pairs().into_iter().collect();
        for pair in &new_pairs {
            if !entry.subscriptions.contains_key(pair) {
                let callback: SnapshotCallback = Arc::new(|_| {});
                let id = self.streams.subscribe(&pair.0, &pair.1, callback)?;
                entry.subscriptions.insert(pair.clone(), id);
            }
        }
        let removed: Vec<(String, String)> = entry
            .subscriptions
            .keys()
            .filter(|pair| !new_pairs.contains(*pair))
            .cloned()
            .collect();
        for pair in removed {
            if let Some(id) = entry.subscriptions.remove(&pair) {
                self.streams.unsubscribe(id);
            }
        }

        let mut spec = entry.spec.write();
        let created_at = spec.created_at;
        *spec = new_spec;
        spec.created_at = created_at;
        spec.last_update_at = Some(Utc::now());
        info!(owner_id, "session updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketSnapshot;

    #[derive(Default)]
    struct RecordingSink {
        signals: Mutex<Vec<(i64, ArbitrageSignal)>>,
        quotes: Mutex<Vec<(i64, ConsolidatedQuote, bool)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn on_arbitrage_signal(&self, owner_id: i64, signal: &ArbitrageSignal) {
            self.signals.lock().push((owner_id, signal.clone()));
        }

        async fn on_market_update(
            &self,
            owner_id: i64,
            quote: &ConsolidatedQuote,
            is_manual_refresh: bool,
        ) {
            self.quotes
                .lock()
                .push((owner_id, quote.clone(), is_manual_refresh));
        }
    }

    fn supervisor_with(config: AppConfig, sink: Arc<RecordingSink>) -> SessionSupervisor {
        let client = Arc::new(ExchangeDataClient::new(&config).unwrap());
        let cache = Arc::new(MarketDataCache::new());
        let streams = Arc::new(StreamSubscriptionManager::new(
            &config,
            Arc::clone(&client),
            Arc::clone(&cache),
        ));
        SessionSupervisor::new(config, client, cache, streams, sink)
    }

    fn supervisor() -> SessionSupervisor {
        supervisor_with(AppConfig::default(), Arc::new(RecordingSink::default()))
    }

    fn spec(owner_id: i64, kind: SessionKind) -> SessionSpec {
        SessionSpec::new(
            owner_id,
            ["BTCUSDT".to_string()].into(),
            ["binance".to_string(), "okx".to_string()].into(),
            0.05,
            Duration::from_secs(5),
            kind,
        )
        .unwrap()
    }

    fn snapshot(exchange: &str, bid: f64, ask: f64) -> MarketSnapshot {
        MarketSnapshot::new(
            "BTCUSDT",
            exchange,
            bid,
            1.0,
            ask,
            1.0,
            (bid + ask) / 2.0,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let sup = supervisor();
        sup.start_session(spec(1, SessionKind::Both)).unwrap();
        assert_eq!(sup.session_count(), 1);
        assert_eq!(sup.streams.subscriber_count("binance", "BTCUSDT"), 1);
        assert_eq!(sup.streams.subscriber_count("okx", "BTCUSDT"), 1);

        // starting again for the same owner updates in place
        let mut changed = spec(1, SessionKind::Arbitrage);
        changed.exchanges = ["binance".to_string(), "bybit".to_string()].into();
        sup.start_session(changed).unwrap();
        assert_eq!(sup.session_count(), 1);
        assert_eq!(sup.streams.subscriber_count("okx", "BTCUSDT"), 0);
        assert_eq!(sup.streams.subscriber_count("bybit", "BTCUSDT"), 1);
        let current = sup.session(1).unwrap();
        assert_eq!(current.kind, SessionKind::Arbitrage);
        assert!(current.last_update_at.is_some());

        assert!(sup.stop_session(1));
        assert_eq!(sup.session_count(), 0);
        assert_eq!(sup.streams.subscriber_count("binance", "BTCUSDT"), 0);
        // stopping again is a no-op
        assert!(!sup.stop_session(1));
    }

    #[tokio::test]
    async fn sessions_share_streams_but_stay_isolated() {
        let sup = supervisor();
        sup.start_session(spec(1, SessionKind::Both)).unwrap();
        sup.start_session(spec(2, SessionKind::MarketView)).unwrap();
        assert_eq!(sup.streams.subscriber_count("binance", "BTCUSDT"), 2);

        sup.stop_session(1);
        // the second session keeps its share of the stream
        assert_eq!(sup.streams.subscriber_count("binance", "BTCUSDT"), 1);
        assert!(sup.session(2).is_some());
    }

    #[tokio::test]
    async fn rejects_unsupported_exchange_and_session_limit() {
        let config = AppConfig {
            max_sessions: 1,
            ..Default::default()
        };
        let sup = supervisor_with(config, Arc::new(RecordingSink::default()));

        let mut bad = spec(1, SessionKind::Both);
        bad.exchanges = ["kraken".to_string()].into();
        assert!(matches!(
            sup.start_session(bad),
            Err(MarketError::UnsupportedExchange(_))
        ));

        sup.start_session(spec(1, SessionKind::Both)).unwrap();
        assert!(matches!(
            sup.start_session(spec(2, SessionKind::Both)),
            Err(MarketError::InvalidSession(_))
        ));
    }

    #[tokio::test]
    async fn update_session_merges_and_validates() {
        let sup = supervisor();
        sup.start_session(spec(1, SessionKind::Both)).unwrap();

        sup.update_session(
            1,
            SessionPatch {
                threshold_pct: Some(1.5),
                ..Default::default()
            },
        )
        .unwrap();
        let current = sup.session(1).unwrap();
        assert_eq!(current.threshold_pct, 1.5);
        // untouched fields survive the patch
        assert_eq!(current.kind, SessionKind::Both);

        // merged spec is validated as a whole
        assert!(sup
            .update_session(
                1,
                SessionPatch {
                    symbols: Some(BTreeSet::new()),
                    ..Default::default()
                },
            )
            .is_err());

        assert!(matches!(
            sup.update_session(99, SessionPatch::default()),
            Err(MarketError::SessionNotFound(99))
        ));
    }

    #[tokio::test]
    async fn refresh_requires_a_session() {
        let sup = supervisor();
        assert!(matches!(
            sup.refresh(99).await,
            Err(MarketError::SessionNotFound(99))
        ));
    }

    #[tokio::test]
    async fn run_cycle_pushes_signal_and_quote_once() {
        let cache = Arc::new(MarketDataCache::new());
        cache.put(snapshot("binance", 50000.0, 50001.0));
        cache.put(snapshot("okx", 50050.0, 50051.0));

        let sink = Arc::new(RecordingSink::default());
        let runner = SessionRunner {
            owner_id: 7,
            spec: Arc::new(RwLock::new(spec(7, SessionKind::Both))),
            cache,
            arbitrage: Arc::new(ArbitrageEngine::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )),
            sink: Arc::clone(&sink) as Arc<dyn NotificationSink>,
            last_quotes: Mutex::new(HashMap::new()),
        };

        runner.run_cycle().await.unwrap();
        {
            let signals = sink.signals.lock();
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].0, 7);
            assert_eq!(signals[0].1.buy_exchange, "binance");
            assert_eq!(signals[0].1.sell_exchange, "okx");
        }
        {
            let quotes = sink.quotes.lock();
            assert_eq!(quotes.len(), 1);
            assert!(!quotes[0].2);
            assert!(quotes[0].1.is_crossed());
        }

        // unchanged market: quote gated, signal inside its cool-down
        runner.run_cycle().await.unwrap();
        assert_eq!(sink.signals.lock().len(), 1);
        assert_eq!(sink.quotes.lock().len(), 1);
    }

    #[tokio::test]
    async fn first_cycle_runs_without_waiting_an_interval() {
        let cache = Arc::new(MarketDataCache::new());
        cache.put(snapshot("binance", 50000.0, 50001.0));
        cache.put(snapshot("okx", 50050.0, 50051.0));

        let sink = Arc::new(RecordingSink::default());
        let slow_spec = SessionSpec::new(
            5,
            ["BTCUSDT".to_string()].into(),
            ["binance".to_string(), "okx".to_string()].into(),
            0.05,
            Duration::from_secs(30),
            SessionKind::MarketView,
        )
        .unwrap();
        let runner = Arc::new(SessionRunner {
            owner_id: 5,
            spec: Arc::new(RwLock::new(slow_spec)),
            cache,
            arbitrage: Arc::new(ArbitrageEngine::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )),
            sink: Arc::clone(&sink) as Arc<dyn NotificationSink>,
            last_quotes: Mutex::new(HashMap::new()),
        });

        let handle = tokio::spawn(Arc::clone(&runner).run());
        for _ in 0..100 {
            if !sink.quotes.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        // the first quote arrives well inside the 30s poll interval
        assert_eq!(sink.quotes.lock().len(), 1);
    }

    #[tokio::test]
    async fn cycle_with_no_fresh_data_is_quiet() {
        let sink = Arc::new(RecordingSink::default());
        let runner = SessionRunner {
            owner_id: 3,
            spec: Arc::new(RwLock::new(spec(3, SessionKind::Both))),
            cache: Arc::new(MarketDataCache::new()),
            arbitrage: Arc::new(ArbitrageEngine::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )),
            sink: Arc::clone(&sink) as Arc<dyn NotificationSink>,
            last_quotes: Mutex::new(HashMap::new()),
        };

        runner.run_cycle().await.unwrap();
        assert!(sink.signals.lock().is_empty());
        assert!(sink.quotes.lock().is_empty());
    }

    #[tokio::test]
    async fn statistics_reflect_state() {
        let sup = supervisor();
        sup.start_session(spec(1, SessionKind::Both)).unwrap();
        sup.cache.put(snapshot("binance", 50000.0, 50001.0));

        let stats = sup.statistics();
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.cached_snapshots, 1);
        assert_eq!(stats.signals_in_history, 0);
    }
}
