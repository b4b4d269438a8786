//! Ref-counted market data subscriptions over a push-then-poll transport.
//!
//! One WebSocket connection to the gateway carries all (exchange, symbol)
//! streams; sessions register callbacks and share streams by reference
//! count. When the socket drops, the transport reconnects with exponential
//! backoff and, once attempts are exhausted (or the very first connection
//! never succeeds), degrades permanently to REST polling. Either way the
//! delivery path is the same: write the snapshot to the cache, then fan
//! out to subscribers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::cache::MarketDataCache;
use crate::client::{normalize_symbol, parse_ticker_value, ExchangeDataClient};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::MarketSnapshot;

/// One (exchange, symbol) stream.
type StreamKey = (String, String);

/// Invoked on every snapshot delivered for a subscribed stream. Runs on
/// the transport task; keep it cheap and non-blocking.
pub type SnapshotCallback = Arc<dyn Fn(MarketSnapshot) + Send + Sync>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Where market data is currently coming from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    /// REST fallback. Permanent for the life of the process.
    Polling,
}

/// Point-in-time view of the transport and its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: TransportState,
    pub subscribed_keys: usize,
    pub total_subscribers: usize,
    pub reconnect_attempts: u32,
}

enum TransportCmd {
    Subscribe(StreamKey),
    Unsubscribe(StreamKey),
    Shutdown,
}

/// State shared between the manager handle, the transport task, and the
/// poll tasks. Guards are short-lived and never held across an await.
struct Shared {
    /// Subscription ids are monotonic, so the ordered inner map delivers
    /// callbacks in registration order.
    registry: RwLock<HashMap<StreamKey, BTreeMap<SubscriptionId, SnapshotCallback>>>,
    cache: Arc<MarketDataCache>,
    client: Arc<ExchangeDataClient>,
    state: RwLock<TransportState>,
    reconnect_attempts: AtomicU32,
    poll_tasks: Mutex<HashMap<StreamKey, JoinHandle<()>>>,
    ws_url: String,
    reconnect_base_delay: Duration,
    max_reconnect_attempts: u32,
    polling_interval: Duration,
}

impl Shared {
    /// The single write path into the cache. Callbacks run after the cache
    /// write so a subscriber reading back always sees its own update.
    fn deliver(&self, snapshot: MarketSnapshot) {
        let key = (snapshot.exchange.clone(), snapshot.symbol.clone());
        self.cache.put(snapshot.clone());

        let callbacks: Vec<SnapshotCallback> = {
            let registry = self.registry.read();
            match registry.get(&key) {
                Some(subs) => subs.values().cloned().collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(snapshot.clone());
        }
    }

    fn set_state(&self, next: TransportState) {
        let mut state = self.state.write();
        if *state != next {
            info!(from = ?*state, to = ?next, "transport state changed");
            *state = next;
        }
    }

    fn keys(&self) -> Vec<StreamKey> {
        self.registry.read().keys().cloned().collect()
    }

    fn spawn_poll_task(self: &Arc<Self>, key: StreamKey) {
        let mut tasks = self.poll_tasks.lock();
        if tasks.contains_key(&key) {
            return;
        }
        let shared = Arc::clone(self);
        let (exchange, symbol) = key.clone();
        debug!(%exchange, %symbol, "starting poll task");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.polling_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match shared.client.get_ticker(&exchange, &symbol).await {
                    Ok(snapshot) => shared.deliver(snapshot),
                    Err(e) => {
                        warn!(%exchange, %symbol, error = %e, "poll failed");
                    }
                }
            }
        });
        tasks.insert(key, handle);
    }

    fn stop_poll_task(&self, key: &StreamKey) {
        if let Some(handle) = self.poll_tasks.lock().remove(key) {
            handle.abort();
        }
    }

    fn stop_all_poll_tasks(&self) {
        for (_, handle) in self.poll_tasks.lock().drain() {
            handle.abort();
        }
    }

    fn enter_polling(self: &Arc<Self>) {
        self.set_state(TransportState::Polling);
        for key in self.keys() {
            self.spawn_poll_task(key);
        }
    }
}

/// Shared-stream subscription manager.
///
/// `subscribe`/`unsubscribe` are cheap registry operations; the transport
/// task owns the socket and reacts to registry changes via a command
/// channel.
pub struct StreamSubscriptionManager {
    shared: Arc<Shared>,
    cmd_tx: UnboundedSender<TransportCmd>,
    cmd_rx: Mutex<Option<UnboundedReceiver<TransportCmd>>>,
    transport: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl StreamSubscriptionManager {
    pub fn new(
        config: &AppConfig,
        client: Arc<ExchangeDataClient>,
        cache: Arc<MarketDataCache>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(HashMap::new()),
                cache,
                client,
                state: RwLock::new(TransportState::Disconnected),
                reconnect_attempts: AtomicU32::new(0),
                poll_tasks: Mutex::new(HashMap::new()),
                ws_url: config.websocket_url(),
                reconnect_base_delay: config.ws_reconnect_base_delay,
                max_reconnect_attempts: config.ws_max_reconnect_attempts,
                polling_interval: config.polling_interval,
            }),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            transport: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawn the transport task. Idempotent.
    pub fn start(&self) {
        let rx = self.cmd_rx.lock().take();
        if let Some(rx) = rx {
            let shared = Arc::clone(&self.shared);
            *self.transport.lock() = Some(tokio::spawn(run_transport(shared, rx)));
        }
    }

    /// Register a callback for one (exchange, symbol) stream. The first
    /// subscriber opens the upstream stream; later ones share it.
    pub fn subscribe(
        &self,
        exchange: &str,
        symbol: &str,
        callback: SnapshotCallback,
    ) -> Result<SubscriptionId> {
        let key = (exchange.to_lowercase(), normalize_symbol(symbol)?);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let first = {
            let mut registry = self.shared.registry.write();
            let subs = registry.entry(key.clone()).or_default();
            let first = subs.is_empty();
            subs.insert(id, callback);
            first
        };

        if first {
            debug!(exchange = %key.0, symbol = %key.1, "opening upstream stream");
            let _ = self.cmd_tx.send(TransportCmd::Subscribe(key));
        } else {
            debug!(exchange = %key.0, symbol = %key.1, "joining existing stream");
        }
        Ok(id)
    }

    /// Drop one subscription. The upstream stream closes only when its
    /// last subscriber leaves. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut drained_key = None;
        {
            let mut registry = self.shared.registry.write();
            registry.retain(|key, subs| {
                if subs.remove(&id).is_some() && subs.is_empty() {
                    drained_key = Some(key.clone());
                }
                !subs.is_empty()
            });
        }
        if let Some(key) = drained_key {
            debug!(exchange = %key.0, symbol = %key.1, "closing upstream stream");
            let _ = self.cmd_tx.send(TransportCmd::Unsubscribe(key));
        }
    }

    pub fn subscriber_count(&self, exchange: &str, symbol: &str) -> usize {
        let Ok(symbol) = normalize_symbol(symbol) else {
            return 0;
        };
        self.shared
            .registry
            .read()
            .get(&(exchange.to_lowercase(), symbol))
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn status(&self) -> StreamStatus {
        let registry = self.shared.registry.read();
        StreamStatus {
            state: *self.shared.state.read(),
            subscribed_keys: registry.len(),
            total_subscribers: registry.values().map(|subs| subs.len()).sum(),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Push a snapshot through the normal delivery path without the
    /// transport, for callers that fetched over REST themselves.
    pub(crate) fn deliver(&self, snapshot: MarketSnapshot) {
        self.shared.deliver(snapshot);
    }

    /// Stop the transport and all poll tasks, dropping every subscription.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Shutdown);
        self.shared.stop_all_poll_tasks();
        if let Some(handle) = self.transport.lock().take() {
            handle.abort();
        }
        self.shared.registry.write().clear();
        self.shared.set_state(TransportState::Disconnected);
    }
}

/// Backoff before reconnect attempt `attempt` (1-based): base * 2^(n-1).
fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

async fn run_transport(shared: Arc<Shared>, mut rx: UnboundedReceiver<TransportCmd>) {
    let mut ever_connected = false;
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(if ever_connected {
            TransportState::Reconnecting
        } else {
            TransportState::Connecting
        });

        match connect_async(shared.ws_url.as_str()).await {
            Ok((ws, _)) => {
                ever_connected = true;
                attempt = 0;
                shared.reconnect_attempts.store(0, Ordering::Relaxed);
                shared.stop_all_poll_tasks();
                shared.set_state(TransportState::Streaming);
                info!(url = %shared.ws_url, "stream connected");
                if !run_session(&shared, ws, &mut rx).await {
                    shared.set_state(TransportState::Disconnected);
                    return;
                }
            }
            Err(e) => {
                if !ever_connected {
                    warn!(error = %e, "initial connection failed, degrading to polling");
                    shared.enter_polling();
                    return run_polling(shared, rx).await;
                }
                attempt += 1;
                shared.reconnect_attempts.store(attempt, Ordering::Relaxed);
                if attempt >= shared.max_reconnect_attempts {
                    error!(
                        attempts = attempt,
                        "reconnect attempts exhausted, degrading to polling"
                    );
                    shared.enter_polling();
                    return run_polling(shared, rx).await;
                }
                let delay = reconnect_delay(shared.reconnect_base_delay, attempt);
                warn!(
                    error = %e,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Serve one live connection. Returns false on shutdown, true on a drop
/// that warrants reconnecting.
async fn run_session(
    shared: &Arc<Shared>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    rx: &mut UnboundedReceiver<TransportCmd>,
) -> bool {
    let (mut write, mut read) = ws.split();

    // replay the current subscription set on every (re)connect
    for key in shared.keys() {
        if send_stream_op(&mut write, &key, true).await.is_err() {
            return true;
        }
    }

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(TransportCmd::Subscribe(key)) => {
                    if send_stream_op(&mut write, &key, true).await.is_err() {
                        return true;
                    }
                }
                Some(TransportCmd::Unsubscribe(key)) => {
                    if send_stream_op(&mut write, &key, false).await.is_err() {
                        return true;
                    }
                }
                Some(TransportCmd::Shutdown) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return false;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_stream_message(shared, &text),
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "stream closed by server");
                    return true;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "stream error");
                    return true;
                }
                None => {
                    warn!("stream ended");
                    return true;
                }
            },
        }
    }
}

async fn send_stream_op<S>(write: &mut S, key: &StreamKey, subscribe: bool) -> std::result::Result<(), S::Error>
where
    S: SinkExt<Message> + Unpin,
{
    let payload = json!({
        "action": if subscribe { "subscribe" } else { "unsubscribe" },
        "exchange": key.0,
        "symbol": key.1,
        "type": "ticker",
    });
    write.send(Message::Text(payload.to_string())).await
}

/// Parse one pushed frame and deliver it. Malformed frames are logged and
/// dropped; they never tear down the connection.
fn handle_stream_message(shared: &Shared, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping unparsable stream frame");
            return;
        }
    };

    let exchange = match value.get("exchange").and_then(Value::as_str) {
        Some(e) => e.to_lowercase(),
        None => {
            warn!("dropping stream frame without exchange");
            return;
        }
    };
    let symbol = match value
        .get("symbol")
        .and_then(Value::as_str)
        .and_then(|s| normalize_symbol(s).ok())
    {
        Some(s) => s,
        None => {
            warn!("dropping stream frame without symbol");
            return;
        }
    };

    // ticker fields may sit beside the routing fields or under "data"
    let payload = value.get("data").unwrap_or(&value);
    match parse_ticker_value(payload, &exchange, &symbol) {
        Ok(snapshot) => shared.deliver(snapshot),
        Err(e) => {
            warn!(%exchange, %symbol, error = %e, "dropping malformed ticker frame");
        }
    }
}

/// Command loop for permanent polling mode: subscriptions translate into
/// poll tasks instead of stream operations.
async fn run_polling(shared: Arc<Shared>, mut rx: UnboundedReceiver<TransportCmd>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            TransportCmd::Subscribe(key) => shared.spawn_poll_task(key),
            TransportCmd::Unsubscribe(key) => shared.stop_poll_task(&key),
            TransportCmd::Shutdown => break,
        }
    }
    shared.stop_all_poll_tasks();
    shared.set_state(TransportState::Disconnected);
}
