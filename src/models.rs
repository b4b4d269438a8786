use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

/// Sessions can watch for arbitrage spreads, consolidated quotes, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Arbitrage,
    MarketView,
    Both,
}

impl SessionKind {
    pub fn wants_arbitrage(&self) -> bool {
        matches!(self, SessionKind::Arbitrage | SessionKind::Both)
    }

    pub fn wants_market_view(&self) -> bool {
        matches!(self, SessionKind::MarketView | SessionKind::Both)
    }
}

/// Latest best bid/offer for one (exchange, symbol). Replaced wholesale on
/// every update; no per-field merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub exchange: String,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub last_price: f64,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        bid_price: f64,
        bid_size: f64,
        ask_price: f64,
        ask_size: f64,
        last_price: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<Self> {
        if bid_price <= 0.0 || ask_price <= 0.0 {
            return Err(MarketError::InvalidSnapshot(
                "prices must be positive".to_string(),
            ));
        }
        if bid_size <= 0.0 || ask_size <= 0.0 {
            return Err(MarketError::InvalidSnapshot(
                "sizes must be positive".to_string(),
            ));
        }
        if bid_price >= ask_price {
            return Err(MarketError::InvalidSnapshot(
                "bid price must be less than ask price".to_string(),
            ));
        }
        Ok(Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            last_price,
            observed_at,
        })
    }

    pub fn spread_abs(&self) -> f64 {
        self.ask_price - self.bid_price
    }

    pub fn spread_pct(&self) -> f64 {
        self.spread_abs() / self.bid_price * 100.0
    }

    pub fn mid_price(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }

    /// Freshness is `now - observed_at <= max_age`. A timestamp slightly in
    /// the future (venue clock skew) counts as fresh.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        match Utc::now().signed_duration_since(self.observed_at).to_std() {
            Ok(age) => age <= max_age,
            Err(_) => true,
        }
    }
}

/// One level of an L2 order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

impl OrderBookLevel {
    pub fn new(price: f64, size: f64) -> Result<Self> {
        if price <= 0.0 {
            return Err(MarketError::InvalidSnapshot(
                "level price must be positive".to_string(),
            ));
        }
        if size <= 0.0 {
            return Err(MarketError::InvalidSnapshot(
                "level size must be positive".to_string(),
            ));
        }
        Ok(Self { price, size })
    }
}

/// L2 order book for one symbol on one exchange. Bids descending, asks
/// ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub exchange: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub observed_at: DateTime<Utc>,
}

impl OrderBook {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        observed_at: DateTime<Utc>,
    ) -> Result<Self> {
        if bids.is_empty() || asks.is_empty() {
            return Err(MarketError::InvalidSnapshot(
                "order book must have both bids and asks".to_string(),
            ));
        }
        if bids.windows(2).any(|w| w[0].price < w[1].price) {
            return Err(MarketError::InvalidSnapshot(
                "bids must be in descending order".to_string(),
            ));
        }
        if asks.windows(2).any(|w| w[0].price > w[1].price) {
            return Err(MarketError::InvalidSnapshot(
                "asks must be in ascending order".to_string(),
            ));
        }
        Ok(Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            bids,
            asks,
            observed_at,
        })
    }

    pub fn best_bid(&self) -> OrderBookLevel {
        self.bids[0]
    }

    pub fn best_ask(&self) -> OrderBookLevel {
        self.asks[0]
    }

    /// Collapse the book to a top-of-book snapshot.
    pub fn to_snapshot(&self) -> Result<MarketSnapshot> {
        let bid = self.best_bid();
        let ask = self.best_ask();
        MarketSnapshot::new(
            self.symbol.clone(),
            self.exchange.clone(),
            bid.price,
            bid.size,
            ask.price,
            ask.size,
            (bid.price + ask.price) / 2.0,
            self.observed_at,
        )
    }
}

/// Consolidated best bid/offer across venues. Derived from current
/// snapshots, never persisted independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedQuote {
    pub symbol: String,
    pub best_bid_price: f64,
    pub best_bid_exchange: String,
    pub best_ask_price: f64,
    pub best_ask_exchange: String,
    pub mid_price: f64,
    pub spread_abs: f64,
    pub spread_pct: f64,
    pub contributing_exchanges: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

impl ConsolidatedQuote {
    pub fn has_venue_changed(&self, previous: &ConsolidatedQuote) -> bool {
        self.best_bid_exchange != previous.best_bid_exchange
            || self.best_ask_exchange != previous.best_ask_exchange
    }

    /// Crossed markets (best ask below best bid) are valid output: they are
    /// arbitrage signal territory, not an error.
    pub fn is_crossed(&self) -> bool {
        self.best_ask_price < self.best_bid_price
    }
}

/// A cross-venue profitable spread: one venue's ask below another's bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageSignal {
    pub symbol: String,
    pub buy_exchange: String,
    pub buy_price: f64,
    pub sell_exchange: String,
    pub sell_price: f64,
    pub spread_abs: f64,
    pub spread_pct: f64,
    pub detected_at: DateTime<Utc>,
}

impl ArbitrageSignal {
    pub fn new(
        symbol: impl Into<String>,
        buy_exchange: impl Into<String>,
        buy_price: f64,
        sell_exchange: impl Into<String>,
        sell_price: f64,
        detected_at: DateTime<Utc>,
    ) -> Result<Self> {
        if buy_price <= 0.0 || sell_price <= 0.0 {
            return Err(MarketError::InvalidSnapshot(
                "signal prices must be positive".to_string(),
            ));
        }
        if sell_price <= buy_price {
            return Err(MarketError::InvalidSnapshot(
                "sell price must exceed buy price".to_string(),
            ));
        }
        let spread_abs = sell_price - buy_price;
        let spread_pct = spread_abs / buy_price * 100.0;
        Ok(Self {
            symbol: symbol.into(),
            buy_exchange: buy_exchange.into(),
            buy_price,
            sell_exchange: sell_exchange.into(),
            sell_price,
            spread_abs,
            spread_pct,
            detected_at,
        })
    }

    /// Dedup key: same symbol and venue pair means the same opportunity.
    pub fn dedupe_key(&self) -> (String, String, String) {
        (
            self.symbol.clone(),
            self.buy_exchange.clone(),
            self.sell_exchange.clone(),
        )
    }
}

/// Shortest and longest poll intervals a session may configure.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration of one monitoring session, owned by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    pub owner_id: i64,
    pub symbols: BTreeSet<String>,
    pub exchanges: BTreeSet<String>,
    pub threshold_pct: f64,
    pub poll_interval: Duration,
    pub kind: SessionKind,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_update_at: Option<DateTime<Utc>>,
}

impl SessionSpec {
    pub fn new(
        owner_id: i64,
        symbols: BTreeSet<String>,
        exchanges: BTreeSet<String>,
        threshold_pct: f64,
        poll_interval: Duration,
        kind: SessionKind,
    ) -> Result<Self> {
        if symbols.is_empty() {
            return Err(MarketError::InvalidSession(
                "at least one symbol must be specified".to_string(),
            ));
        }
        if exchanges.is_empty() {
            return Err(MarketError::InvalidSession(
                "at least one exchange must be specified".to_string(),
            ));
        }
        if threshold_pct <= 0.0 {
            return Err(MarketError::InvalidSession(
                "threshold percentage must be positive".to_string(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(MarketError::InvalidSession(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            owner_id,
            symbols,
            exchanges,
            threshold_pct,
            poll_interval: poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            kind,
            active: true,
            created_at: Utc::now(),
            last_update_at: None,
        })
    }

    /// Every (exchange, symbol) pair this session watches.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.exchanges.len() * self.symbols.len());
        for exchange in &self.exchanges {
            for symbol in &self.symbols {
                pairs.push((exchange.clone(), symbol.clone()));
            }
        }
        pairs
    }
}
