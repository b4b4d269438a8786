//! Consolidated best bid/offer across venues.
//!
//! Pure computation over a coherent set of fresh snapshots: highest bid and
//! lowest ask win, ties go to the lexicographically smaller exchange name
//! so repeated runs over the same inputs produce identical output.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::cache::MarketDataCache;
use crate::error::{MarketError, Result};
use crate::models::{ConsolidatedQuote, MarketSnapshot};

/// Minimum venues a consolidated quote is computed from.
pub const MIN_SOURCES: usize = 2;
/// Best bid/ask moves beyond this fraction of the previous price warrant
/// a push to the session owner.
const PRICE_MOVE_THRESHOLD_PCT: f64 = 0.1;
/// Relative change of the spread percentage that warrants a push.
const SPREAD_MOVE_THRESHOLD_PCT: f64 = 5.0;

/// Compute the consolidated BBO for `symbol` from per-exchange snapshots.
///
/// Venues are visited in lexicographic order with strict comparison, so a
/// price tie is always attributed to the same exchange. A crossed result
/// (best ask below best bid) is returned as-is.
pub fn consolidate(
    symbol: &str,
    snapshots: &HashMap<String, MarketSnapshot>,
) -> Result<ConsolidatedQuote> {
    if snapshots.len() < MIN_SOURCES {
        return Err(MarketError::InsufficientData {
            symbol: symbol.to_string(),
            fresh: snapshots.len(),
        });
    }

    let mut exchanges: Vec<&String> = snapshots.keys().collect();
    exchanges.sort();

    let first = &snapshots[exchanges[0]];
    let mut best_bid: (&String, f64) = (exchanges[0], first.bid_price);
    let mut best_ask: (&String, f64) = (exchanges[0], first.ask_price);
    for exchange in &exchanges[1..] {
        let snap = &snapshots[*exchange];
        if snap.bid_price > best_bid.1 {
            best_bid = (exchange, snap.bid_price);
        }
        if snap.ask_price < best_ask.1 {
            best_ask = (exchange, snap.ask_price);
        }
    }
    let (bid_exchange, bid_price) = best_bid;
    let (ask_exchange, ask_price) = best_ask;

    let mid_price = (bid_price + ask_price) / 2.0;
    let spread_abs = ask_price - bid_price;
    // snapshot validation guarantees a positive bid
    let spread_pct = spread_abs / bid_price * 100.0;

    Ok(ConsolidatedQuote {
        symbol: symbol.to_string(),
        best_bid_price: bid_price,
        best_bid_exchange: bid_exchange.clone(),
        best_ask_price: ask_price,
        best_ask_exchange: ask_exchange.clone(),
        mid_price,
        spread_abs,
        spread_pct,
        contributing_exchanges: exchanges.into_iter().cloned().collect(),
        computed_at: Utc::now(),
    })
}

/// True when `current` differs enough from the previously pushed quote to
/// warrant another push: first quote, best-venue change, a best bid/ask
/// move beyond 0.1%, or the spread percentage shifting by more than 5%
/// relative to its previous value.
pub fn should_emit(previous: Option<&ConsolidatedQuote>, current: &ConsolidatedQuote) -> bool {
    let Some(prev) = previous else {
        return true;
    };

    if current.has_venue_changed(prev) {
        return true;
    }

    let moved = |prev_price: f64, cur_price: f64| {
        prev_price > 0.0 && ((cur_price - prev_price) / prev_price).abs() * 100.0 > PRICE_MOVE_THRESHOLD_PCT
    };
    if moved(prev.best_bid_price, current.best_bid_price)
        || moved(prev.best_ask_price, current.best_ask_price)
    {
        return true;
    }

    if prev.spread_pct == 0.0 {
        return current.spread_pct != 0.0;
    }
    ((current.spread_pct - prev.spread_pct) / prev.spread_pct).abs() * 100.0
        > SPREAD_MOVE_THRESHOLD_PCT
}

/// Consolidation over the shared snapshot cache.
pub struct ConsolidationEngine {
    cache: Arc<MarketDataCache>,
}

impl ConsolidationEngine {
    pub fn new(cache: Arc<MarketDataCache>) -> Self {
        Self { cache }
    }

    /// Consolidate the fresh snapshots currently cached for `symbol`
    /// across `exchanges`.
    pub fn compute_cbbo(
        &self,
        symbol: &str,
        exchanges: &[String],
        max_age: Duration,
    ) -> Result<ConsolidatedQuote> {
        let fresh = self.cache.fresh_snapshots(symbol, exchanges, max_age);
        debug!(symbol, fresh = fresh.len(), requested = exchanges.len(), "computing cbbo");
        consolidate(symbol, &fresh)
    }
}
