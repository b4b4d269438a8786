//! Cross-venue arbitrage detection.
//!
//! Scans a coherent set of fresh snapshots for pairs where one venue's ask
//! sits below another's bid. Emission is throttled per (symbol, buy venue,
//! sell venue) so a persistent spread alerts once per cool-down, and every
//! emitted signal is recorded in a bounded in-memory history.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{MarketError, Result};
use crate::models::{ArbitrageSignal, MarketSnapshot};

/// Cool-down entries with no re-trigger are dropped after this long.
const COOLDOWN_RETENTION: Duration = Duration::from_secs(3600);

/// Detects and de-duplicates arbitrage opportunities.
pub struct ArbitrageEngine {
    cooldown: Duration,
    history_retention: Duration,
    /// Last emission per dedup key.
    recent: Mutex<HashMap<(String, String, String), Instant>>,
    history: Mutex<Vec<ArbitrageSignal>>,
}

impl ArbitrageEngine {
    pub fn new(cooldown: Duration, history_retention: Duration) -> Self {
        Self {
            cooldown,
            history_retention,
            recent: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Scan per-exchange snapshots of one symbol for spreads at or above
    /// `threshold_pct`. Both directions of every venue pair are checked; at
    /// most one can be profitable. Opportunities still inside their
    /// cool-down window are suppressed.
    pub fn scan(
        &self,
        symbol: &str,
        snapshots: &HashMap<String, MarketSnapshot>,
        threshold_pct: f64,
    ) -> Result<Vec<ArbitrageSignal>> {
        if snapshots.len() < 2 {
            return Err(MarketError::InsufficientData {
                symbol: symbol.to_string(),
                fresh: snapshots.len(),
            });
        }

        let mut exchanges: Vec<&String> = snapshots.keys().collect();
        exchanges.sort();

        let mut signals = Vec::new();
        for (i, buy_exchange) in exchanges.iter().enumerate() {
            for sell_exchange in &exchanges[i + 1..] {
                for (buy, sell) in [
                    (*buy_exchange, *sell_exchange),
                    (*sell_exchange, *buy_exchange),
                ] {
                    let buy_price = snapshots[buy].ask_price;
                    let sell_price = snapshots[sell].bid_price;
                    if sell_price <= buy_price {
                        continue;
                    }
                    let signal = ArbitrageSignal::new(
                        symbol,
                        buy.clone(),
                        buy_price,
                        sell.clone(),
                        sell_price,
                        Utc::now(),
                    )?;
                    if signal.spread_pct < threshold_pct {
                        debug!(
                            symbol,
                            buy_exchange = %buy,
                            sell_exchange = %sell,
                            spread_pct = signal.spread_pct,
                            threshold_pct,
                            "spread below threshold"
                        );
                        continue;
                    }
                    if !self.emit(&signal) {
                        debug!(
                            symbol,
                            buy_exchange = %buy,
                            sell_exchange = %sell,
                            "opportunity suppressed by cool-down"
                        );
                        continue;
                    }
                    info!(
                        symbol,
                        buy_exchange = %signal.buy_exchange,
                        buy_price = signal.buy_price,
                        sell_exchange = %signal.sell_exchange,
                        sell_price = signal.sell_price,
                        spread_pct = signal.spread_pct,
                        "arbitrage opportunity detected"
                    );
                    signals.push(signal);
                }
            }
        }
        Ok(signals)
    }

    /// Record an emission if its cool-down has lapsed. Returns false when
    /// the opportunity is still throttled.
    fn emit(&self, signal: &ArbitrageSignal) -> bool {
        let key = signal.dedupe_key();
        let now = Instant::now();
        {
            let mut recent = self.recent.lock();
            if let Some(last) = recent.get(&key) {
                if now.duration_since(*last) < self.cooldown {
                    return false;
                }
            }
            recent.insert(key, now);
        }
        self.history.lock().push(signal.clone());
        true
    }

    /// Emitted signals within the trailing `window`, optionally restricted
    /// to one symbol. Newest first.
    pub fn history(&self, symbol: Option<&str>, window: Duration) -> Vec<ArbitrageSignal> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24));
        let history = self.history.lock();
        let mut matches: Vec<ArbitrageSignal> = history
            .iter()
            .filter(|s| s.detected_at >= cutoff)
            .filter(|s| symbol.map_or(true, |sym| s.symbol == sym))
            .cloned()
            .collect();
        matches.reverse();
        matches
    }

    /// Prune history beyond the retention window and idle cool-down
    /// entries. Returns (history removed, cool-downs removed).
    pub fn cleanup(&self) -> (usize, usize) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.history_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|s| s.detected_at >= cutoff);
        let history_removed = before - history.len();
        drop(history);

        let now = Instant::now();
        let mut recent = self.recent.lock();
        let before = recent.len();
        recent.retain(|_, last| now.duration_since(*last) < COOLDOWN_RETENTION);
        let cooldowns_removed = before - recent.len();

        if history_removed > 0 || cooldowns_removed > 0 {
            debug!(history_removed, cooldowns_removed, "arbitrage state pruned");
        }
        (history_removed, cooldowns_removed)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}
