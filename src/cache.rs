//! In-memory snapshot cache.
//!
//! Latest best bid/offer per (exchange, symbol), replaced wholesale on each
//! update. Readers take an atomic copy of the fresh subset so consolidation
//! and arbitrage scans see one coherent view.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::models::MarketSnapshot;

type CacheKey = (String, String);

/// Shared cache of the latest snapshot per (exchange, symbol).
#[derive(Default)]
pub struct MarketDataCache {
    snapshots: RwLock<HashMap<CacheKey, MarketSnapshot>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot for its (exchange, symbol).
    pub fn put(&self, snapshot: MarketSnapshot) {
        let key = (snapshot.exchange.clone(), snapshot.symbol.clone());
        self.snapshots.write().insert(key, snapshot);
    }

    pub fn get(&self, exchange: &str, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots
            .read()
            .get(&(exchange.to_string(), symbol.to_string()))
            .cloned()
    }

    /// Copy of every fresh snapshot for `symbol` across the given
    /// exchanges, keyed by exchange. Taken under one read lock so all
    /// entries belong to the same instant.
    pub fn fresh_snapshots(
        &self,
        symbol: &str,
        exchanges: &[String],
        max_age: Duration,
    ) -> HashMap<String, MarketSnapshot> {
        let guard = self.snapshots.read();
        exchanges
            .iter()
            .filter_map(|exchange| {
                guard
                    .get(&(exchange.clone(), symbol.to_string()))
                    .filter(|snap| snap.is_fresh(max_age))
                    .map(|snap| (exchange.clone(), snap.clone()))
            })
            .collect()
    }

    /// Drop entries older than `max_age`. Returns the number removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut guard = self.snapshots.write();
        let before = guard.len();
        guard.retain(|_, snap| snap.is_fresh(max_age));
        let removed = before - guard.len();
        if removed > 0 {
            debug!(removed, remaining = guard.len(), "swept stale snapshots");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(exchange: &str, symbol: &str, bid: f64, age_secs: i64) -> MarketSnapshot {
        MarketSnapshot::new(
            symbol,
            exchange,
            bid,
            1.0,
            bid + 1.0,
            1.0,
            bid + 0.5,
            Utc::now() - chrono::Duration::seconds(age_secs),
        )
        .unwrap()
    }

    #[test]
    fn put_replaces_wholesale() {
        let cache = MarketDataCache::new();
        cache.put(snapshot("binance", "BTCUSDT", 50000.0, 0));
        cache.put(snapshot("binance", "BTCUSDT", 50010.0, 0));

        assert_eq!(cache.len(), 1);
        let snap = cache.get("binance", "BTCUSDT").unwrap();
        assert_eq!(snap.bid_price, 50010.0);
    }

    #[test]
    fn fresh_snapshots_filters_age_and_exchange() {
        let cache = MarketDataCache::new();
        cache.put(snapshot("binance", "BTCUSDT", 50000.0, 0));
        cache.put(snapshot("okx", "BTCUSDT", 49999.0, 120));
        cache.put(snapshot("bybit", "ETHUSDT", 3000.0, 0));

        let exchanges = vec![
            "binance".to_string(),
            "okx".to_string(),
            "bybit".to_string(),
        ];
        let fresh = cache.fresh_snapshots("BTCUSDT", &exchanges, Duration::from_secs(30));
        assert_eq!(fresh.len(), 1);
        assert!(fresh.contains_key("binance"));

        // widen the window and the stale venue qualifies
        let fresh = cache.fresh_snapshots("BTCUSDT", &exchanges, Duration::from_secs(300));
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn sweep_removes_only_stale() {
        let cache = MarketDataCache::new();
        cache.put(snapshot("binance", "BTCUSDT", 50000.0, 0));
        cache.put(snapshot("okx", "BTCUSDT", 49999.0, 600));

        let removed = cache.sweep(Duration::from_secs(300));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("binance", "BTCUSDT").is_some());
        assert!(cache.get("okx", "BTCUSDT").is_none());
    }
}
