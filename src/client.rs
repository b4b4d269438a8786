//! Market data gateway REST client.
//!
//! Fetches symbol lists, tickers, and order books. Owns request pacing,
//! retry with exponential backoff, and rate-limit handling. Responses are
//! parsed tolerantly: venues disagree on field names, so each logical field
//! is resolved through an ordered alias chain.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{MarketError, Result};
use crate::models::{MarketSnapshot, OrderBook, OrderBookLevel};

/// Delay between ticker batches in `get_multiple_tickers`.
const BATCH_DELAY: Duration = Duration::from_millis(100);
/// Batch size for multi-ticker fetches.
const BATCH_SIZE: usize = 10;
/// Relative half-spread used to synthesize bid/ask from a lone last price.
const SYNTHETIC_SPREAD_RATIO: f64 = 0.0001;
/// Default cool-down when a 429 response carries no Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Raw payloads are truncated to this length in logs.
const LOG_PAYLOAD_LIMIT: usize = 500;

// Alias chains tried in priority order per logical field. Order matters:
// several venues carry more than one of these spellings.
pub(crate) const BID_ALIASES: &[&str] = &["bid", "bestBid", "bidPrice", "buy"];
pub(crate) const ASK_ALIASES: &[&str] = &["ask", "bestAsk", "askPrice", "sell"];
pub(crate) const BID_SIZE_ALIASES: &[&str] = &["bidSize", "bestBidSize", "bidQty", "buySize"];
pub(crate) const ASK_SIZE_ALIASES: &[&str] = &["askSize", "bestAskSize", "askQty", "sellSize"];
pub(crate) const LAST_ALIASES: &[&str] = &["last", "lastPrice", "price", "close"];

/// REST client for the market data gateway.
pub struct ExchangeDataClient {
    http: reqwest::Client,
    base_url: String,
    supported_exchanges: Vec<String>,
    pacing: Duration,
    retry_attempts: u32,
    /// Pacing gate: requests are serialized so consecutive calls observe
    /// the minimum inter-request interval.
    last_request: Mutex<Instant>,
}

impl ExchangeDataClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", key)
                    .parse()
                    .context("invalid api key header")?,
            );
        }

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .pool_max_idle_per_host(10)
            .default_headers(headers)
            .build()
            .context("failed to build http client")?;

        info!(
            base_url = %config.api_base_url,
            exchanges = ?config.supported_exchanges,
            "exchange data client initialized"
        );

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            supported_exchanges: config.supported_exchanges.clone(),
            pacing: config.request_pacing,
            retry_attempts: config.retry_attempts,
            last_request: Mutex::new(Instant::now() - config.request_pacing),
        })
    }

    /// Fetch the symbols an exchange lists for a market type.
    pub async fn list_symbols(&self, exchange: &str, market_type: &str) -> Result<Vec<String>> {
        let exchange = self.validate_exchange(exchange)?;
        let path = format!("/api/symbols/{}/{}", exchange, market_type.to_lowercase());
        let data = self.request_json(&path, &[]).await?;

        let symbols = parse_symbol_list(&data);
        info!(%exchange, market_type, count = symbols.len(), "retrieved symbols");
        Ok(symbols)
    }

    /// Fetch the current best bid/offer for a symbol.
    pub async fn get_ticker(&self, exchange: &str, symbol: &str) -> Result<MarketSnapshot> {
        let exchange = self.validate_exchange(exchange)?;
        let normalized = normalize_symbol(symbol)?;
        let path = format!("/api/ticker/{}/{}", exchange, normalized);
        let data = self.request_json(&path, &[]).await?;

        let snapshot = parse_ticker_value(&data, &exchange, &normalized)?;
        debug!(
            %exchange,
            symbol = %normalized,
            bid = snapshot.bid_price,
            ask = snapshot.ask_price,
            "retrieved ticker"
        );
        Ok(snapshot)
    }

    /// Fetch L2 order book levels for a symbol.
    pub async fn get_orderbook(
        &self,
        exchange: &str,
        symbol: &str,
        depth: usize,
    ) -> Result<OrderBook> {
        let exchange = self.validate_exchange(exchange)?;
        let normalized = normalize_symbol(symbol)?;
        let path = format!("/api/orderbook/{}/{}", exchange, normalized);
        let query = [("depth".to_string(), depth.to_string())];
        let data = self.request_json(&path, &query).await?;

        let book = parse_orderbook_value(&data, &exchange, &normalized)?;
        debug!(
            %exchange,
            symbol = %normalized,
            bids = book.bids.len(),
            asks = book.asks.len(),
            "retrieved order book"
        );
        Ok(book)
    }

    /// Fetch tickers for many symbols, batched to avoid flooding the
    /// gateway. Per-symbol failures are logged and skipped.
    pub async fn get_multiple_tickers(
        &self,
        exchange: &str,
        symbols: &[String],
    ) -> HashMap<String, MarketSnapshot> {
        let mut results = HashMap::new();

        for (i, batch) in symbols.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(BATCH_DELAY).await;
            }
            let futures = batch.iter().map(|s| self.get_ticker(exchange, s));
            for (symbol, outcome) in batch.iter().zip(join_all(futures).await) {
                match outcome {
                    Ok(snapshot) => {
                        results.insert(symbol.clone(), snapshot);
                    }
                    Err(e) => {
                        warn!(exchange, %symbol, error = %e, "failed to get ticker for symbol");
                    }
                }
            }
        }

        info!(
            exchange,
            requested = symbols.len(),
            successful = results.len(),
            "retrieved multiple tickers"
        );
        results
    }

    fn validate_exchange(&self, exchange: &str) -> Result<String> {
        let lower = exchange.to_lowercase();
        if self.supported_exchanges.iter().any(|e| *e == lower) {
            Ok(lower)
        } else {
            Err(MarketError::UnsupportedExchange(exchange.to_string()))
        }
    }

    /// Observe the minimum inter-request interval. The lock is held across
    /// the sleep so concurrent callers queue behind the gate.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.pacing {
            tokio::time::sleep(self.pacing - elapsed).await;
        }
        *last = Instant::now();
    }

    /// GET a JSON document, retrying transient network failures with
    /// exponential backoff (2^attempt seconds). A 429 observes the server's
    /// Retry-After and then surfaces as retryable; it is not replayed here.
    async fn request_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt: u32 = 0;

        loop {
            self.pace().await;
            debug!(%url, attempt = attempt + 1, "api request");

            let response = match self.http.get(&url).query(query).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.retry_attempts {
                        let delay = Duration::from_secs(1u64 << attempt);
                        warn!(
                            error = %e,
                            delay_secs = delay.as_secs(),
                            "network error, retrying request"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(MarketError::Network {
                        source: e,
                        attempts: attempt + 1,
                    });
                }
            };

            let status = response.status().as_u16();
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                warn!(
                    retry_after_secs = retry_after.as_secs(),
                    "rate limit exceeded, observing cool-down"
                );
                tokio::time::sleep(retry_after).await;
                return Err(MarketError::RateLimited { retry_after });
            }
            if status >= 400 {
                let body = response.text().await.unwrap_or_default();
                error!(status, body = %truncate(&body, LOG_PAYLOAD_LIMIT), "api request failed");
                return Err(MarketError::Api { status, body });
            }

            let bytes = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    if attempt < self.retry_attempts {
                        let delay = Duration::from_secs(1u64 << attempt);
                        warn!(error = %e, "error reading response body, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(MarketError::Network {
                        source: e,
                        attempts: attempt + 1,
                    });
                }
            };

            return match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Ok(value),
                Err(e) => {
                    let raw = String::from_utf8_lossy(&bytes);
                    error!(
                        error = %e,
                        raw = %truncate(&raw, LOG_PAYLOAD_LIMIT),
                        "failed to parse json response"
                    );
                    Err(MarketError::MalformedResponse {
                        context: format!("invalid json: {}", e),
                    })
                }
            };
        }
    }
}

/// Normalize a trading symbol to the gateway's format: uppercase with
/// separators stripped (BTC/USDT, btc-usdt -> BTCUSDT).
pub(crate) fn normalize_symbol(symbol: &str) -> Result<String> {
    let mut s = symbol.to_uppercase();
    for sep in ["/", "-", " ", "%2F"] {
        s = s.replace(sep, "");
    }
    if s.is_empty() {
        return Err(MarketError::InvalidSymbol(symbol.to_string()));
    }
    Ok(s)
}

/// Resolve one logical field through its alias chain. Accepts JSON numbers
/// and numeric strings; an unparsable candidate falls through to the next
/// alias.
pub(crate) fn extract_f64(data: &Value, aliases: &[&str]) -> Option<f64> {
    let map = data.as_object()?;
    for key in aliases {
        match map.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    return Some(v);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.parse::<f64>() {
                    return Some(v);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a ticker payload into a valid snapshot.
///
/// The tolerance rules are load-bearing: if only a last-trade price is
/// present, bid/ask are synthesized at a fixed small spread; missing sizes
/// default to a minimal positive value so downstream invariants hold.
pub(crate) fn parse_ticker_value(
    data: &Value,
    exchange: &str,
    symbol: &str,
) -> Result<MarketSnapshot> {
    let mut bid_price = extract_f64(data, BID_ALIASES).unwrap_or(0.0);
    let mut ask_price = extract_f64(data, ASK_ALIASES).unwrap_or(0.0);
    let mut bid_size = extract_f64(data, BID_SIZE_ALIASES).unwrap_or(0.0);
    let mut ask_size = extract_f64(data, ASK_SIZE_ALIASES).unwrap_or(0.0);
    let mut last_price = extract_f64(data, LAST_ALIASES).unwrap_or(0.0);

    if last_price == 0.0 && bid_price > 0.0 && ask_price > 0.0 {
        last_price = (bid_price + ask_price) / 2.0;
    }
    if (bid_price <= 0.0 || ask_price <= 0.0) && last_price > 0.0 {
        bid_price = last_price * (1.0 - SYNTHETIC_SPREAD_RATIO);
        ask_price = last_price * (1.0 + SYNTHETIC_SPREAD_RATIO);
    }
    if bid_size <= 0.0 {
        bid_size = 1.0;
    }
    if ask_size <= 0.0 {
        ask_size = 1.0;
    }

    let observed_at = parse_timestamp(data);

    MarketSnapshot::new(
        symbol,
        exchange,
        bid_price,
        bid_size,
        ask_price,
        ask_size,
        last_price,
        observed_at,
    )
    .map_err(|e| MarketError::MalformedResponse {
        context: format!("ticker for {}:{} failed validation: {}", exchange, symbol, e),
    })
}

/// Parse the payload timestamp: epoch milliseconds or RFC 3339 string.
/// Falls back to the current time on absence or parse failure.
pub(crate) fn parse_timestamp(data: &Value) -> DateTime<Utc> {
    match data.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}

/// Parse an order book payload. Accepts `[[price, size], ...]` level arrays
/// or object-of-objects levels (`{price, size|qty}`); non-positive levels
/// are dropped.
pub(crate) fn parse_orderbook_value(
    data: &Value,
    exchange: &str,
    symbol: &str,
) -> Result<OrderBook> {
    let side = |keys: &[&str]| -> Vec<OrderBookLevel> {
        keys.iter()
            .find_map(|k| data.get(*k).and_then(Value::as_array))
            .map(|levels| parse_levels(levels))
            .unwrap_or_default()
    };

    let mut bids = side(&["bids", "buy"]);
    let mut asks = side(&["asks", "sell"]);
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));

    let observed_at = parse_timestamp(data);

    OrderBook::new(symbol, exchange, bids, asks, observed_at).map_err(|e| {
        MarketError::MalformedResponse {
            context: format!(
                "order book for {}:{} failed validation: {}",
                exchange, symbol, e
            ),
        }
    })
}

fn parse_levels(levels: &[Value]) -> Vec<OrderBookLevel> {
    let scalar = |v: &Value| -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    };

    levels
        .iter()
        .filter_map(|level| {
            let (price, size) = match level {
                Value::Array(pair) if pair.len() >= 2 => {
                    (scalar(&pair[0])?, scalar(&pair[1])?)
                }
                Value::Object(map) => {
                    let price = map.get("price").and_then(&scalar)?;
                    let size = map
                        .get("size")
                        .or_else(|| map.get("qty"))
                        .and_then(&scalar)?;
                    (price, size)
                }
                _ => return None,
            };
            OrderBookLevel::new(price, size).ok()
        })
        .collect()
}

/// Extract a symbol list from any of the gateway's response shapes: a bare
/// list, `{symbols: [...]}`, `{data: [...]}`, or the first list-valued
/// field.
fn parse_symbol_list(data: &Value) -> Vec<String> {
    let items: &[Value] = match data {
        Value::Array(list) => list,
        Value::Object(map) => map
            .get("symbols")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .or_else(|| {
                map.values()
                    .find_map(|v| v.as_array())
                    .map(Vec::as_slice)
            })
            .unwrap_or(&[]),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("symbol")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        })
        .collect()
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;

    #[test]
    fn normalize_symbol_strips_separators() {
        assert_eq!(normalize_symbol("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol("btc-usdt").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol("BTC%2FUSDT").unwrap(), "BTCUSDT");
        assert_eq!(normalize_symbol("eth usdt").unwrap(), "ETHUSDT");
        assert!(normalize_symbol("/-").is_err());
    }

    #[test]
    fn ticker_with_canonical_fields() {
        let data = json!({
            "bid": 50000.0,
            "ask": 50001.0,
            "bidSize": 1.5,
            "askSize": 2.0,
            "last": 50000.5,
            "timestamp": 1700000000000i64
        });
        let snap = parse_ticker_value(&data, "binance", "BTCUSDT").unwrap();
        assert_approx_eq!(snap.bid_price, 50000.0, 1e-9);
        assert_approx_eq!(snap.ask_price, 50001.0, 1e-9);
        assert_approx_eq!(snap.bid_size, 1.5, 1e-9);
        assert_approx_eq!(snap.ask_size, 2.0, 1e-9);
        assert_eq!(snap.observed_at.timestamp_millis(), 1700000000000);
    }

    #[test]
    fn ticker_with_alias_fields() {
        // okx-style spelling
        let data = json!({
            "bestBid": "50000",
            "bestAsk": "50001",
            "bestBidSize": "3",
            "bestAskSize": "4",
            "lastPrice": "50000.5"
        });
        let snap = parse_ticker_value(&data, "okx", "BTCUSDT").unwrap();
        assert_approx_eq!(snap.bid_price, 50000.0, 1e-9);
        assert_approx_eq!(snap.bid_size, 3.0, 1e-9);

        // bybit-style spelling
        let data = json!({
            "buy": 2999.0,
            "sell": 3001.0,
            "buySize": 10.0,
            "sellSize": 12.0,
            "close": 3000.0
        });
        let snap = parse_ticker_value(&data, "bybit", "ETHUSDT").unwrap();
        assert_approx_eq!(snap.bid_price, 2999.0, 1e-9);
        assert_approx_eq!(snap.ask_price, 3001.0, 1e-9);
        assert_approx_eq!(snap.ask_size, 12.0, 1e-9);
    }

    #[test]
    fn ticker_alias_priority_order() {
        // both spellings present: the earlier alias wins
        let data = json!({
            "bid": 100.0,
            "bestBid": 99.0,
            "ask": 101.0,
            "bestAsk": 102.0
        });
        let snap = parse_ticker_value(&data, "okx", "X").unwrap();
        assert_approx_eq!(snap.bid_price, 100.0, 1e-9);
        assert_approx_eq!(snap.ask_price, 101.0, 1e-9);
    }

    #[test]
    fn ticker_unparsable_alias_falls_through() {
        let data = json!({
            "bid": "n/a",
            "bestBid": 100.0,
            "ask": 101.0
        });
        let snap = parse_ticker_value(&data, "okx", "X").unwrap();
        assert_approx_eq!(snap.bid_price, 100.0, 1e-9);
    }

    #[test]
    fn ticker_synthesizes_bid_ask_from_last_price() {
        let data = json!({ "price": 20000.0 });
        let snap = parse_ticker_value(&data, "deribit", "BTCUSDT").unwrap();
        assert_approx_eq!(snap.bid_price, 20000.0 * 0.9999, 1e-6);
        assert_approx_eq!(snap.ask_price, 20000.0 * 1.0001, 1e-6);
        assert!(snap.bid_price < snap.ask_price);
        // missing sizes default to a minimal positive value
        assert_approx_eq!(snap.bid_size, 1.0, 1e-9);
        assert_approx_eq!(snap.ask_size, 1.0, 1e-9);
    }

    #[test]
    fn ticker_derives_last_from_mid() {
        let data = json!({ "bid": 100.0, "ask": 102.0 });
        let snap = parse_ticker_value(&data, "binance", "X").unwrap();
        assert_approx_eq!(snap.last_price, 101.0, 1e-9);
    }

    #[test]
    fn ticker_without_prices_is_malformed() {
        let data = json!({ "volume": 123.0 });
        let err = parse_ticker_value(&data, "binance", "X").unwrap_err();
        assert!(matches!(err, MarketError::MalformedResponse { .. }));
    }

    #[test]
    fn timestamp_variants() {
        let ms = json!({ "timestamp": 1700000000000i64 });
        assert_eq!(parse_timestamp(&ms).timestamp_millis(), 1700000000000);

        let iso = json!({ "timestamp": "2023-11-14T22:13:20Z" });
        assert_eq!(parse_timestamp(&iso).timestamp(), 1700000000);

        // garbage falls back to now
        let bad = json!({ "timestamp": "yesterday" });
        let now = Utc::now();
        assert!((parse_timestamp(&bad) - now).num_seconds().abs() < 5);
    }

    #[test]
    fn orderbook_array_levels() {
        let data = json!({
            "bids": [[100.0, 1.0], ["99.5", "2.0"], [0.0, 3.0]],
            "asks": [[101.0, 1.5], [100.5, 2.5]],
            "timestamp": 1700000000000i64
        });
        let book = parse_orderbook_value(&data, "binance", "BTCUSDT").unwrap();
        // zero-price level dropped, sides sorted
        assert_eq!(book.bids.len(), 2);
        assert_approx_eq!(book.best_bid().price, 100.0, 1e-9);
        assert_approx_eq!(book.best_ask().price, 100.5, 1e-9);
    }

    #[test]
    fn orderbook_object_levels() {
        let data = json!({
            "buy": [{"price": 100.0, "qty": 1.0}, {"price": 99.0, "size": 2.0}],
            "sell": [{"price": 101.0, "size": 1.0}]
        });
        let book = parse_orderbook_value(&data, "okx", "BTCUSDT").unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_approx_eq!(book.bids[1].size, 2.0, 1e-9);
    }

    #[test]
    fn orderbook_missing_side_is_malformed() {
        let data = json!({ "bids": [[100.0, 1.0]] });
        let err = parse_orderbook_value(&data, "okx", "BTCUSDT").unwrap_err();
        assert!(matches!(err, MarketError::MalformedResponse { .. }));
    }

    #[test]
    fn symbol_list_shapes() {
        let bare = json!(["BTCUSDT", "ETHUSDT"]);
        assert_eq!(parse_symbol_list(&bare), vec!["BTCUSDT", "ETHUSDT"]);

        let wrapped = json!({ "symbols": ["BTCUSDT"] });
        assert_eq!(parse_symbol_list(&wrapped), vec!["BTCUSDT"]);

        let data_key = json!({ "data": ["SOLUSDT"] });
        assert_eq!(parse_symbol_list(&data_key), vec!["SOLUSDT"]);

        let nested = json!({ "result": ["XRPUSDT"] });
        assert_eq!(parse_symbol_list(&nested), vec!["XRPUSDT"]);

        let objects = json!({ "data": [{"symbol": "BTCUSDT"}, {"name": "ETHUSDT"}] });
        assert_eq!(parse_symbol_list(&objects), vec!["BTCUSDT", "ETHUSDT"]);

        let empty = json!({ "count": 0 });
        assert!(parse_symbol_list(&empty).is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
