//! QuoteMesh service entry point.
//!
//! Wires the REST client, snapshot cache, stream manager, and session
//! supervisor together and runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quotemesh::models::{ArbitrageSignal, ConsolidatedQuote};
use quotemesh::{
    AppConfig, ExchangeDataClient, MarketDataCache, NotificationSink, SessionSupervisor,
    StreamSubscriptionManager,
};

/// Logs session output. A deployment replaces this with a real delivery
/// transport (bot, webhook, message queue).
struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn on_arbitrage_signal(&self, owner_id: i64, signal: &ArbitrageSignal) {
        info!(
            owner_id,
            symbol = %signal.symbol,
            buy_exchange = %signal.buy_exchange,
            buy_price = signal.buy_price,
            sell_exchange = %signal.sell_exchange,
            sell_price = signal.sell_price,
            spread_pct = signal.spread_pct,
            "arbitrage signal"
        );
    }

    async fn on_market_update(
        &self,
        owner_id: i64,
        quote: &ConsolidatedQuote,
        is_manual_refresh: bool,
    ) {
        info!(
            owner_id,
            symbol = %quote.symbol,
            best_bid = quote.best_bid_price,
            bid_venue = %quote.best_bid_exchange,
            best_ask = quote.best_ask_price,
            ask_venue = %quote.best_ask_exchange,
            is_manual_refresh,
            "market update"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    info!(
        base_url = %config.api_base_url,
        exchanges = ?config.supported_exchanges,
        "starting quotemesh"
    );

    let client = Arc::new(ExchangeDataClient::new(&config)?);
    let cache = Arc::new(MarketDataCache::new());
    let streams = Arc::new(StreamSubscriptionManager::new(
        &config,
        Arc::clone(&client),
        Arc::clone(&cache),
    ));
    let supervisor = SessionSupervisor::new(config, client, cache, streams, Arc::new(LogSink));
    supervisor.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    supervisor.shutdown();
    Ok(())
}
