//! QuoteMesh Core Library
//!
//! Cross-venue market data aggregation and arbitrage detection:
//! ref-counted stream subscriptions over a push-then-poll transport,
//! per-venue snapshot caching, consolidated BBO computation, and a
//! supervisor running one monitoring loop per user session.

pub mod arbitrage;
pub mod cache;
pub mod client;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod models;
pub mod stream;
pub mod supervisor;

pub use arbitrage::ArbitrageEngine;
pub use cache::MarketDataCache;
pub use client::ExchangeDataClient;
pub use config::AppConfig;
pub use consolidation::ConsolidationEngine;
pub use error::MarketError;
pub use models::{
    ArbitrageSignal, ConsolidatedQuote, MarketSnapshot, SessionKind, SessionSpec,
};
pub use stream::{StreamStatus, StreamSubscriptionManager, SubscriptionId, TransportState};
pub use supervisor::{NotificationSink, SessionPatch, SessionSupervisor, SupervisorStats};
