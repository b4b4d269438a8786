//! Application configuration.
//!
//! One explicit value constructed at startup and passed by dependency
//! injection to each component; no global config singleton.

use std::time::Duration;

/// Top-level configuration with environment overrides.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the market data gateway.
    pub api_base_url: String,
    /// Optional bearer token for the gateway.
    pub api_key: Option<String>,
    /// Exchanges the gateway serves.
    pub supported_exchanges: Vec<String>,

    // HTTP client behavior
    pub http_timeout: Duration,
    pub request_pacing: Duration,
    pub retry_attempts: u32,

    // Session defaults
    pub default_threshold_pct: f64,
    pub default_poll_interval: Duration,
    pub max_sessions: usize,

    // Streaming transport
    pub ws_reconnect_base_delay: Duration,
    pub ws_max_reconnect_attempts: u32,
    pub polling_interval: Duration,

    // Derived-data housekeeping
    pub alert_cooldown: Duration,
    pub history_retention: Duration,
    pub stale_ceiling: Duration,
    pub sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://gomarket-api.goquant.io".to_string(),
            api_key: None,
            supported_exchanges: vec![
                "okx".to_string(),
                "deribit".to_string(),
                "bybit".to_string(),
                "binance".to_string(),
            ],
            http_timeout: Duration::from_secs(30),
            request_pacing: Duration::from_secs(1),
            retry_attempts: 3,
            default_threshold_pct: 0.5,
            default_poll_interval: Duration::from_secs(5),
            max_sessions: 10,
            ws_reconnect_base_delay: Duration::from_secs(5),
            ws_max_reconnect_attempts: 10,
            polling_interval: Duration::from_secs(1),
            alert_cooldown: Duration::from_secs(60),
            history_retention: Duration::from_secs(24 * 3600),
            stale_ceiling: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    /// Load from environment with defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = std::env::var("GOMARKET_BASE_URL") {
            config.api_base_url = v;
        }
        config.api_key = std::env::var("GOMARKET_API_KEY").ok();
        if let Ok(v) = std::env::var("SUPPORTED_EXCHANGES") {
            config.supported_exchanges = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("REQUEST_PACING_MS") {
            if let Ok(ms) = v.parse() {
                config.request_pacing = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("RETRY_ATTEMPTS") {
            config.retry_attempts = v.parse().unwrap_or(config.retry_attempts);
        }
        if let Ok(v) = std::env::var("DEFAULT_THRESHOLD_PERCENTAGE") {
            config.default_threshold_pct = v.parse().unwrap_or(config.default_threshold_pct);
        }
        if let Ok(v) = std::env::var("DEFAULT_UPDATE_INTERVAL") {
            if let Ok(secs) = v.parse() {
                config.default_poll_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("MAX_MONITORING_SESSIONS") {
            config.max_sessions = v.parse().unwrap_or(config.max_sessions);
        }
        if let Ok(v) = std::env::var("WS_RECONNECT_DELAY") {
            if let Ok(secs) = v.parse() {
                config.ws_reconnect_base_delay = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("WS_MAX_RECONNECT_ATTEMPTS") {
            config.ws_max_reconnect_attempts =
                v.parse().unwrap_or(config.ws_max_reconnect_attempts);
        }
        if let Ok(v) = std::env::var("POLLING_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                config.polling_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("ALERT_COOLDOWN_SECS") {
            if let Ok(secs) = v.parse() {
                config.alert_cooldown = Duration::from_secs(secs);
            }
        }

        config
    }

    /// The streaming endpoint derived from the REST base URL.
    pub fn websocket_url(&self) -> String {
        let base = self
            .api_base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        format!("{}/ws", base.trim_end_matches('/'))
    }

    pub fn is_supported_exchange(&self, exchange: &str) -> bool {
        let lower = exchange.to_lowercase();
        self.supported_exchanges.iter().any(|e| *e == lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_from_base() {
        let config = AppConfig {
            api_base_url: "https://gomarket-api.goquant.io/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.websocket_url(), "wss://gomarket-api.goquant.io/ws");

        let config = AppConfig {
            api_base_url: "http://localhost:8080".to_string(),
            ..Default::default()
        };
        assert_eq!(config.websocket_url(), "ws://localhost:8080/ws");
    }

    #[test]
    fn supported_exchange_check_is_case_insensitive() {
        let config = AppConfig::default();
        assert!(config.is_supported_exchange("OKX"));
        assert!(config.is_supported_exchange("binance"));
        assert!(!config.is_supported_exchange("kraken"));
    }
}
