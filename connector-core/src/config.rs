//! Connector configuration

use std::fmt;
use std::time::Duration;

use crate::exchanges::websocket::StreamConfig;
use crate::exchanges::{ExchangeError, ExchangeResult, Symbol, TradingMode};

/// API key pair
#[derive(Clone, Default)]
pub struct Credentials {
    pub public_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// REST and stream base URLs of one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub rest: &'static str,
    pub stream: &'static str,
}

impl Endpoints {
    pub const FUTURES: Endpoints = Endpoints {
        rest: "https://fapi.binance.com",
        stream: "wss://fstream.binance.com/ws",
    };
    pub const FUTURES_TESTNET: Endpoints = Endpoints {
        rest: "https://testnet.binancefuture.com",
        stream: "wss://stream.binancefuture.com/ws",
    };
    pub const SPOT: Endpoints = Endpoints {
        rest: "https://api.binance.com",
        stream: "wss://stream.binance.com:9443/ws",
    };
    pub const SPOT_TESTNET: Endpoints = Endpoints {
        rest: "https://testnet.binance.vision",
        stream: "wss://testnet.binance.vision/ws",
    };

    pub fn select(testnet: bool, futures: bool) -> Self {
        match (futures, testnet) {
            (true, false) => Self::FUTURES,
            (true, true) => Self::FUTURES_TESTNET,
            (false, false) => Self::SPOT,
            (false, true) => Self::SPOT_TESTNET,
        }
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub credentials: Credentials,
    pub testnet: bool,
    pub futures: bool,
    pub default_symbol: Symbol,
    pub request_timeout: Duration,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub message_timeout: Duration,
    pub event_buffer: usize,
    pub max_subscribe_batch: usize,
}

impl ConnectorConfig {
    pub fn new(credentials: Credentials, testnet: bool, futures: bool) -> Self {
        Self {
            credentials,
            testnet,
            futures,
            default_symbol: Symbol::new("BTCUSDT"),
            request_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(2),
            ping_interval: Duration::from_secs(180),
            message_timeout: Duration::from_secs(30),
            event_buffer: 1024,
            max_subscribe_batch: 200,
        }
    }

    pub fn with_default_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.default_symbol = Symbol::new(symbol);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_max_subscribe_batch(mut self, max: usize) -> Self {
        self.max_subscribe_batch = max;
        self
    }

    pub fn mode(&self) -> TradingMode {
        if self.futures {
            TradingMode::Futures
        } else {
            TradingMode::Spot
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::select(self.testnet, self.futures)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.endpoints().stream.to_string(),
            default_symbol: self.default_symbol.clone(),
            reconnect_interval: self.reconnect_interval,
            ping_interval: self.ping_interval,
            message_timeout: self.message_timeout,
            event_buffer: self.event_buffer,
            max_subscribe_batch: self.max_subscribe_batch,
        }
    }

    /// Reject configurations the connector cannot run with
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.credentials.public_key.trim().is_empty() {
            return Err(ExchangeError::Config("public API key is empty".to_string()));
        }
        if self.credentials.secret_key.trim().is_empty() {
            return Err(ExchangeError::Config("secret API key is empty".to_string()));
        }
        if !self.default_symbol.validate() {
            return Err(ExchangeError::Config(format!(
                "invalid default symbol '{}'",
                self.default_symbol
            )));
        }
        if self.reconnect_interval.is_zero() {
            return Err(ExchangeError::Config("reconnect interval must be positive".to_string()));
        }
        if self.ping_interval.is_zero() {
            return Err(ExchangeError::Config("ping interval must be positive".to_string()));
        }
        if self.message_timeout.is_zero() {
            return Err(ExchangeError::Config("message timeout must be positive".to_string()));
        }
        if self.max_subscribe_batch == 0 {
            return Err(ExchangeError::Config("subscribe batch ceiling must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> ConnectorConfig {
        ConnectorConfig::new(Credentials::new("public", "secret"), true, true)
    }

    #[test]
    fn test_endpoint_selection() {
        assert_eq!(Endpoints::select(false, true).rest, "https://fapi.binance.com");
        assert_eq!(Endpoints::select(true, true).stream, "wss://stream.binancefuture.com/ws");
        assert_eq!(Endpoints::select(false, false).stream, "wss://stream.binance.com:9443/ws");
        assert_eq!(Endpoints::select(true, false).rest, "https://testnet.binance.vision");
    }

    #[test]
    fn test_defaults_and_stream_config() {
        let config = config().with_max_subscribe_batch(50);
        assert_eq!(config.mode(), TradingMode::Futures);
        assert_eq!(config.default_symbol.as_str(), "BTCUSDT");

        let stream = config.stream_config();
        assert_eq!(stream.url, "wss://stream.binancefuture.com/ws");
        assert_eq!(stream.max_subscribe_batch, 50);
        assert_eq!(stream.reconnect_interval, Duration::from_secs(2));
        assert_eq!(stream.message_timeout, Duration::from_secs(30));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_validation_errors_are_config_errors() {
        let empty_key = ConnectorConfig::new(Credentials::new("", "secret"), false, false);
        assert!(matches!(empty_key.validate(), Err(ExchangeError::Config(_))));

        assert_err!(config().with_reconnect_interval(Duration::ZERO).validate());
        assert_err!(config().with_max_subscribe_batch(0).validate());
        assert_err!(config().with_message_timeout(Duration::ZERO).validate());
        assert_err!(config().with_default_symbol("BTC/USDT").validate());
    }

    #[test]
    fn test_secret_is_not_printed() {
        let printed = format!("{:?}", Credentials::new("public", "very-secret"));
        assert!(!printed.contains("very-secret"));
    }
}
