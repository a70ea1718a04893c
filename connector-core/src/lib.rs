//! Binance Connectivity Library
//!
//! Signed REST access to Binance spot and USD-M futures, a self-healing stream subscription
//! manager and a price cache that keeps strategy positions marked to market.

pub mod config;
pub mod exchanges;
pub mod market_data;
pub mod strategy;
pub mod workspace;

// Re-export main types for easy access
pub use config::{ConnectorConfig, Credentials, Endpoints};
pub use exchanges::{
    Balance, BidAsk, Candle, Channel, ExchangeError, ExchangeResult, Instrument, OrderState,
    OrderStatus, OrderType, RestClient, Side, StreamEvent, SubscribeOutcome, Symbol, TimeInForce,
    TradingMode,
};
pub use market_data::PriceCache;
pub use strategy::{PositionBook, StrategyHandle, StrategyHandler, StrategyRegistry, TickEvaluation};

use std::sync::Arc;
use tracing::{info, warn};

use exchanges::{
    dialect_for, HttpExecutor, InstrumentRegistry, ReqwestExecutor, RestTransport, StreamManager,
    StreamTransport, TungsteniteTransport,
};
use strategy::Dispatcher;

/// Assembled connector: REST facade, stream manager, price cache and strategy registry
pub struct BinanceConnector {
    config: ConnectorConfig,
    rest: RestClient,
    stream: StreamManager,
    prices: Arc<PriceCache>,
    instruments: InstrumentRegistry,
    strategies: Arc<StrategyRegistry>,
}

impl BinanceConnector {
    /// Build a connector talking to the real exchange
    pub fn new(config: ConnectorConfig) -> ExchangeResult<Self> {
        let http = Arc::new(ReqwestExecutor::new(config.request_timeout)?);
        Self::with_transports(config, http, Arc::new(TungsteniteTransport))
    }

    /// Build a connector over caller-provided HTTP and stream transports
    pub fn with_transports(
        config: ConnectorConfig,
        http: Arc<dyn HttpExecutor>,
        stream_transport: Arc<dyn StreamTransport>,
    ) -> ExchangeResult<Self> {
        config.validate()?;

        let endpoints = config.endpoints();
        let prices = Arc::new(PriceCache::new());
        let strategies = Arc::new(StrategyRegistry::new());

        let transport = RestTransport::new(
            endpoints.rest,
            config.credentials.public_key.clone(),
            &config.credentials.secret_key,
            http,
        )?;
        let rest = RestClient::new(transport, dialect_for(config.mode()), prices.clone());

        let dispatcher = Dispatcher::new(prices.clone(), strategies.clone());
        let stream = StreamManager::new(config.stream_config(), stream_transport, dispatcher);

        Ok(Self {
            config,
            rest,
            stream,
            prices,
            instruments: InstrumentRegistry::new(),
            strategies,
        })
    }

    /// Load instruments and balances, then start streaming.
    ///
    /// REST failures only degrade the snapshot; the stream starts regardless.
    pub async fn start(&self) -> ExchangeResult<()> {
        info!(
            "Starting {} connector ({})",
            self.mode().platform(),
            if self.config.testnet { "testnet" } else { "live" }
        );

        match self.refresh_instruments().await {
            Some(count) => info!("Loaded {} instruments", count),
            None => warn!("Starting without instrument metadata"),
        }
        if self.rest.fetch_balances().await.is_none() {
            warn!("Starting without a balance snapshot");
        }

        self.stream.start()
    }

    /// Stop streaming; the connector does not reconnect afterwards
    pub async fn stop(&self) {
        self.stream.stop().await;
        info!("{} connector stopped", self.mode().platform());
    }

    /// Replace the instrument registry with a fresh listing
    pub async fn refresh_instruments(&self) -> Option<usize> {
        let instruments = self.rest.list_instruments().await?;
        let count = instruments.len();
        self.instruments.replace(instruments);
        Some(count)
    }

    pub fn instrument(&self, symbol: &str) -> Option<Instrument> {
        self.instruments.get(symbol)
    }

    /// Known instruments, ascending by symbol
    pub fn instruments(&self) -> Vec<Instrument> {
        self.instruments.all()
    }

    pub fn subscribe(&self, symbols: &[Symbol], channel: Channel) -> SubscribeOutcome {
        self.stream.subscribe(symbols, channel)
    }

    /// Route ticks for the strategy's symbol to it and keep its positions marked to market
    pub fn register_strategy<S: StrategyHandler + 'static>(&self, strategy: &Arc<S>) -> StrategyHandle {
        let symbol = strategy.symbol().clone();
        let handle = self.strategies.register(strategy);

        let symbols = [symbol];
        self.stream.subscribe(&symbols, Channel::BookTicker);
        self.stream.subscribe(&symbols, Channel::AggTrade);

        info!("{} attached to {}", handle, symbols[0]);
        handle
    }

    pub fn deregister_strategy(&self, handle: StrategyHandle) -> bool {
        self.strategies.deregister(handle)
    }

    pub fn mode(&self) -> TradingMode {
        self.config.mode()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn stream(&self) -> &StreamManager {
        &self.stream
    }

    pub fn prices(&self) -> &Arc<PriceCache> {
        &self.prices
    }

    pub fn strategies(&self) -> &Arc<StrategyRegistry> {
        &self.strategies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::transport::testing::ScriptedExecutor;
    use crate::exchanges::{ConnectionStatus, HttpMethod, StreamConnection};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl StreamTransport for Offline {
        async fn connect(&self, _url: &str) -> ExchangeResult<Box<dyn StreamConnection>> {
            Err(ExchangeError::Transport { message: "offline".into() })
        }
    }

    struct Idle {
        symbol: Symbol,
        positions: PositionBook,
    }

    impl StrategyHandler for Idle {
        fn symbol(&self) -> &Symbol {
            &self.symbol
        }

        fn on_trade_tick(&self, _price: f64, _quantity: f64, _timestamp_ms: i64) -> TickEvaluation {
            TickEvaluation::Ignored
        }

        fn check_trade(&self, _evaluation: TickEvaluation) {}

        fn positions(&self) -> &PositionBook {
            &self.positions
        }
    }

    fn config() -> ConnectorConfig {
        ConnectorConfig::new(Credentials::new("key", "secret"), true, true)
            .with_reconnect_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = ConnectorConfig::new(Credentials::new("", ""), true, true);
        let result = BinanceConnector::with_transports(config, ScriptedExecutor::new(), Arc::new(Offline));
        assert!(matches!(result, Err(ExchangeError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_survives_rest_and_stream_failures() {
        let http = ScriptedExecutor::new();
        http.on(
            HttpMethod::Get,
            "/fapi/v1/exchangeInfo",
            200,
            json!({"symbols": [{"symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT",
                                "pricePrecision": 2, "quantityPrecision": 3, "filters": []}]}),
        );
        // No account route: the balance snapshot fails with a transport error

        let connector = BinanceConnector::with_transports(config(), http, Arc::new(Offline)).unwrap();
        connector.start().await.unwrap();

        assert_eq!(connector.instruments().len(), 1);
        assert_eq!(connector.instrument("BTCUSDT").unwrap().tick_size, 0.01);
        assert!(connector.rest().last_balances().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(connector.stream().metrics().connection_errors >= 1);

        connector.stop().await;
        assert_eq!(connector.stream().status(), ConnectionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_register_strategy_subscribes_its_symbol() {
        let connector =
            BinanceConnector::with_transports(config(), ScriptedExecutor::new(), Arc::new(Offline)).unwrap();
        let strategy = Arc::new(Idle {
            symbol: Symbol::new("ETHUSDT"),
            positions: PositionBook::new(),
        });

        let handle = connector.register_strategy(&strategy);
        assert!(connector.stream().is_subscribed("ETHUSDT", Channel::AggTrade));
        assert!(connector.stream().is_subscribed("ETHUSDT", Channel::BookTicker));
        assert_eq!(connector.strategies().snapshot().for_symbol("ETHUSDT").count(), 1);

        assert!(connector.deregister_strategy(handle));
        assert_eq!(connector.strategies().snapshot().for_symbol("ETHUSDT").count(), 0);
    }
}
