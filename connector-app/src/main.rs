//! Binance Connector Application
//!
//! Streams the saved watchlist, attaches a candle-logging strategy per saved strategy setup and
//! reports prices and position PnL until interrupted.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use connector_core::workspace::{
    load_strategies, load_watchlist, save_strategies, save_watchlist, JsonFileStore, StrategyRow,
    WatchlistRow,
};
use connector_core::{
    BinanceConnector, Channel, ConnectorConfig, Credentials, PositionBook, StrategyHandler, Symbol,
    TickEvaluation,
};

const EXCHANGE_NAME: &str = "Binance";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config_from_env()?;
    let store = JsonFileStore::new(env::var("WORKSPACE_FILE").unwrap_or_else(|_| "workspace.json".to_string()));

    let connector = BinanceConnector::new(config).context("invalid connector configuration")?;
    connector.start().await?;

    // Watchlist: stream top of book and take a REST snapshot so prices show up right away
    let watchlist: Vec<Symbol> = load_watchlist(&store)
        .unwrap_or_else(|e| {
            warn!("Cannot load watchlist: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter(|row| row.exchange == EXCHANGE_NAME)
        .map(|row| Symbol::new(row.symbol))
        .collect();

    if !watchlist.is_empty() {
        connector.subscribe(&watchlist, Channel::BookTicker);
        for symbol in &watchlist {
            if let Some(instrument) = connector.instrument(symbol.as_str()) {
                connector.rest().fetch_best_bid_ask(&instrument).await;
            }
        }
    }

    // Strategies
    let mut setups = load_strategies(&store).unwrap_or_else(|e| {
        warn!("Cannot load strategies: {}", e);
        Vec::new()
    });
    if setups.is_empty() {
        setups.push(default_setup(connector.config()));
    }

    let mut strategies = Vec::new();
    for setup in &setups {
        let symbol = setup.contract.split('_').next().unwrap_or_default();
        if connector.instruments().is_empty() || connector.instrument(symbol).is_some() {
            let strategy = Arc::new(CandleLogger::new(Symbol::new(symbol), timeframe_ms(&setup.timeframe)));
            connector.register_strategy(&strategy);
            strategies.push(strategy);
        } else {
            warn!("Skipping {} strategy on unknown contract {}", setup.strategy_type, setup.contract);
        }
    }

    info!("Connector is running. Press Ctrl+C to stop.");

    let mut report = tokio::time::interval(Duration::from_secs(30));
    report.tick().await;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received...");
                break;
            }
            _ = report.tick() => {
                for (symbol, quote) in connector.prices().snapshot() {
                    info!("{} bid {} ask {}", symbol, quote.bid, quote.ask);
                }
                for strategy in &strategies {
                    info!(
                        "{} candles on {}, open PnL {:.4}",
                        strategy.candle_count(),
                        strategy.symbol(),
                        strategy.positions().total_pnl()
                    );
                }
                let metrics = connector.stream().metrics();
                info!(
                    "Stream: {:?}, {} messages, {} parse errors, {} rejected subscriptions, {} reconnections",
                    connector.stream().status(),
                    metrics.messages_received,
                    metrics.parse_errors,
                    metrics.subscribe_errors,
                    metrics.reconnections
                );
            }
        }
    }

    connector.stop().await;

    let rows: Vec<WatchlistRow> = watchlist
        .iter()
        .map(|symbol| WatchlistRow {
            symbol: symbol.to_string(),
            exchange: EXCHANGE_NAME.to_string(),
        })
        .collect();
    save_watchlist(&store, &rows)?;
    save_strategies(&store, &setups)?;
    info!("Workspace saved to {}", store.path().display());

    Ok(())
}

fn config_from_env() -> Result<ConnectorConfig> {
    let public_key = env::var("BINANCE_API_KEY").context("BINANCE_API_KEY is not set")?;
    let secret_key = env::var("BINANCE_SECRET_KEY").context("BINANCE_SECRET_KEY is not set")?;

    Ok(ConnectorConfig::new(
        Credentials::new(public_key, secret_key),
        env_flag("BINANCE_TESTNET", true),
        env_flag("BINANCE_FUTURES", true),
    ))
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name).map(|v| parse_flag(&v, default)).unwrap_or(default)
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn default_setup(config: &ConnectorConfig) -> StrategyRow {
    StrategyRow {
        strategy_type: "CandleLogger".to_string(),
        contract: format!("{}_{}", config.default_symbol, config.mode().platform()),
        timeframe: "1m".to_string(),
        balance_pct: 0.0,
        take_profit: 0.0,
        stop_loss: 0.0,
        extra_params: Default::default(),
    }
}

/// Timeframe string such as `1m` or `4h` in milliseconds; unknown values fall back to one minute
fn timeframe_ms(timeframe: &str) -> i64 {
    const UNITS: [(char, i64); 3] = [('m', 60_000), ('h', 3_600_000), ('d', 86_400_000)];

    UNITS
        .iter()
        .find_map(|(unit, unit_ms)| {
            let count = timeframe.strip_suffix(*unit)?.parse::<i64>().ok()?;
            (count > 0).then(|| count.saturating_mul(*unit_ms))
        })
        .unwrap_or(60_000)
}

#[derive(Debug, Clone, Copy)]
struct CandleState {
    open_time_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Aggregates trade ticks into candles and logs each one as it closes
struct CandleLogger {
    symbol: Symbol,
    timeframe_ms: i64,
    current: Mutex<Option<CandleState>>,
    completed: Mutex<u64>,
    positions: PositionBook,
}

impl CandleLogger {
    fn new(symbol: Symbol, timeframe_ms: i64) -> Self {
        Self {
            symbol,
            timeframe_ms,
            current: Mutex::new(None),
            completed: Mutex::new(0),
            positions: PositionBook::new(),
        }
    }

    fn candle_count(&self) -> u64 {
        *self.completed.lock()
    }
}

impl StrategyHandler for CandleLogger {
    fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    fn on_trade_tick(&self, price: f64, quantity: f64, timestamp_ms: i64) -> TickEvaluation {
        let open_time_ms = timestamp_ms - timestamp_ms.rem_euclid(self.timeframe_ms);
        let mut current = self.current.lock();

        match current.as_mut() {
            Some(candle) if open_time_ms < candle.open_time_ms => TickEvaluation::Ignored,
            Some(candle) if open_time_ms == candle.open_time_ms => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
                candle.volume += quantity;
                TickEvaluation::SameCandle
            }
            previous => {
                if let Some(closed) = previous {
                    info!(
                        "{} candle {} o {} h {} l {} c {} v {:.4}",
                        self.symbol, closed.open_time_ms, closed.open, closed.high, closed.low, closed.close, closed.volume
                    );
                    *self.completed.lock() += 1;
                }
                *current = Some(CandleState {
                    open_time_ms,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: quantity,
                });
                TickEvaluation::NewCandle
            }
        }
    }

    fn check_trade(&self, _evaluation: TickEvaluation) {}

    fn positions(&self) -> &PositionBook {
        &self.positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframes() {
        assert_eq!(timeframe_ms("1m"), 60_000);
        assert_eq!(timeframe_ms("15m"), 900_000);
        assert_eq!(timeframe_ms("4h"), 14_400_000);
        assert_eq!(timeframe_ms("bogus"), 60_000);
        assert_eq!(timeframe_ms(""), 60_000);
        assert_eq!(timeframe_ms("1分"), 60_000);
        assert_eq!(timeframe_ms("分"), 60_000);
        assert_eq!(timeframe_ms("0h"), 60_000);
    }

    #[test]
    fn test_flags() {
        assert!(parse_flag("TRUE", false));
        assert!(!parse_flag("0", true));
        assert!(parse_flag("maybe", true));
    }

    #[test]
    fn test_candle_aggregation() {
        let logger = CandleLogger::new(Symbol::new("BTCUSDT"), 60_000);

        assert_eq!(logger.on_trade_tick(100.0, 1.0, 60_000), TickEvaluation::NewCandle);
        assert_eq!(logger.on_trade_tick(105.0, 0.5, 90_000), TickEvaluation::SameCandle);
        assert_eq!(logger.on_trade_tick(99.0, 0.5, 119_999), TickEvaluation::SameCandle);
        assert_eq!(logger.on_trade_tick(101.0, 2.0, 120_000), TickEvaluation::NewCandle);
        assert_eq!(logger.on_trade_tick(98.0, 1.0, 30_000), TickEvaluation::Ignored);

        assert_eq!(logger.candle_count(), 1);
        let current = *logger.current.lock();
        assert_eq!(current.map(|candle| candle.open), Some(101.0));
    }
}
