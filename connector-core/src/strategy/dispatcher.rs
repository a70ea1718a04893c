//! Routes decoded stream events into the price cache and registered strategies

use std::sync::Arc;

use super::registry::StrategyRegistry;
use crate::exchanges::StreamEvent;
use crate::market_data::PriceCache;

/// Applies stream events in arrival order
#[derive(Clone)]
pub struct Dispatcher {
    prices: Arc<PriceCache>,
    strategies: Arc<StrategyRegistry>,
}

impl Dispatcher {
    pub fn new(prices: Arc<PriceCache>, strategies: Arc<StrategyRegistry>) -> Self {
        Self { prices, strategies }
    }

    pub fn dispatch(&self, event: &StreamEvent) {
        match event {
            StreamEvent::BookTicker { symbol, bid, ask } => self.update_price(symbol.as_str(), *bid, *ask),
            StreamEvent::AggTrade {
                symbol,
                price,
                quantity,
                timestamp_ms,
            } => self.trade_tick(symbol.as_str(), *price, *quantity, *timestamp_ms),
            StreamEvent::Ack { .. } | StreamEvent::SubscribeError { .. } => {}
        }
    }

    /// Store the new top of book, then mark every open position on `symbol` to market
    pub fn update_price(&self, symbol: &str, bid: f64, ask: f64) {
        let quote = self.prices.update(symbol, bid, ask);

        for strategy in self.strategies.snapshot().for_symbol(symbol) {
            strategy.positions().update_pnl(quote);
        }
    }

    /// Feed a trade tick to every strategy bound to `symbol` and let it evaluate
    pub fn trade_tick(&self, symbol: &str, price: f64, quantity: f64, timestamp_ms: i64) {
        for strategy in self.strategies.snapshot().for_symbol(symbol) {
            let evaluation = strategy.on_trade_tick(price, quantity, timestamp_ms);
            strategy.check_trade(evaluation);
        }
    }
}
