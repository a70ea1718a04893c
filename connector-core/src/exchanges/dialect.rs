//! Spot and futures REST dialects behind one capability interface

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::errors::ExchangeResult;
use super::models::{Balance, BalanceDetail, Instrument, OrderStatus};
use super::types::TradingMode;

/// REST paths of one dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestPaths {
    pub exchange_info: &'static str,
    pub klines: &'static str,
    pub book_ticker: &'static str,
    pub account: &'static str,
    pub order: &'static str,
    pub account_trades: &'static str,
}

/// Where an order's average fill price comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPriceSource {
    /// The order response carries it (`avgPrice`)
    Reported,
    /// Must be rebuilt from the account's trade records
    Reconstructed,
}

/// Everything that differs between the exchange's trading modes.
///
/// Selected once when the connector is built; the REST facade never branches on the mode itself.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn mode(&self) -> TradingMode;

    fn paths(&self) -> &'static RestPaths;

    fn parse_instrument(&self, raw: &Value) -> ExchangeResult<Instrument>;

    /// Field of the account response holding the per-asset list
    fn balance_list_field(&self) -> &'static str;

    fn parse_balance(&self, raw: &Value) -> ExchangeResult<Balance>;

    /// Balance that may be committed to a new position
    fn usable_balance(&self, balance: &Balance) -> f64;

    fn parse_order(&self, raw: &Value) -> ExchangeResult<OrderStatus>;

    fn fill_price_source(&self) -> FillPriceSource;

    fn platform(&self) -> &'static str {
        self.mode().platform()
    }
}

static FUTURES_PATHS: RestPaths = RestPaths {
    exchange_info: "/fapi/v1/exchangeInfo",
    klines: "/fapi/v1/klines",
    book_ticker: "/fapi/v1/ticker/bookTicker",
    account: "/fapi/v2/account",
    order: "/fapi/v1/order",
    account_trades: "/fapi/v1/userTrades",
};

static SPOT_PATHS: RestPaths = RestPaths {
    exchange_info: "/api/v3/exchangeInfo",
    klines: "/api/v3/klines",
    book_ticker: "/api/v3/ticker/bookTicker",
    account: "/api/v3/account",
    order: "/api/v3/order",
    account_trades: "/api/v3/myTrades",
};

/// USD-M futures dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct FuturesDialect;

impl Dialect for FuturesDialect {
    fn mode(&self) -> TradingMode {
        TradingMode::Futures
    }

    fn paths(&self) -> &'static RestPaths {
        &FUTURES_PATHS
    }

    fn parse_instrument(&self, raw: &Value) -> ExchangeResult<Instrument> {
        Instrument::from_futures(raw)
    }

    fn balance_list_field(&self) -> &'static str {
        "assets"
    }

    fn parse_balance(&self, raw: &Value) -> ExchangeResult<Balance> {
        Balance::from_futures(raw)
    }

    fn usable_balance(&self, balance: &Balance) -> f64 {
        match balance.detail {
            BalanceDetail::Futures { wallet_balance, .. } => wallet_balance,
            _ => balance.total,
        }
    }

    fn parse_order(&self, raw: &Value) -> ExchangeResult<OrderStatus> {
        OrderStatus::from_futures(raw)
    }

    fn fill_price_source(&self) -> FillPriceSource {
        FillPriceSource::Reported
    }
}

/// Spot dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct SpotDialect;

impl Dialect for SpotDialect {
    fn mode(&self) -> TradingMode {
        TradingMode::Spot
    }

    fn paths(&self) -> &'static RestPaths {
        &SPOT_PATHS
    }

    fn parse_instrument(&self, raw: &Value) -> ExchangeResult<Instrument> {
        Instrument::from_spot(raw)
    }

    fn balance_list_field(&self) -> &'static str {
        "balances"
    }

    fn parse_balance(&self, raw: &Value) -> ExchangeResult<Balance> {
        Balance::from_spot(raw)
    }

    fn usable_balance(&self, balance: &Balance) -> f64 {
        match balance.detail {
            BalanceDetail::Spot { free, .. } => free,
            _ => balance.available,
        }
    }

    fn parse_order(&self, raw: &Value) -> ExchangeResult<OrderStatus> {
        OrderStatus::from_spot(raw, 0.0)
    }

    fn fill_price_source(&self) -> FillPriceSource {
        FillPriceSource::Reconstructed
    }
}

/// Pick the dialect for a trading mode
pub fn dialect_for(mode: TradingMode) -> Arc<dyn Dialect> {
    match mode {
        TradingMode::Futures => Arc::new(FuturesDialect),
        TradingMode::Spot => Arc::new(SpotDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dialect_selection() {
        let futures = dialect_for(TradingMode::Futures);
        assert_eq!(futures.mode(), TradingMode::Futures);
        assert_eq!(futures.paths().account, "/fapi/v2/account");
        assert_eq!(futures.balance_list_field(), "assets");
        assert_eq!(futures.fill_price_source(), FillPriceSource::Reported);

        let spot = dialect_for(TradingMode::Spot);
        assert_eq!(spot.platform(), "binance_spot");
        assert_eq!(spot.paths().account_trades, "/api/v3/myTrades");
        assert_eq!(spot.balance_list_field(), "balances");
        assert_eq!(spot.fill_price_source(), FillPriceSource::Reconstructed);
    }

    #[test]
    fn test_usable_balance_per_dialect() {
        let futures = FuturesDialect
            .parse_balance(&json!({
                "asset": "USDT", "walletBalance": "500", "initialMargin": "0",
                "maintMargin": "0", "marginBalance": "510", "unrealizedProfit": "10",
                "availableBalance": "450"
            }))
            .unwrap();
        assert_eq!(FuturesDialect.usable_balance(&futures), 500.0);

        let spot = SpotDialect
            .parse_balance(&json!({"asset": "USDT", "free": "120.5", "locked": "30"}))
            .unwrap();
        assert_eq!(SpotDialect.usable_balance(&spot), 120.5);
    }

    #[test]
    fn test_spot_order_has_no_reported_fill_price() {
        let raw = json!({
            "orderId": 1, "symbol": "BTCUSDT", "side": "SELL", "origQty": "1",
            "executedQty": "1", "price": "0", "status": "FILLED", "avgPrice": "99"
        });
        assert_eq!(SpotDialect.parse_order(&raw).unwrap().avg_price, 0.0);
        assert_eq!(FuturesDialect.parse_order(&raw).unwrap().avg_price, 99.0);
    }
}
