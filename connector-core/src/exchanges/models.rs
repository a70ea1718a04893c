//! Exchange-agnostic market data model built from either dialect's raw responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{ExchangeError, ExchangeResult};
use super::precision::{
    decimals_from_step, floor_to_step, format_decimal, round_to_step, step_from_decimals,
};
use super::types::{Side, Symbol, TradingMode};

/// Tradable instrument (contract) with its quantization rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub tick_size: f64,
    pub lot_size: f64,
    pub mode: TradingMode,
}

impl Instrument {
    /// Build from a `symbols[]` entry of the futures `exchangeInfo` response
    pub fn from_futures(raw: &Value) -> ExchangeResult<Self> {
        let price_decimals = raw::u32_field(raw, "pricePrecision")?;
        let quantity_decimals = raw::u32_field(raw, "quantityPrecision")?;

        let tick_size = match raw::filter_value(raw, "PRICE_FILTER", "tickSize") {
            Some(step) => raw::parse_f64(step, "tickSize")?,
            None => step_from_decimals(price_decimals),
        };
        let lot_size = match raw::filter_value(raw, "LOT_SIZE", "stepSize") {
            Some(step) => raw::parse_f64(step, "stepSize")?,
            None => step_from_decimals(quantity_decimals),
        };

        Ok(Self {
            symbol: Symbol::new(raw::str_field(raw, "symbol")?),
            base_asset: raw::str_field(raw, "baseAsset")?.to_string(),
            quote_asset: raw::str_field(raw, "quoteAsset")?.to_string(),
            price_decimals,
            quantity_decimals,
            tick_size,
            lot_size,
            mode: TradingMode::Futures,
        })
    }

    /// Build from a `symbols[]` entry of the spot `exchangeInfo` response
    pub fn from_spot(raw: &Value) -> ExchangeResult<Self> {
        let symbol = raw::str_field(raw, "symbol")?;
        let tick = raw::filter_value(raw, "PRICE_FILTER", "tickSize")
            .ok_or_else(|| ExchangeError::data(format!("{} has no PRICE_FILTER", symbol)))?;
        let step = raw::filter_value(raw, "LOT_SIZE", "stepSize")
            .ok_or_else(|| ExchangeError::data(format!("{} has no LOT_SIZE filter", symbol)))?;

        Ok(Self {
            symbol: Symbol::new(symbol),
            base_asset: raw::str_field(raw, "baseAsset")?.to_string(),
            quote_asset: raw::str_field(raw, "quoteAsset")?.to_string(),
            price_decimals: decimals_from_step(tick),
            quantity_decimals: decimals_from_step(step),
            tick_size: raw::parse_f64(tick, "tickSize")?,
            lot_size: raw::parse_f64(step, "stepSize")?,
            mode: TradingMode::Spot,
        })
    }

    /// Floor a quantity to the lot step
    pub fn floor_quantity(&self, quantity: f64) -> f64 {
        floor_to_step(quantity, self.lot_size)
    }

    /// Round a quantity to the nearest lot step
    pub fn round_quantity(&self, quantity: f64) -> f64 {
        round_to_step(quantity, self.lot_size)
    }

    /// Round a price to the nearest tick
    pub fn round_price(&self, price: f64) -> f64 {
        round_to_step(price, self.tick_size)
    }

    pub fn format_price(&self, price: f64) -> String {
        format_decimal(price, self.price_decimals)
    }

    pub fn format_quantity(&self, quantity: f64) -> String {
        format_decimal(quantity, self.quantity_decimals)
    }
}

/// Dialect-specific part of a balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceDetail {
    Futures {
        initial_margin: f64,
        maintenance_margin: f64,
        margin_balance: f64,
        wallet_balance: f64,
        unrealized_pnl: f64,
    },
    Spot {
        free: f64,
        locked: f64,
    },
}

/// Account balance information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: f64,
    pub total: f64,
    pub detail: BalanceDetail,
}

impl Balance {
    /// Build from an `assets[]` entry of the futures account response
    pub fn from_futures(raw: &Value) -> ExchangeResult<Self> {
        let wallet_balance = raw::f64_field(raw, "walletBalance")?;
        let available = match raw.get("availableBalance") {
            Some(_) => raw::f64_field(raw, "availableBalance")?,
            None => wallet_balance,
        };

        Ok(Self {
            asset: raw::str_field(raw, "asset")?.to_string(),
            available,
            total: wallet_balance,
            detail: BalanceDetail::Futures {
                initial_margin: raw::f64_field(raw, "initialMargin")?,
                maintenance_margin: raw::f64_field(raw, "maintMargin")?,
                margin_balance: raw::f64_field(raw, "marginBalance")?,
                wallet_balance,
                unrealized_pnl: raw::f64_field(raw, "unrealizedProfit")?,
            },
        })
    }

    /// Build from a `balances[]` entry of the spot account response
    pub fn from_spot(raw: &Value) -> ExchangeResult<Self> {
        let free = raw::f64_field(raw, "free")?;
        let locked = raw::f64_field(raw, "locked")?;

        Ok(Self {
            asset: raw::str_field(raw, "asset")?.to_string(),
            available: free,
            total: free + locked,
            detail: BalanceDetail::Spot { free, locked },
        })
    }
}

/// OHLCV candlestick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: String,
}

impl Candle {
    /// Build from a kline array `[openTime, open, high, low, close, volume, ...]`
    pub fn from_kline(raw: &Value, interval: &str) -> ExchangeResult<Self> {
        let fields = raw
            .as_array()
            .filter(|a| a.len() >= 6)
            .ok_or_else(|| ExchangeError::data(format!("malformed kline: {}", raw)))?;

        let open_time_ms = fields[0]
            .as_i64()
            .ok_or_else(|| ExchangeError::data("kline open time is not an integer"))?;

        Ok(Self {
            open_time_ms,
            open: raw::value_f64(&fields[1], "open")?,
            high: raw::value_f64(&fields[2], "high")?,
            low: raw::value_f64(&fields[3], "low")?,
            close: raw::value_f64(&fields[4], "close")?,
            volume: raw::value_f64(&fields[5], "volume")?,
            interval: interval.to_string(),
        })
    }
}

/// Order state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn parse(raw: &str) -> ExchangeResult<Self> {
        match raw {
            "NEW" | "NEW_INSURANCE" | "NEW_ADL" => Ok(Self::New),
            "PARTIALLY_FILLED" => Ok(Self::PartiallyFilled),
            "FILLED" => Ok(Self::Filled),
            "CANCELED" | "PENDING_CANCEL" => Ok(Self::Canceled),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(Self::Expired),
            other => Err(ExchangeError::data(format!("unknown order status '{}'", other))),
        }
    }
}

/// Immutable snapshot of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub executed_quantity: f64,
    pub price: f64,
    pub state: OrderState,
    pub avg_price: f64,
}

impl OrderStatus {
    /// Futures order responses carry `avgPrice` directly
    pub fn from_futures(raw: &Value) -> ExchangeResult<Self> {
        let avg_price = match raw.get("avgPrice") {
            Some(_) => raw::f64_field(raw, "avgPrice")?,
            None => 0.0,
        };
        Self::from_parts(raw, avg_price)
    }

    /// Spot order responses lack an average price; the caller supplies the reconstructed one
    pub fn from_spot(raw: &Value, avg_price: f64) -> ExchangeResult<Self> {
        Self::from_parts(raw, avg_price)
    }

    fn from_parts(raw: &Value, avg_price: f64) -> ExchangeResult<Self> {
        let side_raw = raw::str_field(raw, "side")?;
        let side = Side::parse(side_raw)
            .ok_or_else(|| ExchangeError::data(format!("unknown order side '{}'", side_raw)))?;

        Ok(Self {
            order_id: raw::i64_field(raw, "orderId")?,
            symbol: Symbol::new(raw::str_field(raw, "symbol")?),
            side,
            quantity: raw::f64_field(raw, "origQty")?,
            executed_quantity: raw::f64_field(raw, "executedQty")?,
            price: raw::f64_field(raw, "price")?,
            state: OrderState::parse(raw::str_field(raw, "status")?)?,
            avg_price,
        })
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }
}

/// One account trade (fill) from the trades endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub order_id: i64,
    pub symbol: Symbol,
    pub price: f64,
    pub quantity: f64,
}

impl TradeRecord {
    pub fn from_raw(raw: &Value) -> ExchangeResult<Self> {
        Ok(Self {
            id: raw::i64_field(raw, "id")?,
            order_id: raw::i64_field(raw, "orderId")?,
            symbol: Symbol::new(raw::str_field(raw, "symbol")?),
            price: raw::f64_field(raw, "price")?,
            quantity: raw::f64_field(raw, "qty")?,
        })
    }
}

/// Quantity-weighted average price of the trades belonging to `order_id`.
///
/// Returns 0 when the order has no fills yet.
pub fn weighted_fill_price(trades: &[TradeRecord], order_id: i64) -> f64 {
    let executed: f64 = trades
        .iter()
        .filter(|t| t.order_id == order_id)
        .map(|t| t.quantity)
        .sum();

    if executed <= 0.0 {
        return 0.0;
    }

    trades
        .iter()
        .filter(|t| t.order_id == order_id)
        .map(|t| t.price * (t.quantity / executed))
        .sum()
}

/// Best bid and ask of one instrument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidAsk {
    pub bid: f64,
    pub ask: f64,
}

impl BidAsk {
    pub fn new(bid: f64, ask: f64) -> Self {
        Self { bid, ask }
    }
}

/// Field accessors for Binance JSON, where numbers usually arrive as strings.
pub(crate) mod raw {
    use super::*;

    pub fn str_field<'a>(raw: &'a Value, field: &str) -> ExchangeResult<&'a str> {
        raw.get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::data(format!("missing string field '{}'", field)))
    }

    pub fn i64_field(raw: &Value, field: &str) -> ExchangeResult<i64> {
        raw.get(field)
            .and_then(Value::as_i64)
            .ok_or_else(|| ExchangeError::data(format!("missing integer field '{}'", field)))
    }

    pub fn u32_field(raw: &Value, field: &str) -> ExchangeResult<u32> {
        raw.get(field)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .ok_or_else(|| ExchangeError::data(format!("missing integer field '{}'", field)))
    }

    pub fn f64_field(raw: &Value, field: &str) -> ExchangeResult<f64> {
        let value = raw
            .get(field)
            .ok_or_else(|| ExchangeError::data(format!("missing numeric field '{}'", field)))?;
        value_f64(value, field)
    }

    pub fn value_f64(value: &Value, field: &str) -> ExchangeResult<f64> {
        match value {
            Value::String(s) => parse_f64(s, field),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ExchangeError::data(format!("field '{}' out of range", field))),
            other => Err(ExchangeError::data(format!(
                "field '{}' is not numeric: {}",
                field, other
            ))),
        }
    }

    pub fn parse_f64(s: &str, field: &str) -> ExchangeResult<f64> {
        s.parse::<f64>()
            .map_err(|e| ExchangeError::data(format!("invalid {} '{}': {}", field, s, e)))
    }

    /// Value of `key` inside the `filters[]` entry whose `filterType` is `filter_type`
    pub fn filter_value<'a>(raw: &'a Value, filter_type: &str, key: &str) -> Option<&'a str> {
        raw.get("filters")?
            .as_array()?
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))?
            .get(key)?
            .as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn futures_symbol() -> Value {
        json!({
            "symbol": "BTCUSDT",
            "baseAsset": "BTC",
            "quoteAsset": "USDT",
            "pricePrecision": 2,
            "quantityPrecision": 3,
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "556.80"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001"}
            ]
        })
    }

    #[test]
    fn test_futures_instrument() {
        let instrument = Instrument::from_futures(&futures_symbol()).unwrap();
        assert_eq!(instrument.symbol.as_str(), "BTCUSDT");
        assert_eq!(instrument.quote_asset, "USDT");
        assert_eq!(instrument.price_decimals, 2);
        assert_eq!(instrument.tick_size, 0.1);
        assert_eq!(instrument.lot_size, 0.001);
        assert_eq!(instrument.mode, TradingMode::Futures);
    }

    #[test]
    fn test_futures_instrument_without_filters_uses_precision() {
        let raw = json!({
            "symbol": "ETHUSDT", "baseAsset": "ETH", "quoteAsset": "USDT",
            "pricePrecision": 2, "quantityPrecision": 3, "filters": []
        });
        let instrument = Instrument::from_futures(&raw).unwrap();
        assert_eq!(instrument.tick_size, 0.01);
        assert_eq!(instrument.lot_size, 0.001);
    }

    #[test]
    fn test_spot_instrument() {
        let raw = json!({
            "symbol": "ETHBTC",
            "baseAsset": "ETH",
            "quoteAsset": "BTC",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.00000100"},
                {"filterType": "LOT_SIZE", "stepSize": "0.00010000"}
            ]
        });
        let instrument = Instrument::from_spot(&raw).unwrap();
        assert_eq!(instrument.price_decimals, 6);
        assert_eq!(instrument.quantity_decimals, 4);
        assert_eq!(instrument.tick_size, 0.000001);
        assert_eq!(instrument.mode, TradingMode::Spot);

        let missing = json!({"symbol": "X", "baseAsset": "A", "quoteAsset": "B", "filters": []});
        assert!(matches!(Instrument::from_spot(&missing), Err(ExchangeError::Data(_))));
    }

    #[test]
    fn test_instrument_quantization() {
        let instrument = Instrument::from_futures(&futures_symbol()).unwrap();
        assert_eq!(instrument.floor_quantity(0.0159), 0.015);
        assert_eq!(instrument.round_price(27_000.06), 27_000.1);
        assert_eq!(instrument.format_price(instrument.round_price(27_000.06)), "27000.10");
        assert_eq!(instrument.format_quantity(0.015), "0.015");
    }

    #[test]
    fn test_balances() {
        let futures = Balance::from_futures(&json!({
            "asset": "USDT", "walletBalance": "1000.5", "initialMargin": "10",
            "maintMargin": "1", "marginBalance": "1002.5", "unrealizedProfit": "2.0",
            "availableBalance": "990.5"
        }))
        .unwrap();
        assert_eq!(futures.available, 990.5);
        assert_eq!(futures.total, 1000.5);
        assert!(matches!(futures.detail, BalanceDetail::Futures { wallet_balance, .. } if wallet_balance == 1000.5));

        let spot = Balance::from_spot(&json!({"asset": "BTC", "free": "0.5", "locked": "0.25"})).unwrap();
        assert_eq!(spot.available, 0.5);
        assert_eq!(spot.total, 0.75);
    }

    #[test]
    fn test_candle_from_kline() {
        let raw = json!([1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815", 1499644799999i64]);
        let candle = Candle::from_kline(&raw, "1h").unwrap();
        assert_eq!(candle.open_time_ms, 1499040000000);
        assert_eq!(candle.high, 0.8);
        assert_eq!(candle.interval, "1h");
        assert!(Candle::from_kline(&json!([1, "2"]), "1m").is_err());
    }

    #[test]
    fn test_order_status_parsing() {
        let raw = json!({
            "orderId": 42, "symbol": "BTCUSDT", "side": "BUY", "origQty": "0.010",
            "executedQty": "0.010", "price": "0", "status": "FILLED", "avgPrice": "27123.40"
        });
        let futures = OrderStatus::from_futures(&raw).unwrap();
        assert_eq!(futures.avg_price, 27123.4);
        assert!(futures.is_filled());

        let spot = OrderStatus::from_spot(&raw, 101.0).unwrap();
        assert_eq!(spot.avg_price, 101.0);

        assert_eq!(OrderState::parse("PENDING_CANCEL").unwrap(), OrderState::Canceled);
        assert_eq!(OrderState::parse("EXPIRED_IN_MATCH").unwrap(), OrderState::Expired);
        assert!(OrderState::parse("WHATEVER").is_err());
    }

    #[test]
    fn test_weighted_fill_price() {
        let trade = |id, order_id, qty, price| TradeRecord {
            id,
            order_id,
            symbol: Symbol::new("BTCUSDT"),
            price,
            quantity: qty,
        };
        let trades = vec![trade(1, 7, 2.0, 100.0), trade(2, 7, 1.0, 103.0), trade(3, 8, 5.0, 90.0)];

        let avg = weighted_fill_price(&trades, 7);
        assert!((avg - 101.0).abs() < 1e-9);
        assert_eq!(weighted_fill_price(&trades, 99), 0.0);
    }
}
