//! REST facade over both trading dialects
//!
//! Every operation comes in two flavours: `try_*` returns the typed [`ExchangeError`], the plain
//! variant logs it and hands back `None`. A `None` caused by a transport error means the outcome
//! is unknown (an order may still have been accepted), not that the request was refused.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::dialect::{Dialect, FillPriceSource};
use super::errors::{ExchangeError, ExchangeResult};
use super::models::{
    raw, weighted_fill_price, Balance, BidAsk, Candle, Instrument, OrderStatus, TradeRecord,
};
use super::signing::RequestParams;
use super::transport::{HttpMethod, RestTransport};
use super::types::{OrderType, Side, TimeInForce, TradingMode};
use crate::market_data::PriceCache;

/// Most candles a single klines request returns
pub const MAX_CANDLES: u32 = 1000;

/// Typed REST operations for one account and dialect
pub struct RestClient {
    transport: RestTransport,
    dialect: Arc<dyn Dialect>,
    prices: Arc<PriceCache>,
    balances: RwLock<BTreeMap<String, Balance>>,
}

impl RestClient {
    pub fn new(transport: RestTransport, dialect: Arc<dyn Dialect>, prices: Arc<PriceCache>) -> Self {
        Self {
            transport,
            dialect,
            prices,
            balances: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.dialect.mode()
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Balances from the last successful fetch
    pub fn last_balances(&self) -> BTreeMap<String, Balance> {
        self.balances.read().clone()
    }

    // ---- instruments ----

    pub async fn try_list_instruments(&self) -> ExchangeResult<Vec<Instrument>> {
        let info = self
            .transport
            .public(HttpMethod::Get, self.dialect.paths().exchange_info, RequestParams::new())
            .await?;

        let symbols = info
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::data("exchangeInfo response has no symbols"))?;

        let mut instruments = Vec::with_capacity(symbols.len());
        for entry in symbols {
            match self.dialect.parse_instrument(entry) {
                Ok(instrument) => instruments.push(instrument),
                Err(e) => {
                    let symbol = entry.get("symbol").and_then(Value::as_str).unwrap_or("?");
                    warn!("Skipping instrument {}: {}", symbol, e);
                }
            }
        }

        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(instruments)
    }

    /// Instruments ordered by symbol
    pub async fn list_instruments(&self) -> Option<Vec<Instrument>> {
        settle("list instruments", self.try_list_instruments().await)
    }

    // ---- balances ----

    pub async fn try_fetch_balances(&self) -> ExchangeResult<BTreeMap<String, Balance>> {
        let account = self
            .transport
            .signed(HttpMethod::Get, self.dialect.paths().account, RequestParams::new())
            .await?;

        let field = self.dialect.balance_list_field();
        let entries = account
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::data(format!("account response has no '{}'", field)))?;

        let balances = entries
            .iter()
            .map(|entry| self.dialect.parse_balance(entry).map(|b| (b.asset.clone(), b)))
            .collect::<ExchangeResult<BTreeMap<_, _>>>()?;

        *self.balances.write() = balances.clone();
        Ok(balances)
    }

    /// Balances keyed by asset
    pub async fn fetch_balances(&self) -> Option<BTreeMap<String, Balance>> {
        settle("fetch balances", self.try_fetch_balances().await)
    }

    // ---- market data ----

    pub async fn try_fetch_historical_candles(
        &self,
        instrument: &Instrument,
        interval: &str,
    ) -> ExchangeResult<Vec<Candle>> {
        let params = RequestParams::new()
            .with("symbol", &instrument.symbol)
            .with("interval", interval)
            .with("limit", MAX_CANDLES);

        let klines = self
            .transport
            .public(HttpMethod::Get, self.dialect.paths().klines, params)
            .await?;

        klines
            .as_array()
            .ok_or_else(|| ExchangeError::data("klines response is not an array"))?
            .iter()
            .map(|k| Candle::from_kline(k, interval))
            .collect()
    }

    /// Up to 1000 most recent candles, oldest first
    pub async fn fetch_historical_candles(&self, instrument: &Instrument, interval: &str) -> Option<Vec<Candle>> {
        settle(
            "fetch candles",
            self.try_fetch_historical_candles(instrument, interval).await,
        )
    }

    pub async fn try_fetch_best_bid_ask(&self, instrument: &Instrument) -> ExchangeResult<BidAsk> {
        let params = RequestParams::new().with("symbol", &instrument.symbol);
        let book = self
            .transport
            .public(HttpMethod::Get, self.dialect.paths().book_ticker, params)
            .await?;

        let bid = raw::f64_field(&book, "bidPrice")?;
        let ask = raw::f64_field(&book, "askPrice")?;
        Ok(self.prices.update(instrument.symbol.as_str(), bid, ask))
    }

    /// Snapshot the top of book into the price cache and return the stored entry
    pub async fn fetch_best_bid_ask(&self, instrument: &Instrument) -> Option<BidAsk> {
        settle("fetch bid/ask", self.try_fetch_best_bid_ask(instrument).await)
    }

    // ---- orders ----

    pub async fn try_place_order(
        &self,
        instrument: &Instrument,
        order_type: OrderType,
        quantity: f64,
        side: Side,
        price: Option<f64>,
        time_in_force: Option<TimeInForce>,
    ) -> ExchangeResult<OrderStatus> {
        let mut params = RequestParams::new()
            .with("symbol", &instrument.symbol)
            .with("side", side.as_str())
            .with("quantity", instrument.format_quantity(instrument.floor_quantity(quantity)))
            .with("type", order_type.as_str());

        if let Some(price) = price {
            params.push("price", instrument.format_price(instrument.round_price(price)));
        }
        if let Some(tif) = time_in_force {
            params.push("timeInForce", tif.as_str());
        }

        let raw = self
            .transport
            .signed(HttpMethod::Post, self.dialect.paths().order, params)
            .await?;
        let status = self.dialect.parse_order(&raw)?;

        info!(
            "{} order {} {} {} placed: {:?}",
            self.dialect.platform(),
            status.order_id,
            side.as_str(),
            instrument.symbol,
            status.state
        );

        Ok(self.resolve_fill_price(instrument, status, false).await)
    }

    /// Quantity is floored to the lot step, price rounded to the tick before submission
    pub async fn place_order(
        &self,
        instrument: &Instrument,
        order_type: OrderType,
        quantity: f64,
        side: Side,
        price: Option<f64>,
        time_in_force: Option<TimeInForce>,
    ) -> Option<OrderStatus> {
        settle(
            "place order",
            self.try_place_order(instrument, order_type, quantity, side, price, time_in_force)
                .await,
        )
    }

    pub async fn try_cancel_order(&self, instrument: &Instrument, order_id: i64) -> ExchangeResult<OrderStatus> {
        let params = RequestParams::new()
            .with("orderId", order_id)
            .with("symbol", &instrument.symbol);

        let raw = self
            .transport
            .signed(HttpMethod::Delete, self.dialect.paths().order, params)
            .await?;
        let status = self.dialect.parse_order(&raw)?;

        // A canceled order may still carry partial fills
        Ok(self.resolve_fill_price(instrument, status, true).await)
    }

    pub async fn cancel_order(&self, instrument: &Instrument, order_id: i64) -> Option<OrderStatus> {
        settle("cancel order", self.try_cancel_order(instrument, order_id).await)
    }

    pub async fn try_get_order_status(&self, instrument: &Instrument, order_id: i64) -> ExchangeResult<OrderStatus> {
        let params = RequestParams::new()
            .with("symbol", &instrument.symbol)
            .with("orderId", order_id);

        let raw = self
            .transport
            .signed(HttpMethod::Get, self.dialect.paths().order, params)
            .await?;
        let status = self.dialect.parse_order(&raw)?;

        Ok(self.resolve_fill_price(instrument, status, false).await)
    }

    pub async fn get_order_status(&self, instrument: &Instrument, order_id: i64) -> Option<OrderStatus> {
        settle("get order status", self.try_get_order_status(instrument, order_id).await)
    }

    async fn resolve_fill_price(&self, instrument: &Instrument, mut status: OrderStatus, always: bool) -> OrderStatus {
        if self.dialect.fill_price_source() == FillPriceSource::Reported {
            return status;
        }

        status.avg_price = if always || status.is_filled() {
            match self.try_compute_average_fill_price(instrument, status.order_id).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("Fill price of order {} unavailable: {}", status.order_id, e);
                    0.0
                }
            }
        } else {
            0.0
        };

        status
    }

    /// Quantity weighted price over the account trades of `order_id`, rounded to the tick.
    ///
    /// An order without fills yields 0.
    pub async fn try_compute_average_fill_price(&self, instrument: &Instrument, order_id: i64) -> ExchangeResult<f64> {
        let params = RequestParams::new().with("symbol", &instrument.symbol);
        let raw_trades = self
            .transport
            .signed(HttpMethod::Get, self.dialect.paths().account_trades, params)
            .await?;

        let trades = raw_trades
            .as_array()
            .ok_or_else(|| ExchangeError::data("trades response is not an array"))?
            .iter()
            .map(TradeRecord::from_raw)
            .collect::<ExchangeResult<Vec<_>>>()?;

        Ok(instrument.round_price(weighted_fill_price(&trades, order_id)))
    }

    pub async fn compute_average_fill_price(&self, instrument: &Instrument, order_id: i64) -> Option<f64> {
        settle(
            "compute fill price",
            self.try_compute_average_fill_price(instrument, order_id).await,
        )
    }

    // ---- sizing ----

    /// Quantity worth `balance_pct` percent of the usable quote balance at `price`.
    ///
    /// `Ok(None)` when the account holds no quote asset balance.
    pub async fn try_compute_trade_size(
        &self,
        instrument: &Instrument,
        price: f64,
        balance_pct: f64,
    ) -> ExchangeResult<Option<f64>> {
        if price <= 0.0 {
            return Err(ExchangeError::data(format!("cannot size a trade at price {}", price)));
        }

        let balances = self.try_fetch_balances().await?;
        let Some(balance) = balances.get(&instrument.quote_asset) else {
            warn!("No {} balance to size {} trade", instrument.quote_asset, instrument.symbol);
            return Ok(None);
        };

        let usable = self.dialect.usable_balance(balance);
        let size = instrument.round_quantity((usable * balance_pct / 100.0) / price);

        info!(
            "{} {} balance = {}, trade size = {}",
            self.dialect.platform(),
            instrument.quote_asset,
            usable,
            size
        );

        Ok(Some(size))
    }

    pub async fn compute_trade_size(&self, instrument: &Instrument, price: f64, balance_pct: f64) -> Option<f64> {
        settle(
            "compute trade size",
            self.try_compute_trade_size(instrument, price, balance_pct).await,
        )
        .flatten()
    }
}

/// Log a failed operation and collapse it to `None`
fn settle<T>(operation: &str, result: ExchangeResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_transient() => {
            error!("Cannot {} (no response, outcome unknown): {}", operation, e);
            None
        }
        Err(e) => {
            error!("Cannot {}: {}", operation, e);
            None
        }
    }
}
