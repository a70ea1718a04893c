//! Binance stream message decoding

use serde::Deserialize;
use serde_json::Value;

use super::errors::{ExchangeError, ExchangeResult};
use super::models::raw;
use super::types::Symbol;

/// Decoded stream message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Top of book update
    BookTicker { symbol: Symbol, bid: f64, ask: f64 },
    /// Aggregated trade tick
    AggTrade {
        symbol: Symbol,
        price: f64,
        quantity: f64,
        timestamp_ms: i64,
    },
    /// Reply to a SUBSCRIBE request
    Ack { id: u64 },
    /// The exchange rejected a SUBSCRIBE request
    SubscribeError { id: u64, code: i64, message: String },
}

impl StreamEvent {
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            StreamEvent::BookTicker { symbol, .. } | StreamEvent::AggTrade { symbol, .. } => Some(symbol),
            StreamEvent::Ack { .. } | StreamEvent::SubscribeError { .. } => None,
        }
    }
}

/// Binance book ticker data format
#[derive(Debug, Deserialize)]
struct BinanceBookTickerData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    best_bid_price: String,
    #[serde(rename = "a")]
    best_ask_price: String,
}

/// Error reply to a request sent on the stream
#[derive(Debug, Deserialize)]
struct BinanceRequestError {
    code: i64,
    msg: String,
}

/// Binance aggregated trade data format
#[derive(Debug, Deserialize)]
struct BinanceAggTradeData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Classify and decode one text frame.
///
/// `Ok(None)` means the frame is well formed but of no interest. Spot book ticker frames carry
/// no `e` discriminator and are recognised by their `u` and `A` fields.
pub fn decode(text: &str) -> ExchangeResult<Option<StreamEvent>> {
    let mut message: Value = serde_json::from_str(text)?;

    // Combined streams wrap the payload as {"stream": ..., "data": {...}}
    if message.get("stream").is_some() {
        if let Some(data) = message.get_mut("data").map(Value::take) {
            message = data;
        }
    }

    match message.get("e").and_then(Value::as_str) {
        Some("bookTicker") => decode_book_ticker(message).map(Some),
        Some("aggTrade") => decode_agg_trade(message).map(Some),
        Some(_) => Ok(None),
        None if message.get("u").is_some() && message.get("A").is_some() => {
            decode_book_ticker(message).map(Some)
        }
        None => match message.get("id").and_then(Value::as_u64) {
            Some(id) if message.get("error").is_some() => decode_request_error(id, message).map(Some),
            Some(id) if message.get("result").is_some() => Ok(Some(StreamEvent::Ack { id })),
            _ => Ok(None),
        },
    }
}

fn decode_book_ticker(message: Value) -> ExchangeResult<StreamEvent> {
    let data: BinanceBookTickerData = serde_json::from_value(message)?;
    Ok(StreamEvent::BookTicker {
        bid: raw::parse_f64(&data.best_bid_price, "bid")?,
        ask: raw::parse_f64(&data.best_ask_price, "ask")?,
        symbol: Symbol::new(data.symbol),
    })
}

fn decode_request_error(id: u64, mut message: Value) -> ExchangeResult<StreamEvent> {
    let error: BinanceRequestError = serde_json::from_value(message["error"].take())?;
    Ok(StreamEvent::SubscribeError {
        id,
        code: error.code,
        message: error.msg,
    })
}

fn decode_agg_trade(message: Value) -> ExchangeResult<StreamEvent> {
    let data: BinanceAggTradeData = serde_json::from_value(message)?;
    if data.trade_time < 0 {
        return Err(ExchangeError::data(format!("negative trade time {}", data.trade_time)));
    }
    Ok(StreamEvent::AggTrade {
        price: raw::parse_f64(&data.price, "price")?,
        quantity: raw::parse_f64(&data.quantity, "quantity")?,
        timestamp_ms: data.trade_time,
        symbol: Symbol::new(data.symbol),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_futures_book_ticker() {
        let text = r#"{"e":"bookTicker","u":400900217,"E":1568014460893,"T":1568014460891,"s":"BNBUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}"#;
        assert_eq!(
            decode(text).unwrap(),
            Some(StreamEvent::BookTicker {
                symbol: Symbol::new("BNBUSDT"),
                bid: 25.3519,
                ask: 25.3652
            })
        );
    }

    #[test]
    fn test_spot_book_ticker_is_inferred() {
        let text = r#"{"u":400900217,"s":"BNBUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}"#;
        assert!(matches!(
            decode(text).unwrap(),
            Some(StreamEvent::BookTicker { ref symbol, .. }) if symbol.as_str() == "BNBUSDT"
        ));
    }

    #[test]
    fn test_agg_trade() {
        let text = r#"{"e":"aggTrade","E":123456789,"s":"BTCUSDT","a":5933014,"p":"0.001","q":"100","f":100,"l":105,"T":123456785,"m":true}"#;
        assert_eq!(
            decode(text).unwrap(),
            Some(StreamEvent::AggTrade {
                symbol: Symbol::new("BTCUSDT"),
                price: 0.001,
                quantity: 100.0,
                timestamp_ms: 123456785
            })
        );
    }

    #[test]
    fn test_combined_stream_payload() {
        let text = r#"{"stream":"btcusdt@bookTicker","data":{"u":1,"s":"BTCUSDT","b":"1.0","B":"1","a":"2.0","A":"1"}}"#;
        assert!(matches!(decode(text).unwrap(), Some(StreamEvent::BookTicker { .. })));
    }

    #[test]
    fn test_acks_and_other_events() {
        assert_eq!(decode(r#"{"result":null,"id":3}"#).unwrap(), Some(StreamEvent::Ack { id: 3 }));
        assert_eq!(decode(r#"{"e":"depthUpdate","s":"BTCUSDT"}"#).unwrap(), None);
        assert_eq!(decode(r#"{"hello":"world"}"#).unwrap(), None);
    }

    #[test]
    fn test_rejected_request() {
        let text = r#"{"error":{"code":2,"msg":"Invalid request: too many parameters"},"id":7}"#;
        assert_eq!(
            decode(text).unwrap(),
            Some(StreamEvent::SubscribeError {
                id: 7,
                code: 2,
                message: "Invalid request: too many parameters".to_string()
            })
        );
        assert!(matches!(decode(r#"{"error":"bad","id":8}"#), Err(ExchangeError::Data(_))));
    }

    #[test]
    fn test_malformed_frames_are_data_errors() {
        assert!(matches!(decode("not json"), Err(ExchangeError::Data(_))));
        assert!(matches!(
            decode(r#"{"e":"aggTrade","s":"BTCUSDT","p":"abc","q":"1","T":1}"#),
            Err(ExchangeError::Data(_))
        ));
        assert!(matches!(
            decode(r#"{"e":"bookTicker","s":"BTCUSDT"}"#),
            Err(ExchangeError::Data(_))
        ));
    }
}
