//! Exchange connectivity modules

pub mod binance_stream;
pub mod connector;
pub mod dialect;
pub mod errors;
pub mod models;
pub mod precision;
pub mod registry;
pub mod signing;
pub mod transport;
pub mod types;
pub mod websocket;

pub use binance_stream::StreamEvent;
pub use connector::RestClient;
pub use dialect::{dialect_for, Dialect, FillPriceSource, FuturesDialect, SpotDialect};
pub use errors::{ErrorKind, ExchangeError, ExchangeResult};
pub use models::{
    Balance, BalanceDetail, BidAsk, Candle, Instrument, OrderState, OrderStatus, TradeRecord,
};
pub use registry::InstrumentRegistry;
pub use signing::{RequestParams, Signer};
pub use transport::{HttpExecutor, HttpMethod, ReqwestExecutor, RestTransport};
pub use types::{Channel, OrderType, Side, Symbol, TimeInForce, TradingMode};
pub use websocket::{
    ConnectionStatus, StreamConfig, StreamConnection, StreamManager, StreamMetrics,
    StreamTransport, SubscribeOutcome, TungsteniteTransport,
};
