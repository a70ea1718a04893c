//! Strategy callback contract and tick dispatch
//!
//! The connector never owns strategies. It keeps weak back-references keyed by
//! [`StrategyHandle`] and routes stream events to the ones bound to the event's symbol.

pub mod dispatcher;
pub mod positions;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use positions::{Position, PositionBook, PositionStatus};
pub use registry::{StrategyHandle, StrategyRegistry, StrategySnapshot};

use crate::exchanges::Symbol;

/// Result of feeding one trade tick into a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvaluation {
    /// The tick updated the current candle
    SameCandle,
    /// The tick opened a new candle
    NewCandle,
    /// The tick was not used
    Ignored,
}

/// Hooks the connector calls into a strategy engine.
///
/// Implementations are shared with the stream task and must be cheap: they run inline with
/// message dispatch.
pub trait StrategyHandler: Send + Sync {
    /// Instrument the strategy is bound to
    fn symbol(&self) -> &Symbol;

    /// Ingest one aggregated trade
    fn on_trade_tick(&self, price: f64, quantity: f64, timestamp_ms: i64) -> TickEvaluation;

    /// Evaluate entry/exit conditions after a tick was ingested
    fn check_trade(&self, evaluation: TickEvaluation);

    /// Positions whose profit/loss tracks the top of book
    fn positions(&self) -> &PositionBook;
}
