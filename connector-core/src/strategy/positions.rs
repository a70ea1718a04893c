//! Strategy-owned positions and their profit/loss

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::exchanges::{BidAsk, Side};

/// Position status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A single position; `Buy` is long, `Sell` is short
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub side: Side,
    /// Unknown until the entry order reports a fill price
    pub entry_price: Option<f64>,
    pub quantity: f64,
    pub status: PositionStatus,
    pub pnl: f64,
}

impl Position {
    pub fn new(side: Side, entry_price: Option<f64>, quantity: f64) -> Self {
        Self {
            side,
            entry_price,
            quantity,
            status: PositionStatus::Open,
            pnl: 0.0,
        }
    }

    /// Mark to market: longs sell at the bid, shorts buy back at the ask
    pub fn update_pnl(&mut self, quote: BidAsk) {
        if self.status != PositionStatus::Open {
            return;
        }
        let Some(entry) = self.entry_price else {
            return;
        };

        let price_diff = match self.side {
            Side::Buy => quote.bid - entry,
            Side::Sell => entry - quote.ask,
        };
        self.pnl = price_diff * self.quantity;
    }

    /// Close at `exit_price` and freeze the realized result
    pub fn close(&mut self, exit_price: f64) {
        if let Some(entry) = self.entry_price {
            let price_diff = match self.side {
                Side::Buy => exit_price - entry,
                Side::Sell => entry - exit_price,
            };
            self.pnl = price_diff * self.quantity;
        }
        self.status = PositionStatus::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Positions of one strategy.
///
/// The stream task updates profit/loss while the strategy opens and closes positions, so the
/// list sits behind a lock that is only ever held for the duration of one pass.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: Mutex<Vec<Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open position and return its index
    pub fn open(&self, side: Side, entry_price: Option<f64>, quantity: f64) -> usize {
        let mut positions = self.positions.lock();
        positions.push(Position::new(side, entry_price, quantity));
        positions.len() - 1
    }

    pub fn set_entry_price(&self, index: usize, entry_price: f64) -> bool {
        match self.positions.lock().get_mut(index) {
            Some(position) => {
                position.entry_price = Some(entry_price);
                true
            }
            None => false,
        }
    }

    pub fn close(&self, index: usize, exit_price: f64) -> Option<f64> {
        let mut positions = self.positions.lock();
        let position = positions.get_mut(index).filter(|p| p.is_open())?;
        position.close(exit_price);
        Some(position.pnl)
    }

    /// Recompute profit/loss of every open position
    pub fn update_pnl(&self, quote: BidAsk) {
        for position in self.positions.lock().iter_mut() {
            position.update_pnl(quote);
        }
    }

    pub fn get(&self, index: usize) -> Option<Position> {
        self.positions.lock().get(index).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .lock()
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    /// Sum of profit/loss across all positions, open and closed
    pub fn total_pnl(&self) -> f64 {
        self.positions.lock().iter().map(|p| p.pnl).sum()
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_and_short_pnl() {
        let mut long = Position::new(Side::Buy, Some(100.0), 2.0);
        long.update_pnl(BidAsk::new(105.0, 106.0));
        assert_eq!(long.pnl, 10.0);

        let mut short = Position::new(Side::Sell, Some(100.0), 2.0);
        short.update_pnl(BidAsk::new(94.0, 95.0));
        assert_eq!(short.pnl, 10.0);
    }

    #[test]
    fn test_pnl_skips_unpriced_and_closed_positions() {
        let book = PositionBook::new();
        let pending = book.open(Side::Buy, None, 1.0);
        let closed = book.open(Side::Buy, Some(50.0), 1.0);
        assert_eq!(book.close(closed, 55.0), Some(5.0));

        book.update_pnl(BidAsk::new(70.0, 71.0));
        assert_eq!(book.get(pending).unwrap().pnl, 0.0);
        assert_eq!(book.get(closed).unwrap().pnl, 5.0);

        assert!(book.set_entry_price(pending, 60.0));
        book.update_pnl(BidAsk::new(70.0, 71.0));
        assert_eq!(book.get(pending).unwrap().pnl, 10.0);
        assert_eq!(book.total_pnl(), 15.0);
        assert_eq!(book.open_positions().len(), 1);
    }

    #[test]
    fn test_close_twice_is_rejected() {
        let book = PositionBook::new();
        let index = book.open(Side::Sell, Some(10.0), 3.0);
        assert_eq!(book.close(index, 9.0), Some(3.0));
        assert_eq!(book.close(index, 8.0), None);
        assert_eq!(book.close(99, 8.0), None);
    }
}
