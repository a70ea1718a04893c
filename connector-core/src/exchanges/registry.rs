//! Process-wide instrument registry

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::models::Instrument;
use super::types::Symbol;

/// Instruments keyed by symbol, replaced wholesale on refresh
#[derive(Default)]
pub struct InstrumentRegistry {
    instruments: RwLock<Arc<BTreeMap<Symbol, Instrument>>>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, instruments: Vec<Instrument>) {
        let map = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect::<BTreeMap<_, _>>();
        *self.instruments.write() = Arc::new(map);
    }

    pub fn get(&self, symbol: &str) -> Option<Instrument> {
        self.instruments.read().get(symbol).cloned()
    }

    /// All instruments, ascending by symbol
    pub fn all(&self) -> Vec<Instrument> {
        self.instruments.read().values().cloned().collect()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.instruments.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::types::TradingMode;

    fn instrument(symbol: &str) -> Instrument {
        Instrument {
            symbol: Symbol::new(symbol),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            price_decimals: 2,
            quantity_decimals: 3,
            tick_size: 0.01,
            lot_size: 0.001,
            mode: TradingMode::Futures,
        }
    }

    #[test]
    fn test_replace_is_wholesale() {
        let registry = InstrumentRegistry::new();
        registry.replace(vec![instrument("ETHUSDT"), instrument("BTCUSDT")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.all()[0].symbol.as_str(), "BTCUSDT");

        registry.replace(vec![instrument("SOLUSDT")]);
        assert!(registry.get("BTCUSDT").is_none());
        assert_eq!(registry.symbols(), vec![Symbol::new("SOLUSDT")]);
    }
}
