//! Strategy registry with snapshot iteration

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::StrategyHandler;
use crate::exchanges::Symbol;

/// Opaque identifier of a registered strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyHandle(u64);

impl fmt::Display for StrategyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy#{}", self.0)
    }
}

struct Entry {
    handle: StrategyHandle,
    symbol: Symbol,
    strategy: Weak<dyn StrategyHandler>,
}

/// Immutable view of the registry taken at one point in time
#[derive(Clone)]
pub struct StrategySnapshot {
    entries: Arc<Vec<Entry>>,
}

impl StrategySnapshot {
    /// Live strategies bound to `symbol`
    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = Arc<dyn StrategyHandler>> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.symbol.as_str() == symbol)
            .filter_map(|e| e.strategy.upgrade())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registration and removal swap in a new entry list, so a dispatch pass holding a
/// snapshot is never affected by either.
pub struct StrategyRegistry {
    entries: RwLock<Arc<Vec<Entry>>>,
    next_handle: AtomicU64,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn register<S: StrategyHandler + 'static>(&self, strategy: &Arc<S>) -> StrategyHandle {
        let handle = StrategyHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let weak = Arc::downgrade(strategy);
        let weak: Weak<dyn StrategyHandler> = weak;
        let symbol = strategy.symbol().clone();

        let mut entries = self.entries.write();
        let mut next = Self::live_entries(&entries);
        next.push(Entry {
            handle,
            symbol: symbol.clone(),
            strategy: weak,
        });
        *entries = Arc::new(next);

        debug!("Registered {} on {}", handle, symbol);
        handle
    }

    pub fn deregister(&self, handle: StrategyHandle) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.iter().any(|e| e.handle == handle);
        let next: Vec<Entry> = Self::live_entries(&entries)
            .into_iter()
            .filter(|e| e.handle != handle)
            .collect();
        *entries = Arc::new(next);
        removed
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            entries: self.entries.read().clone(),
        }
    }

    /// Registered entries, including ones whose strategy was dropped since the last change
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn live_entries(entries: &[Entry]) -> Vec<Entry> {
        entries
            .iter()
            .filter(|e| e.strategy.strong_count() > 0)
            .map(|e| Entry {
                handle: e.handle,
                symbol: e.symbol.clone(),
                strategy: e.strategy.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{PositionBook, TickEvaluation};

    struct Dummy {
        symbol: Symbol,
        positions: PositionBook,
    }

    impl Dummy {
        fn new(symbol: &str) -> Arc<Self> {
            Arc::new(Self {
                symbol: Symbol::new(symbol),
                positions: PositionBook::new(),
            })
        }
    }

    impl StrategyHandler for Dummy {
        fn symbol(&self) -> &Symbol {
            &self.symbol
        }

        fn on_trade_tick(&self, _price: f64, _quantity: f64, _timestamp_ms: i64) -> TickEvaluation {
            TickEvaluation::Ignored
        }

        fn check_trade(&self, _evaluation: TickEvaluation) {}

        fn positions(&self) -> &PositionBook {
            &self.positions
        }
    }

    #[test]
    fn test_snapshot_survives_registry_changes() {
        let registry = StrategyRegistry::new();
        let btc = Dummy::new("BTCUSDT");
        let eth = Dummy::new("ETHUSDT");

        let btc_handle = registry.register(&btc);
        registry.register(&eth);
        let snapshot = registry.snapshot();

        assert!(registry.deregister(btc_handle));
        assert!(!registry.deregister(btc_handle));

        assert_eq!(snapshot.for_symbol("BTCUSDT").count(), 1);
        assert_eq!(registry.snapshot().for_symbol("BTCUSDT").count(), 0);
        assert_eq!(registry.snapshot().for_symbol("ETHUSDT").count(), 1);
    }

    #[test]
    fn test_dropped_strategies_are_skipped_and_pruned() {
        let registry = StrategyRegistry::new();
        let first = Dummy::new("BTCUSDT");
        registry.register(&first);
        drop(first);

        assert_eq!(registry.snapshot().for_symbol("BTCUSDT").count(), 0);
        assert_eq!(registry.len(), 1);

        let second = Dummy::new("BTCUSDT");
        let handle = registry.register(&second);
        assert_eq!(registry.len(), 1);
        assert_ne!(handle, StrategyHandle(1));
    }
}
