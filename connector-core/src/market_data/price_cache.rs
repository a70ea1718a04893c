//! Last known top of book per symbol

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::exchanges::{BidAsk, Symbol};

/// Shared best bid/ask cache.
///
/// Each entry is replaced as one `BidAsk` value under the shard lock, so readers never see a
/// bid from one update paired with an ask from another.
#[derive(Default)]
pub struct PriceCache {
    prices: DashMap<Symbol, BidAsk>,
    updates: AtomicU64,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the entry for `symbol`
    pub fn update(&self, symbol: &str, bid: f64, ask: f64) -> BidAsk {
        let quote = BidAsk::new(bid, ask);

        match self.prices.get_mut(symbol) {
            Some(mut entry) => *entry = quote,
            None => {
                self.prices.insert(Symbol::new(symbol), quote);
            }
        }

        self.updates.fetch_add(1, Ordering::Relaxed);
        quote
    }

    pub fn get(&self, symbol: &str) -> Option<BidAsk> {
        self.prices.get(symbol).map(|entry| *entry)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.prices.contains_key(symbol)
    }

    /// Copy of every entry, ordered by symbol
    pub fn snapshot(&self) -> Vec<(Symbol, BidAsk)> {
        let mut entries: Vec<_> = self
            .prices
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}
