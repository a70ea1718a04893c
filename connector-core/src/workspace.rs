//! Workspace persistence: the watchlist and saved strategy setups
//!
//! Tables are replaced wholesale on every save and read back whole.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WATCHLIST_TABLE: &str = "watchlist";
pub const STRATEGIES_TABLE: &str = "strategies";

const TABLES: [&str; 2] = [WATCHLIST_TABLE, STRATEGIES_TABLE];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Generic table storage
pub trait WorkspaceStore: Send + Sync {
    /// Replace the contents of `table` with `rows`
    fn save(&self, table: &str, rows: Vec<Value>) -> StoreResult<()>;

    /// Every row of `table`
    fn get(&self, table: &str) -> StoreResult<Vec<Value>>;
}

fn check_table(table: &str) -> StoreResult<()> {
    if TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

/// Watchlist row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistRow {
    pub symbol: String,
    pub exchange: String,
}

/// Saved strategy setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRow {
    pub strategy_type: String,
    pub contract: String,
    pub timeframe: String,
    pub balance_pct: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    #[serde(default)]
    pub extra_params: Map<String, Value>,
}

fn save_rows<T: Serialize>(store: &dyn WorkspaceStore, table: &str, rows: &[T]) -> StoreResult<()> {
    let values = rows
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    store.save(table, values)
}

fn load_rows<T: DeserializeOwned>(store: &dyn WorkspaceStore, table: &str) -> StoreResult<Vec<T>> {
    store
        .get(table)?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

pub fn save_watchlist(store: &dyn WorkspaceStore, rows: &[WatchlistRow]) -> StoreResult<()> {
    save_rows(store, WATCHLIST_TABLE, rows)
}

pub fn load_watchlist(store: &dyn WorkspaceStore) -> StoreResult<Vec<WatchlistRow>> {
    load_rows(store, WATCHLIST_TABLE)
}

pub fn save_strategies(store: &dyn WorkspaceStore, rows: &[StrategyRow]) -> StoreResult<()> {
    save_rows(store, STRATEGIES_TABLE, rows)
}

pub fn load_strategies(store: &dyn WorkspaceStore) -> StoreResult<Vec<StrategyRow>> {
    load_rows(store, STRATEGIES_TABLE)
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkspaceStore for MemoryStore {
    fn save(&self, table: &str, rows: Vec<Value>) -> StoreResult<()> {
        check_table(table)?;
        self.tables.lock().insert(table.to_string(), rows);
        Ok(())
    }

    fn get(&self, table: &str) -> StoreResult<Vec<Value>> {
        check_table(table)?;
        Ok(self.tables.lock().get(table).cloned().unwrap_or_default())
    }
}

/// Store backed by a single JSON document `{ "<table>": [rows...] }`
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> StoreResult<BTreeMap<String, Vec<Value>>> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl WorkspaceStore for JsonFileStore {
    fn save(&self, table: &str, rows: Vec<Value>) -> StoreResult<()> {
        check_table(table)?;
        let _guard = self.lock.lock();

        let mut document = self.read_document()?;
        document.insert(table.to_string(), rows);

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&document)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn get(&self, table: &str) -> StoreResult<Vec<Value>> {
        check_table(table)?;
        let _guard = self.lock.lock();
        Ok(self.read_document()?.remove(table).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "connector-workspace-{}-{}-{}.json",
            name,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn strategy_row() -> StrategyRow {
        let mut extra_params = Map::new();
        extra_params.insert("min_volume".to_string(), json!(1.5));
        StrategyRow {
            strategy_type: "Breakout".to_string(),
            contract: "BTCUSDT_binance_futures".to_string(),
            timeframe: "1m".to_string(),
            balance_pct: 5.0,
            take_profit: 2.0,
            stop_loss: 1.0,
            extra_params,
        }
    }

    #[test]
    fn test_memory_store_replaces_tables() {
        let store = MemoryStore::new();
        let first = vec![WatchlistRow { symbol: "BTCUSDT".into(), exchange: "Binance".into() }];
        let second = vec![WatchlistRow { symbol: "ETHUSDT".into(), exchange: "Binance".into() }];

        save_watchlist(&store, &first).unwrap();
        save_watchlist(&store, &second).unwrap();
        assert_eq!(load_watchlist(&store).unwrap(), second);
        assert!(load_strategies(&store).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.save("orders", vec![]), Err(StoreError::UnknownTable(_))));
        assert!(matches!(store.get("orders"), Err(StoreError::UnknownTable(_))));
    }

    #[test]
    fn test_json_file_store_persists_tables() {
        let path = temp_path("persist");
        let store = JsonFileStore::new(&path);
        assert!(load_watchlist(&store).unwrap().is_empty());

        save_strategies(&store, &[strategy_row()]).unwrap();
        save_watchlist(&store, &[WatchlistRow { symbol: "SOLUSDT".into(), exchange: "Binance".into() }]).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(load_strategies(&reopened).unwrap(), vec![strategy_row()]);
        assert_eq!(load_watchlist(&reopened).unwrap()[0].symbol, "SOLUSDT");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_serialization_error() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get(WATCHLIST_TABLE), Err(StoreError::Serialization(_))));

        fs::remove_file(&path).unwrap();
    }
}
