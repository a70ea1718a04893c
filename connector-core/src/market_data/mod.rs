//! Market data state shared between the stream and the REST facade

pub mod price_cache;

pub use price_cache::PriceCache;
