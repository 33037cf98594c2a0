//! pxcache core — cache-or-fetch access to market data.
//!
//! This crate contains:
//! - Query keys and deterministic cache filenames (`PxData_*`, `RefData*`)
//! - Wide result tables and the long → wide pivot
//! - The CSV flat-file cache
//! - The provider trait, a scoped session guard, and bundled providers
//!   (Yahoo chart API, on-disk replay extracts, synthetic)
//! - The Cached Query Accessor and reshape-on-read
//! - TOML configuration

pub mod accessor;
pub mod cache;
pub mod config;
pub mod error;
pub mod provider;
pub mod query;
pub mod reshape;
pub mod table;

pub use accessor::{CacheWarning, CachedQueryAccessor, Fetched, TableSource};
pub use cache::{write_price_records, write_reference_records, CacheEntry, CacheKind, CsvCache};
pub use config::{ProviderConfig, ProviderKind, PxConfig, QueryDefaults};
pub use error::DataError;
pub use provider::{
    HistoricalRow, MarketDataProvider, ProviderSession, ReferenceRow, ReplayProvider,
    SessionGuard, SyntheticProvider, YahooProvider,
};
pub use query::{Frequency, PriceQuery, RefCachePolicy, ReferenceQuery};
pub use reshape::{forward_fill, select_field, ColumnLevel, FieldFrame};
pub use table::{ColumnKey, PriceTable, ReferenceTable};
