//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId, Symbol, RawRecord)
//! - `instrument` - Instrument categories, data kinds and bar intervals
//! - `request` - Per-call fetch requests (FetchRequest, DateRange)
//! - `bar` - Raw and normalized bar series, single-record payloads
//! - `quality` - Provider-quality log entries

mod bar;
mod instrument;
mod quality;
mod request;
mod types;

pub use bar::{FetchPayload, NormalizedBar, NormalizedBarSeries, ProfileRecord, RawSeries};
pub use instrument::{BarInterval, DataKind, InstrumentCategory};
pub use quality::{AttemptOutcome, ProviderAttemptLog};
pub use request::{DateRange, FetchRequest, DEFAULT_ROW_LIMIT};
pub use types::{ProviderId, RawRecord, Symbol};
