use std::borrow::Cow;
use std::sync::Arc;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Instrument symbol as stored in the asset roster
pub type Symbol = Arc<str>;

/// Raw vendor record before normalization
pub type RawRecord = serde_json::Map<String, serde_json::Value>;
