use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::instrument::DataKind;
use super::types::{ProviderId, Symbol};

/// Outcome of a single provider call attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "status", content = "detail")]
pub enum AttemptOutcome {
    Success { rows: usize },
    NotFound,
    NoData,
    Rejected(String),
    Failed(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Provider-quality log entry, one per call attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttemptLog {
    pub provider: ProviderId,
    pub symbol: Symbol,
    pub kind: DataKind,
    pub outcome: AttemptOutcome,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub attempted_at: DateTime<Utc>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
