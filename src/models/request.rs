//! Unique request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First sighting of a distinct normalized prompt.
///
/// The normalized prompt is not part of the record. Adapters persist it only
/// as a uniqueness key and recompute it for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueRequest {
    /// Original prompt text, preserved for display.
    pub prompt: String,
    /// Coarse category assigned by the classifier.
    pub algorithm_type: String,
    /// Insertion time (UTC).
    pub created_at: DateTime<Utc>,
}

impl UniqueRequest {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(prompt: impl Into<String>, algorithm_type: impl Into<String>) -> Self {
        Self::at(prompt, algorithm_type, Utc::now())
    }

    /// Creates a request with an explicit timestamp.
    #[must_use]
    pub fn at(
        prompt: impl Into<String>,
        algorithm_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            algorithm_type: algorithm_type.into(),
            created_at,
        }
    }

    /// Orders requests newest first. Equal timestamps keep their input order,
    /// so callers pass newest inserts first.
    pub fn sort_newest_first(requests: &mut [Self]) {
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}
