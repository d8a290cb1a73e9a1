//! Selection records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed recommendation event.
///
/// Selections form an append-only log: they are never updated, and the
/// repository contract offers no delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Top-ranked label chosen by the scoring heuristic.
    pub algorithm: String,
    /// Raw prompt text, not deduplicated.
    pub prompt: String,
    /// Insertion time (UTC).
    pub created_at: DateTime<Utc>,
}

impl Selection {
    /// Creates a selection stamped with the current time.
    #[must_use]
    pub fn new(algorithm: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::at(algorithm, prompt, Utc::now())
    }

    /// Creates a selection with an explicit timestamp.
    #[must_use]
    pub fn at(
        algorithm: impl Into<String>,
        prompt: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            prompt: prompt.into(),
            created_at,
        }
    }
}
