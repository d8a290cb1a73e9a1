//! CLI command implementations.
//!
//! Each command resolves repositories through a [`BackendSelector`] and
//! returns a serializable report; the binary prints it as pretty JSON.
//!
//! # Commands
//!
//! | Command | Output |
//! |---------|--------|
//! | `record <algorithm> <prompt>` | [`RecordOutput`] |
//! | `usage` | [`UsageReport`] |
//! | `details` | [`DetailReport`] |
//! | `requests [--type T]` | list of unique requests, newest first |
//! | `types` | counts per algorithm type |
//!
//! # Example Usage
//!
//! ```bash
//! algoledger record "K-Means" "segment customers by spend"
//! algoledger --backend postgres usage
//! BACKEND_TYPE=mongodb algoledger requests --type Clustering
//! ```

use crate::models::{AlgorithmGroup, AlgorithmType, TypeCount, UniqueRequest, UsageCount};
use crate::services::{FixedScorer, RecommendationService};
use crate::storage::BackendSelector;
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// Result of `record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutput {
    /// Recorded algorithm label.
    pub algorithm: String,
    /// Category the label was classified into.
    pub algorithm_type: String,
    /// Whether the prompt was new.
    pub new_request: bool,
}

/// Result of `usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    /// Total selections.
    pub total: u64,
    /// Per-algorithm counts.
    pub counts: Vec<UsageCount>,
}

/// Result of `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailReport {
    /// Total selections.
    pub total: u64,
    /// Selections grouped by algorithm.
    pub groups: Vec<AlgorithmGroup>,
}

/// Records one selection for `algorithm` and the prompt as a unique request.
///
/// # Errors
///
/// Returns an error if the backend is unavailable or a write fails.
pub async fn record(
    selector: &BackendSelector,
    algorithm: &str,
    prompt: &str,
) -> Result<RecordOutput> {
    if algorithm.trim().is_empty() {
        return Err(Error::InvalidInput("algorithm must not be empty".to_string()));
    }

    let service = RecommendationService::new(
        Arc::new(FixedScorer::single(algorithm)),
        selector.selections().await?,
        selector.unique_requests().await?,
    );
    let outcome = service.recommend(prompt).await?;

    Ok(RecordOutput {
        algorithm: algorithm.to_string(),
        algorithm_type: crate::classify_algorithm(algorithm).to_string(),
        new_request: outcome.new_request,
    })
}

/// Builds the usage report.
///
/// # Errors
///
/// Returns an error if the backend is unavailable or a read fails.
pub async fn usage(selector: &BackendSelector) -> Result<UsageReport> {
    let repo = selector.selections().await?;
    Ok(UsageReport {
        total: repo.total().await?,
        counts: repo.usage_counts().await?,
    })
}

/// Builds the detailed report.
///
/// # Errors
///
/// Returns an error if the backend is unavailable or a read fails.
pub async fn details(selector: &BackendSelector) -> Result<DetailReport> {
    let repo = selector.selections().await?;
    Ok(DetailReport {
        total: repo.total().await?,
        groups: repo.detailed_by_algorithm().await?,
    })
}

/// Lists unique requests, optionally for one algorithm type.
///
/// A type that names a known category in any letter case is matched by
/// its canonical label; anything else is matched verbatim.
///
/// # Errors
///
/// Returns an error if the backend is unavailable or a read fails.
pub async fn requests(
    selector: &BackendSelector,
    algorithm_type: Option<&str>,
) -> Result<Vec<UniqueRequest>> {
    let repo = selector.unique_requests().await?;
    match algorithm_type {
        Some(t) => {
            let label = AlgorithmType::parse(t).map_or(t, |known| known.as_str());
            repo.get_requests_by_type(label).await
        },
        None => repo.get_all_requests().await,
    }
}

/// Counts unique requests per algorithm type.
///
/// # Errors
///
/// Returns an error if the backend is unavailable or a read fails.
pub async fn types(selector: &BackendSelector) -> Result<Vec<TypeCount>> {
    selector.unique_requests().await?.count_by_type().await
}

/// Writes a value as pretty JSON followed by a newline.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)
        .map_err(|e| Error::operation("write_json", e))?;
    writeln!(writer).map_err(|e| Error::operation("write_json", e))
}
