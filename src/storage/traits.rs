//! Repository contracts.
//!
//! Callers depend only on these two traits. Every adapter implements both
//! with identical observable semantics: same result shapes, same ordering
//! (see [`crate::models`] for the ranking rules), same duplicate handling.

use crate::Result;
use crate::models::{AlgorithmGroup, TypeCount, UniqueRequest, UsageCount};
use async_trait::async_trait;

/// Append-only log of recommendation events.
#[async_trait]
pub trait SelectionRepository: Send + Sync {
    /// Appends one selection stamped with the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects or cannot receive the write.
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()>;

    /// Counts selections per algorithm, ordered by count desc then algorithm asc.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn usage_counts(&self) -> Result<Vec<UsageCount>>;

    /// Returns the total number of selections.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn total(&self) -> Result<u64>;

    /// Returns every selection grouped by algorithm.
    ///
    /// Items within a group are newest first; groups are ordered by count desc
    /// then algorithm asc.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>>;
}

/// Deduplicated prompts, one record per normalized prompt.
#[async_trait]
pub trait UniqueRequestRepository: Send + Sync {
    /// Records the prompt if its normalized form has not been seen.
    ///
    /// Returns `true` when a record was created and `false` when one already
    /// existed. The duplicate case is an expected outcome, never an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend itself fails.
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool>;

    /// Returns requests of one category, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>>;

    /// Returns every request, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>>;

    /// Counts requests per category, ordered by count desc then type asc.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn count_by_type(&self) -> Result<Vec<TypeCount>>;
}
