//! # Algoledger
//!
//! Polyglot persistence for algorithm recommendation history.
//!
//! Every time a scoring heuristic recommends an algorithm for a free-text
//! prompt, algoledger records a [`Selection`]. The first time a distinct
//! (normalized) prompt is seen it also records a [`UniqueRequest`] tagged with
//! a coarse algorithm category. Reporting callers read aggregate and detail
//! views back through the same two contracts.
//!
//! ## Features
//!
//! - Two repository contracts: [`SelectionRepository`] and [`UniqueRequestRepository`]
//! - Six interchangeable adapters: in-process, `MongoDB`, PostgreSQL, Redis,
//!   Neo4j and Cassandra (network adapters behind Cargo features)
//! - A bounded blocking pool bridging the synchronous Cassandra driver into async
//! - A backend selector that hands out one adapter instance per process
//!
//! ## Example
//!
//! ```rust,ignore
//! use algoledger::{BackendSelector, LedgerConfig};
//!
//! let selector = BackendSelector::new(LedgerConfig::load_default());
//! let selections = selector.selections().await?;
//! selections.add_selection("K-Means", "cluster my customers").await?;
//! assert_eq!(selections.total().await?, 1);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{BackendType, LedgerConfig};
pub use models::{
    AlgorithmGroup, AlgorithmType, Selection, SelectionDetail, TypeCount, UniqueRequest,
    UsageCount,
};
pub use services::{RecommendationService, classify_algorithm};
pub use storage::{
    BackendSelector, BlockingPool, BulkheadConfig, InMemoryStore, SelectionRepository,
    UniqueRequestRepository, normalize_prompt,
};

/// Error type for algoledger operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Unknown backend name, malformed configuration |
/// | `OperationFailed` | A storage engine reported an error (connection, timeout, query) |
/// | `FeatureNotEnabled` | An adapter was requested without its Cargo feature |
/// | `BulkheadFull` | The blocking pool could not accept work before its submit timeout |
/// | `WorkerLost` | A blocking job panicked or its worker went away before replying |
///
/// A duplicate unique-request insert is never an error; adapters return
/// `Ok(false)` for it.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    ///
    /// The `cause` carries the driver's message unchanged so callers can
    /// decide whether to retry.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),

    /// The blocking pool queue stayed full for the whole submit timeout.
    #[error("blocking pool '{pool}' full: submit timed out after {timeout_ms}ms")]
    BulkheadFull {
        /// Pool name.
        pool: &'static str,
        /// Submit timeout that elapsed.
        timeout_ms: u64,
    },

    /// A blocking job panicked or its worker stopped before replying.
    #[error("blocking worker lost: {0}")]
    WorkerLost(String),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for algoledger operations.
pub type Result<T> = std::result::Result<T, Error>;
