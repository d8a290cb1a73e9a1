//! Data models for algoledger.
//!
//! Plain record shapes shared by every storage adapter, plus the canonical
//! ordering rules for report results.

mod algorithm_type;
mod report;
mod request;
mod selection;

pub use algorithm_type::AlgorithmType;
pub use report::{AlgorithmGroup, SelectionDetail, TypeCount, UsageCount};
pub use request::UniqueRequest;
pub use selection::Selection;
