//! Business logic services.
//!
//! Services sit on top of the repository contracts and never touch a
//! storage engine directly.

mod classifier;
mod recommendation;

pub use classifier::classify_algorithm;
pub use recommendation::{
    FixedScorer, Recommendation, RecommendationService, ScoredLabel, Scorer,
};
