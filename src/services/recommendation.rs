//! Recommendation recording.
//!
//! Scoring itself lives outside this crate behind [`Scorer`]. The service
//! persists the outcome: the top-ranked label becomes a selection, and the
//! prompt becomes a unique request tagged with the label's category.

use crate::services::classify_algorithm;
use crate::storage::{SelectionRepository, UniqueRequestRepository};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One candidate algorithm and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    /// Algorithm label.
    pub label: String,
    /// Heuristic score; higher is better.
    pub score: f64,
}

impl ScoredLabel {
    /// Creates a scored label.
    #[must_use]
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Ranks candidate algorithms for a prompt.
pub trait Scorer: Send + Sync {
    /// Returns candidates ordered best first. May be empty.
    fn score(&self, prompt: &str) -> Vec<ScoredLabel>;
}

/// Scorer that returns the same list for every prompt.
#[derive(Debug, Clone, Default)]
pub struct FixedScorer {
    labels: Vec<ScoredLabel>,
}

impl FixedScorer {
    /// Creates a scorer returning `labels` as given.
    #[must_use]
    pub const fn new(labels: Vec<ScoredLabel>) -> Self {
        Self { labels }
    }

    /// Creates a scorer that always picks one label.
    #[must_use]
    pub fn single(label: impl Into<String>) -> Self {
        Self::new(vec![ScoredLabel::new(label, 1.0)])
    }
}

impl Scorer for FixedScorer {
    fn score(&self, _prompt: &str) -> Vec<ScoredLabel> {
        self.labels.clone()
    }
}

/// Outcome of [`RecommendationService::recommend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Candidates, best first.
    pub items: Vec<ScoredLabel>,
    /// Whether the prompt had not been seen before (after normalization).
    pub new_request: bool,
}

/// Scores prompts and records the result.
pub struct RecommendationService {
    scorer: Arc<dyn Scorer>,
    selections: Arc<dyn SelectionRepository>,
    requests: Arc<dyn UniqueRequestRepository>,
}

impl RecommendationService {
    /// Creates a service over the given scorer and repositories.
    #[must_use]
    pub fn new(
        scorer: Arc<dyn Scorer>,
        selections: Arc<dyn SelectionRepository>,
        requests: Arc<dyn UniqueRequestRepository>,
    ) -> Self {
        Self {
            scorer,
            selections,
            requests,
        }
    }

    /// Scores a prompt and records the top candidate.
    ///
    /// Records nothing when the scorer returns no candidates. The selection
    /// is written before the unique request; if the second write fails the
    /// selection stays recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if either write fails.
    #[tracing::instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn recommend(&self, prompt: &str) -> Result<Recommendation> {
        let start = Instant::now();
        let items = self.scorer.score(prompt);

        let Some(top) = items.first() else {
            tracing::debug!("Scorer returned no candidates; nothing recorded");
            return Ok(Recommendation {
                items,
                new_request: false,
            });
        };

        self.selections.add_selection(&top.label, prompt).await?;
        metrics::counter!("algorithm_top_selections_total", "algorithm" => top.label.clone())
            .increment(1);

        let category = classify_algorithm(&top.label);
        let new_request = self
            .requests
            .add_unique_request(prompt, category.as_str())
            .await?;

        metrics::histogram!("recommendation_record_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            algorithm = %top.label,
            score = top.score,
            algorithm_type = %category,
            new_request,
            "Recorded recommendation"
        );

        Ok(Recommendation { items, new_request })
    }
}
