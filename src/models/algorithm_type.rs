//! Coarse algorithm categories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category attached to a unique request.
///
/// The set is fixed; `Other` is the catch-all for labels the classifier does
/// not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// Supervised classification.
    Classification,
    /// Supervised regression.
    Regression,
    /// Unsupervised clustering.
    Clustering,
    /// PCA, t-SNE, UMAP and friends.
    #[serde(rename = "Dimensionality Reduction")]
    DimensionalityReduction,
    /// Forecasting.
    #[serde(rename = "Time Series")]
    TimeSeries,
    /// Recurrent and temporal convolution models.
    #[serde(rename = "Sequence Models")]
    SequenceModels,
    /// Natural language processing.
    #[serde(rename = "NLP")]
    Nlp,
    /// Object detection.
    #[serde(rename = "Computer Vision Detection")]
    ComputerVisionDetection,
    /// Image classification.
    Vision,
    /// Outlier detection.
    #[serde(rename = "Anomaly Detection")]
    AnomalyDetection,
    /// Recommenders.
    #[serde(rename = "Recommender Systems")]
    RecommenderSystems,
    /// Reinforcement learning.
    #[serde(rename = "Reinforcement Learning")]
    ReinforcementLearning,
    /// Causal effect estimation.
    #[serde(rename = "Causal Inference")]
    CausalInference,
    /// Boosted and bagged ensembles.
    #[serde(rename = "Ensemble Methods")]
    EnsembleMethods,
    /// Search and optimization.
    Optimization,
    /// Graph learning.
    #[serde(rename = "Graph Algorithms")]
    GraphAlgorithms,
    /// Fine-tuning pretrained models.
    #[serde(rename = "Transfer Learning")]
    TransferLearning,
    /// GANs, VAEs, diffusion.
    #[serde(rename = "Generative Models")]
    GenerativeModels,
    /// Text generation and summarization.
    #[serde(rename = "Natural Language Generation")]
    NaturalLanguageGeneration,
    /// Anything unrecognized.
    #[default]
    Other,
}

impl AlgorithmType {
    /// Returns all categories, `Other` last.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Classification,
            Self::Regression,
            Self::Clustering,
            Self::DimensionalityReduction,
            Self::TimeSeries,
            Self::SequenceModels,
            Self::Nlp,
            Self::ComputerVisionDetection,
            Self::Vision,
            Self::AnomalyDetection,
            Self::RecommenderSystems,
            Self::ReinforcementLearning,
            Self::CausalInference,
            Self::EnsembleMethods,
            Self::Optimization,
            Self::GraphAlgorithms,
            Self::TransferLearning,
            Self::GenerativeModels,
            Self::NaturalLanguageGeneration,
            Self::Other,
        ]
    }

    /// Returns the display label stored with unique requests.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "Classification",
            Self::Regression => "Regression",
            Self::Clustering => "Clustering",
            Self::DimensionalityReduction => "Dimensionality Reduction",
            Self::TimeSeries => "Time Series",
            Self::SequenceModels => "Sequence Models",
            Self::Nlp => "NLP",
            Self::ComputerVisionDetection => "Computer Vision Detection",
            Self::Vision => "Vision",
            Self::AnomalyDetection => "Anomaly Detection",
            Self::RecommenderSystems => "Recommender Systems",
            Self::ReinforcementLearning => "Reinforcement Learning",
            Self::CausalInference => "Causal Inference",
            Self::EnsembleMethods => "Ensemble Methods",
            Self::Optimization => "Optimization",
            Self::GraphAlgorithms => "Graph Algorithms",
            Self::TransferLearning => "Transfer Learning",
            Self::GenerativeModels => "Generative Models",
            Self::NaturalLanguageGeneration => "Natural Language Generation",
            Self::Other => "Other",
        }
    }

    /// Parses a category label, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("nlp", Some(AlgorithmType::Nlp); "lowercase acronym")]
    #[test_case("  Time Series ", Some(AlgorithmType::TimeSeries); "padded")]
    #[test_case("ENSEMBLE METHODS", Some(AlgorithmType::EnsembleMethods); "uppercase")]
    #[test_case("astrology", None; "unknown")]
    fn test_parse(input: &str, expected: Option<AlgorithmType>) {
        assert_eq!(AlgorithmType::parse(input), expected);
    }

    #[test]
    fn test_as_str_roundtrips() {
        for t in AlgorithmType::all() {
            assert_eq!(AlgorithmType::parse(t.as_str()), Some(*t));
        }
    }

    #[test]
    fn test_serde_uses_display_label() {
        let json =
            serde_json::to_string(&AlgorithmType::DimensionalityReduction).unwrap_or_default();
        assert_eq!(json, "\"Dimensionality Reduction\"");
    }
}
