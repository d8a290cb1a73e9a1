//! Algorithm label classification.
//!
//! Maps a free-form algorithm label ("Random Forest (Classification)",
//! "YOLOv8", ...) to a fixed [`AlgorithmType`]. Rules are checked in order
//! against the lowercased label and the first match wins, so more specific
//! rules sit above broader ones (object detection before generic vision).

use crate::models::AlgorithmType;

/// A classification rule: any needle matches unless an exclusion is present.
struct Rule {
    category: AlgorithmType,
    needles: &'static [&'static str],
    unless: Option<&'static str>,
}

const RULES: &[Rule] = &[
    Rule {
        category: AlgorithmType::Classification,
        needles: &["logistic", "svm", "random forest (classification)", "naive bayes", "knn"],
        unless: Some("regression"),
    },
    Rule {
        category: AlgorithmType::Regression,
        needles: &["linear regression", "random forest (regression)"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::Clustering,
        needles: &["k-means", "dbscan"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::DimensionalityReduction,
        needles: &["pca", "t-sne", "umap"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::TimeSeries,
        needles: &["arima", "prophet"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::SequenceModels,
        needles: &["lstm", "temporal cnn"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::Nlp,
        needles: &["bert", "roberta", "text"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::ComputerVisionDetection,
        needles: &["object detection", "yolo", "faster r-cnn"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::Vision,
        needles: &["cnn", "vision"],
        unless: Some("detection"),
    },
    Rule {
        category: AlgorithmType::AnomalyDetection,
        needles: &["anomaly", "isolation forest", "one-class"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::RecommenderSystems,
        needles: &["recsys", "recommend", "matrix factorization", "two-tower"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::ReinforcementLearning,
        needles: &["reinforcement", "dqn", "ppo"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::CausalInference,
        needles: &["causal", "dowhy", "ate"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::EnsembleMethods,
        needles: &["gradient boosting", "xgboost", "lightgbm", "catboost"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::Optimization,
        needles: &["optimization", "genetic", "simulated annealing"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::GraphAlgorithms,
        needles: &["graph", "gnn"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::TransferLearning,
        needles: &["transfer", "fine-tun", "pretrain"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::GenerativeModels,
        needles: &["gan", "vae", "generative", "diffusion"],
        unless: None,
    },
    Rule {
        category: AlgorithmType::NaturalLanguageGeneration,
        needles: &["generation", "summariz"],
        unless: None,
    },
];

impl Rule {
    fn matches(&self, label: &str) -> bool {
        self.needles.iter().any(|needle| label.contains(needle))
            && !self.unless.is_some_and(|excluded| label.contains(excluded))
    }
}

/// Classifies an algorithm label into its category.
///
/// Matching is case-insensitive substring search. Unrecognized labels map
/// to [`AlgorithmType::Other`].
///
/// # Example
///
/// ```
/// use algoledger::{AlgorithmType, classify_algorithm};
///
/// assert_eq!(classify_algorithm("K-Means"), AlgorithmType::Clustering);
/// assert_eq!(classify_algorithm("YOLOv8"), AlgorithmType::ComputerVisionDetection);
/// assert_eq!(classify_algorithm("Abacus"), AlgorithmType::Other);
/// ```
#[must_use]
pub fn classify_algorithm(label: &str) -> AlgorithmType {
    let label = label.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&label))
        .map_or(AlgorithmType::Other, |rule| rule.category)
}
