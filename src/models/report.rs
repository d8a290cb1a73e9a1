//! Report shapes and their canonical ordering.
//!
//! Every adapter must return byte-identical ordering for the same data, even
//! when one engine groups natively and another folds a full scan client-side.
//! The rules live here so both paths sort the same way:
//!
//! | Result | Order |
//! |--------|-------|
//! | [`UsageCount`] | count desc, algorithm asc |
//! | [`AlgorithmGroup`] | count desc, algorithm asc; items `created_at` desc |
//! | [`TypeCount`] | count desc, algorithm type asc |
//!
//! Name comparisons are byte-wise, so `"Banana"` ranks before `"apple"`.

use super::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of selections recorded for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCount {
    /// Algorithm label.
    pub algorithm: String,
    /// Number of selections.
    pub count: u64,
}

impl UsageCount {
    /// Creates a usage count.
    #[must_use]
    pub fn new(algorithm: impl Into<String>, count: u64) -> Self {
        Self {
            algorithm: algorithm.into(),
            count,
        }
    }

    /// Sorts counts by count desc, then algorithm asc.
    pub fn rank(counts: &mut [Self]) {
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.algorithm.cmp(&b.algorithm)));
    }

    /// Folds selections into ranked usage counts.
    #[must_use]
    pub fn tally<'a>(selections: impl IntoIterator<Item = &'a Selection>) -> Vec<Self> {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for selection in selections {
            *counts.entry(selection.algorithm.as_str()).or_default() += 1;
        }
        let mut out: Vec<Self> = counts
            .into_iter()
            .map(|(algorithm, count)| Self::new(algorithm, count))
            .collect();
        Self::rank(&mut out);
        out
    }
}

/// One selection inside a detailed report group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDetail {
    /// Algorithm label.
    pub algorithm: String,
    /// Raw prompt text.
    pub prompt: String,
    /// Insertion time (UTC).
    pub created_at: DateTime<Utc>,
}

impl From<Selection> for SelectionDetail {
    fn from(selection: Selection) -> Self {
        Self {
            algorithm: selection.algorithm,
            prompt: selection.prompt,
            created_at: selection.created_at,
        }
    }
}

/// All selections for one algorithm, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmGroup {
    /// Algorithm label.
    pub algorithm: String,
    /// Number of items in the group.
    pub count: u64,
    /// Selections, ordered by `created_at` desc.
    pub items: Vec<SelectionDetail>,
}

impl AlgorithmGroup {
    /// Sorts groups by count desc, then algorithm asc.
    pub fn rank(groups: &mut [Self]) {
        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.algorithm.cmp(&b.algorithm)));
    }

    /// Groups selections by algorithm.
    ///
    /// Items are ordered newest first; selections sharing a timestamp keep
    /// their input order. Groups are ranked with [`AlgorithmGroup::rank`].
    #[must_use]
    pub fn group(mut selections: Vec<Selection>) -> Vec<Self> {
        selections.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Self> = Vec::new();
        for selection in selections {
            let slot = match index.get(&selection.algorithm) {
                Some(&slot) => slot,
                None => {
                    index.insert(selection.algorithm.clone(), groups.len());
                    groups.push(Self {
                        algorithm: selection.algorithm.clone(),
                        count: 0,
                        items: Vec::new(),
                    });
                    groups.len() - 1
                },
            };
            let group = &mut groups[slot];
            group.count += 1;
            group.items.push(selection.into());
        }

        Self::rank(&mut groups);
        groups
    }
}

/// Number of unique requests in one algorithm category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    /// Algorithm category.
    pub algorithm_type: String,
    /// Number of unique requests.
    pub count: u64,
}

impl TypeCount {
    /// Creates a type count.
    #[must_use]
    pub fn new(algorithm_type: impl Into<String>, count: u64) -> Self {
        Self {
            algorithm_type: algorithm_type.into(),
            count,
        }
    }

    /// Sorts counts by count desc, then type asc.
    pub fn rank(counts: &mut [Self]) {
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.algorithm_type.cmp(&b.algorithm_type))
        });
    }

    /// Folds category labels into ranked counts.
    #[must_use]
    pub fn tally<'a>(types: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for algorithm_type in types {
            *counts.entry(algorithm_type).or_default() += 1;
        }
        let mut out: Vec<Self> = counts
            .into_iter()
            .map(|(algorithm_type, count)| Self::new(algorithm_type, count))
            .collect();
        Self::rank(&mut out);
        out
    }
}
