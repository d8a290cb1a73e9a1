//! Contract scenarios shared by the in-process and network backend tests.
//!
//! Every scenario tags its data with a fresh UUID and asserts on deltas or
//! on its own labels, so it passes against a long-lived server that already
//! holds rows from earlier runs.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use algoledger::{SelectionRepository, UniqueRequestRepository, UsageCount};
use std::sync::Arc;
use uuid::Uuid;

/// A label unique to this test run.
pub fn tag(name: &str) -> String {
    format!("{name}-{}", Uuid::new_v4().simple())
}

fn count_for(counts: &[UsageCount], algorithm: &str) -> u64 {
    counts
        .iter()
        .find(|c| c.algorithm == algorithm)
        .map_or(0, |c| c.count)
}

/// `total` grows by exactly the number of adds and `usage_counts` agrees.
pub async fn total_tracks_adds(repo: Arc<dyn SelectionRepository>) {
    let a = tag("A");
    let b = tag("B");
    let before = repo.total().await.unwrap();

    repo.add_selection(&a, "p1").await.unwrap();
    repo.add_selection(&b, "p2").await.unwrap();
    repo.add_selection(&a, "p3").await.unwrap();

    assert_eq!(repo.total().await.unwrap(), before + 3);

    let counts = repo.usage_counts().await.unwrap();
    assert_eq!(count_for(&counts, &a), 2);
    assert_eq!(count_for(&counts, &b), 1);
    let a_pos = counts.iter().position(|c| c.algorithm == a).unwrap();
    let b_pos = counts.iter().position(|c| c.algorithm == b).unwrap();
    assert!(a_pos < b_pos, "higher count must rank first");
}

/// `usage_counts` sums to `total` and is sorted count desc, algorithm asc.
pub async fn usage_counts_are_ranked(repo: Arc<dyn SelectionRepository>) {
    let x = tag("x");
    let y = tag("y");
    for algorithm in [&y, &x, &y, &x] {
        repo.add_selection(algorithm, "tie").await.unwrap();
    }

    let counts = repo.usage_counts().await.unwrap();
    let total = repo.total().await.unwrap();
    assert_eq!(counts.iter().map(|c| c.count).sum::<u64>(), total);
    for pair in counts.windows(2) {
        assert!(
            pair[0].count > pair[1].count
                || (pair[0].count == pair[1].count && pair[0].algorithm <= pair[1].algorithm),
            "{:?} ranked before {:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Groups carry their items newest first; groups are ranked like usage counts.
pub async fn details_are_ordered(repo: Arc<dyn SelectionRepository>) {
    let label = tag("detail");
    for prompt in ["first", "second", "third"] {
        repo.add_selection(&label, prompt).await.unwrap();
        // Millisecond-resolution engines need distinct timestamps.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let groups = repo.detailed_by_algorithm().await.unwrap();
    let group = groups.iter().find(|g| g.algorithm == label).unwrap();
    assert_eq!(group.count, 3);
    let prompts: Vec<&str> = group.items.iter().map(|i| i.prompt.as_str()).collect();
    assert_eq!(prompts, ["third", "second", "first"]);

    for pair in groups.windows(2) {
        assert!(
            pair[0].count > pair[1].count
                || (pair[0].count == pair[1].count && pair[0].algorithm <= pair[1].algorithm)
        );
    }
}

/// Equal counts break ties byte-wise: uppercase sorts before lowercase.
pub async fn tied_usage_ranks_bytewise(repo: Arc<dyn SelectionRepository>) {
    let lower = tag("apple");
    let upper = tag("Banana");
    repo.add_selection(&lower, "tie").await.unwrap();
    repo.add_selection(&upper, "tie").await.unwrap();

    let counts = repo.usage_counts().await.unwrap();
    let lower_pos = counts.iter().position(|c| c.algorithm == lower).unwrap();
    let upper_pos = counts.iter().position(|c| c.algorithm == upper).unwrap();
    assert_eq!(counts[lower_pos].count, counts[upper_pos].count);
    assert!(upper_pos < lower_pos, "{upper} must rank before {lower}");

    let groups = repo.detailed_by_algorithm().await.unwrap();
    let lower_pos = groups.iter().position(|g| g.algorithm == lower).unwrap();
    let upper_pos = groups.iter().position(|g| g.algorithm == upper).unwrap();
    assert!(upper_pos < lower_pos, "{upper} group must rank before {lower}");
}

/// Category ties break byte-wise too.
pub async fn tied_types_rank_bytewise(repo: Arc<dyn UniqueRequestRepository>) {
    let lower = tag("nlp");
    let upper = tag("Vision");
    repo.add_unique_request(&tag("tokenize text"), &lower).await.unwrap();
    repo.add_unique_request(&tag("label images"), &upper).await.unwrap();

    let counts = repo.count_by_type().await.unwrap();
    let lower_pos = counts.iter().position(|c| c.algorithm_type == lower).unwrap();
    let upper_pos = counts.iter().position(|c| c.algorithm_type == upper).unwrap();
    assert_eq!(counts[lower_pos].count, 1);
    assert_eq!(counts[upper_pos].count, 1);
    assert!(upper_pos < lower_pos, "{upper} must rank before {lower}");
}

/// A prompt differing only in case and spacing is a duplicate.
pub async fn duplicate_prompt_is_rejected(repo: Arc<dyn UniqueRequestRepository>) {
    let id = Uuid::new_v4().simple().to_string();
    let category = tag("Classification");

    assert!(
        repo.add_unique_request(&format!("Classify X {id}"), &category)
            .await
            .unwrap()
    );
    assert!(
        !repo
            .add_unique_request(&format!("  classify   x {}", id.to_uppercase()), &category)
            .await
            .unwrap()
    );

    let all = repo.get_all_requests().await.unwrap();
    assert_eq!(all.iter().filter(|r| r.prompt.contains(&id)).count(), 1);

    let by_type = repo.get_requests_by_type(&category).await.unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].prompt, format!("Classify X {id}"));

    let counts = repo.count_by_type().await.unwrap();
    let mine: Vec<_> = counts.iter().filter(|c| c.algorithm_type == category).collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].count, 1);
}

/// Requests come back newest first, and the type filter is exact.
pub async fn requests_are_newest_first(repo: Arc<dyn UniqueRequestRepository>) {
    let category = tag("Clustering");
    let other = tag("Regression");
    for n in 0..3 {
        repo.add_unique_request(&tag(&format!("prompt {n}")), &category)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    repo.add_unique_request(&tag("elsewhere"), &other).await.unwrap();

    let requests = repo.get_requests_by_type(&category).await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.algorithm_type == category));
    assert!(requests[0].prompt.starts_with("prompt 2"));
    for pair in requests.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
    }
}

/// Concurrent appends are all counted.
pub async fn concurrent_adds_are_not_lost(repo: Arc<dyn SelectionRepository>, n: usize) {
    let label = tag("concurrent");
    let tasks: Vec<_> = (0..n)
        .map(|i| {
            let repo = Arc::clone(&repo);
            let label = label.clone();
            tokio::spawn(async move { repo.add_selection(&label, &format!("p{i}")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let counts = repo.usage_counts().await.unwrap();
    assert_eq!(count_for(&counts, &label), n as u64);
}

/// Concurrent inserts of one prompt create exactly one record.
pub async fn concurrent_duplicates_create_one(repo: Arc<dyn UniqueRequestRepository>, n: usize) {
    let prompt = tag("Race prompt");
    let category = tag("Race");
    let tasks: Vec<_> = (0..n)
        .map(|i| {
            let repo = Arc::clone(&repo);
            // Vary spacing so every caller sends a different raw string.
            let prompt = format!("{prompt}{}", " ".repeat(i % 3));
            let category = category.clone();
            tokio::spawn(async move { repo.add_unique_request(&prompt, &category).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(repo.get_requests_by_type(&category).await.unwrap().len(), 1);
}
