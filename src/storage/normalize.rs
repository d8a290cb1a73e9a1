//! Prompt normalization for deduplication.
//!
//! Every adapter derives its uniqueness key from [`normalize_prompt`], so two
//! backends always agree on whether a prompt was seen before.

use sha2::{Digest, Sha256};

/// Canonicalizes prompt text into its dedup key.
///
/// Lowercases, collapses any run of whitespace to a single space and trims.
/// Total over every input, including the empty string.
///
/// ```rust
/// use algoledger::normalize_prompt;
///
/// assert_eq!(normalize_prompt("  Classify \t  X\n"), "classify x");
/// assert_eq!(normalize_prompt(""), "");
/// ```
#[must_use]
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the lowercase hex SHA-256 of the normalized prompt.
///
/// Used as a fixed-length key by stores without secondary indexes.
///
/// ```rust
/// use algoledger::storage::prompt_key;
///
/// assert_eq!(prompt_key("Classify X"), prompt_key("classify   x"));
/// assert_eq!(prompt_key("anything").len(), 64);
/// ```
#[must_use]
pub fn prompt_key(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hex::encode(hasher.finalize())
}
