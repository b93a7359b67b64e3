//! Token-set similarity scoring for phrase matching.
//!
//! Both sides are lowercased and tokenized; the score compares the shared
//! token set against each side's remainder, which makes the match tolerant
//! of filler words, reordering, and partial overlap ("hey assist, uh, open
//! notepad" still scores 100 against "hey assist").

use std::collections::BTreeSet;

/// Similarity score between two phrases, 0–100.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let intersection: BTreeSet<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: BTreeSet<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: BTreeSet<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let base = join(&intersection);
    let combined_a = join_two(&intersection, &only_a);
    let combined_b = join_two(&intersection, &only_b);

    let scores = [
        scaled_ratio(&base, &combined_a),
        scaled_ratio(&base, &combined_b),
        scaled_ratio(&combined_a, &combined_b),
    ];
    scores.into_iter().max().unwrap_or(0)
}

/// True when the phrases score at or above `threshold`.
pub fn phrases_match(a: &str, b: &str, threshold: u8) -> bool {
    token_set_ratio(a, b) >= threshold
}

/// True when `utterance` matches any of `phrases` at `threshold`.
pub fn matches_any(utterance: &str, phrases: &[String], threshold: u8) -> bool {
    phrases
        .iter()
        .any(|phrase| phrases_match(utterance, phrase, threshold))
}

fn tokenize(text: &str) -> BTreeSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn join(tokens: &BTreeSet<&str>) -> String {
    tokens.iter().copied().collect::<Vec<_>>().join(" ")
}

fn join_two(head: &BTreeSet<&str>, tail: &BTreeSet<&str>) -> String {
    let mut parts: Vec<&str> = head.iter().copied().collect();
    parts.extend(tail.iter().copied());
    parts.join(" ")
}

fn scaled_ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 0;
    }
    let ratio = strsim::normalized_levenshtein(a, b);
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}
