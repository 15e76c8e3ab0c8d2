//! Character-frequency cosine similarity, the partial-credit signal for
//! outputs that are not exact matches.

use std::collections::HashMap;

use crate::text::{regularize, strip_whitespace};

/// Similarity between two raw texts on the 0-100 scale. Both sides are
/// regularized and whitespace-stripped first, so a presentation error still
/// scores 100.
pub fn score(a: &str, b: &str) -> f64 {
    let a = strip_whitespace(&regularize(a));
    let b = strip_whitespace(&regularize(b));
    cosine(&a, &b) * 100.0
}

fn term_frequency(s: &str) -> HashMap<char, u64> {
    let mut freq = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    freq
}

/// dot(A, B) / (|A| * |B|) over the unioned character alphabet; 0 when
/// either vector has zero magnitude.
fn cosine(a: &str, b: &str) -> f64 {
    let freq_a = term_frequency(a);
    let freq_b = term_frequency(b);

    let mut dot = 0.0;
    let mut magnitude_a = 0.0;
    let mut magnitude_b = 0.0;

    for (c, &count_a) in &freq_a {
        let count_a = count_a as f64;
        magnitude_a += count_a * count_a;
        if let Some(&count_b) = freq_b.get(c) {
            dot += count_a * count_b as f64;
        }
    }
    for &count_b in freq_b.values() {
        let count_b = count_b as f64;
        magnitude_b += count_b * count_b;
    }

    let magnitude_a = magnitude_a.sqrt();
    let magnitude_b = magnitude_b.sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }
    dot / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_scores_100() {
        let text = "1 2 3\n4 5 6\n";
        assert!((score(text, text) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric() {
        let a = "abcabc";
        let b = "abd";
        assert!((score(a, b) - score(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_alphabets_score_0() {
        assert_eq!(score("aaa", "bbb"), 0.0);
    }

    #[test]
    fn test_zero_magnitude_guards() {
        assert_eq!(score("", "abc"), 0.0);
        assert_eq!(score("abc", ""), 0.0);
        assert_eq!(score("", ""), 0.0);
        // Whitespace-only collapses to an empty vector.
        assert_eq!(score(" \n\t ", "abc"), 0.0);
    }

    #[test]
    fn test_whitespace_and_case_insensitive() {
        // A presentation error still gets full partial credit.
        assert!((score("Hello World\n", "hello\tworld") - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap_between_bounds() {
        let s = score("aab", "aac");
        assert!(s > 0.0 && s < 100.0);
    }
}
