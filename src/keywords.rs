//! Fuzzy keyword extraction from recognized page text.

use std::collections::BTreeMap;

use crate::prelude::*;

/// The fixed vocabulary we search every page for.
pub const KEYWORDS: &[&str] = &[
    "Event Type Code",
    "Capacity",
    "Estimated Attendance",
    "Number of Gates",
    "Attendance Ratio",
    "Parking Capacity",
    "Nearby Public Transport",
    "Transport Modes Count",
    "Transport Max Capacity",
    "Transport Cancelled Count",
    "VIP Zones Flag",
    "Number of Restrooms",
    "Number of Food Courts",
    "Number of First Aid Stations",
    "Number of Emergency Exits",
    "Weather Severity",
    "Celebrity Arrival",
    "VIP Attending",
    "Road Closure Expected",
    "Congestion Risk",
];

/// Default similarity threshold, from 0 to 100.
pub const DEFAULT_THRESHOLD: f64 = 70.0;

/// Keywords found on a single page, mapped to the line that matched.
pub type PageKeywords = BTreeMap<String, String>;

/// Searches page text for a fixed list of keywords.
#[derive(Clone, Debug)]
pub struct KeywordMatcher {
    /// Keywords, paired with their lowercased form.
    keywords: Vec<(String, Vec<char>)>,
    /// Minimum [`partial_ratio`] score for a match. Inclusive.
    threshold: f64,
}

impl KeywordMatcher {
    /// Create a matcher for an arbitrary keyword list.
    pub fn new<I, S>(keywords: I, threshold: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords = keywords
            .into_iter()
            .map(|kw| {
                let kw = kw.into();
                let folded = kw.to_lowercase().chars().collect();
                (kw, folded)
            })
            .collect();
        Self {
            keywords,
            threshold,
        }
    }

    /// Create a matcher for [`KEYWORDS`].
    pub fn with_default_keywords(threshold: f64) -> Self {
        Self::new(KEYWORDS.iter().copied(), threshold)
    }

    /// Find keywords in one page of text.
    ///
    /// Every line is compared against every keyword. When several lines pass
    /// the threshold for the same keyword, the last one wins.
    pub fn match_page(&self, text: &str) -> PageKeywords {
        let mut found = PageKeywords::new();
        for line in text.split('\n') {
            let folded = line.to_lowercase().chars().collect::<Vec<_>>();
            for (keyword, keyword_folded) in &self.keywords {
                let score = partial_ratio(keyword_folded, &folded);
                if score >= self.threshold {
                    trace!(%keyword, %line, score, "Keyword matched");
                    found.insert(keyword.clone(), line.trim().to_owned());
                }
            }
        }
        found
    }
}

/// Similarity of the best-matching alignment of the shorter string inside the
/// longer one, from 0 to 100. Case-sensitive; callers fold case first.
///
/// Each candidate window of the longer string is scored with the normalized
/// indel similarity `2 * LCS / (len_a + len_b)`. Windows are every full-width
/// slice, plus the shorter slices hanging off either end, so a needle that is
/// only partly present at the start or end of the haystack still scores.
fn partial_ratio(a: &[char], b: &[char]) -> f64 {
    let (needle, haystack) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if needle.is_empty() {
        return if haystack.is_empty() { 100.0 } else { 0.0 };
    }
    let score = best_window_ratio(needle, haystack);
    if needle.len() == haystack.len() {
        score.max(best_window_ratio(haystack, needle))
    } else {
        score
    }
}

/// Best [`ratio`] of `needle` against windows of `haystack`. Requires
/// `needle.len() <= haystack.len()`.
fn best_window_ratio(needle: &[char], haystack: &[char]) -> f64 {
    let n = needle.len();
    let h = haystack.len();
    let mut best = 0.0f64;

    // Partial windows at the start.
    for end in 1..n {
        best = best.max(ratio(needle, &haystack[..end]));
    }
    // Full-width windows.
    for start in 0..=(h - n) {
        best = best.max(ratio(needle, &haystack[start..start + n]));
        if best >= 100.0 {
            return 100.0;
        }
    }
    // Partial windows at the end.
    for start in (h - n + 1)..h {
        best = best.max(ratio(needle, &haystack[start..]));
    }
    best
}

/// Normalized indel similarity, from 0 to 100.
fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    100.0 * (2 * longest_common_subsequence(a, b)) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// [`partial_ratio`] over strings.
    fn ratio_of(a: &str, b: &str) -> f64 {
        let a = a.chars().collect::<Vec<_>>();
        let b = b.chars().collect::<Vec<_>>();
        partial_ratio(&a, &b)
    }

    fn default_matcher() -> KeywordMatcher {
        KeywordMatcher::with_default_keywords(DEFAULT_THRESHOLD)
    }

    #[test]
    fn partial_ratio_scores_exact_substring_as_perfect() {
        assert_eq!(ratio_of("capacity", "capacity: 5000 persons"), 100.0);
        assert_eq!(ratio_of("capacity: 5000 persons", "capacity"), 100.0);
    }

    #[test]
    fn partial_ratio_handles_empty_strings() {
        assert_eq!(ratio_of("", ""), 100.0);
        assert_eq!(ratio_of("capacity", ""), 0.0);
        assert_eq!(ratio_of("", "capacity"), 0.0);
    }

    #[test]
    fn partial_ratio_tolerates_single_typo() {
        let score = ratio_of("vip attending", "vlp attending: yes");
        assert!(score > 90.0 && score < 100.0, "score was {score}");
    }

    #[test]
    fn partial_ratio_rewards_prefix_overlap() {
        // "capacity" is the tail of "parking capacity" and the head of the
        // line, so only a partial window lines up: 2 * 8 / (16 + 8).
        let score = ratio_of("parking capacity", "capacity: 5000 persons");
        assert!((score - 200.0 / 3.0).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn threshold_is_inclusive() {
        let line = "VlP Attending: Yes";
        let score = ratio_of("vip attending", &line.to_lowercase());
        let matcher = KeywordMatcher::new(["VIP Attending"], score);
        let found = matcher.match_page(line);
        assert_eq!(found.get("VIP Attending").map(String::as_str), Some(line));

        let strict = KeywordMatcher::new(["VIP Attending"], score + 0.001);
        assert!(strict.match_page(line).is_empty());
    }

    #[test]
    fn last_matching_line_wins() {
        let text = "Capacity: 100 persons\nnothing here\nCapacity: 200 persons\n";
        let found = KeywordMatcher::new(["Capacity"], DEFAULT_THRESHOLD).match_page(text);
        assert_eq!(found["Capacity"], "Capacity: 200 persons");
    }

    #[test]
    fn last_match_wins_even_when_earlier_line_scores_higher() {
        // The exact hit comes first, the typo second. Scan order decides.
        let text = "VIP Attending: No\nVlP Attending: Yes";
        let found = default_matcher().match_page(text);
        assert_eq!(found["VIP Attending"], "VlP Attending: Yes");
    }

    #[test]
    fn single_capacity_line_matches_only_capacity() {
        let found = default_matcher().match_page("Capacity: 5000 persons\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found["Capacity"], "Capacity: 5000 persons");
    }

    #[test]
    fn exact_and_near_miss_keywords_both_match() {
        let text = "Weather Severity: Low\n  VlP Attending: Yes  \n";
        let found = default_matcher().match_page(text);
        assert_eq!(found["Weather Severity"], "Weather Severity: Low");
        assert_eq!(found["VIP Attending"], "VlP Attending: Yes");
    }

    #[test]
    fn matching_is_case_insensitive_and_trims_lines() {
        let found = default_matcher().match_page("\t CONGESTION RISK: high \r\n");
        assert_eq!(found["Congestion Risk"], "CONGESTION RISK: high");
    }

    #[test]
    fn unrelated_text_matches_nothing() {
        let text = "Total revenue was high\nThe event starts at noon\n\n";
        assert!(default_matcher().match_page(text).is_empty());
    }
}
