//! Weighted signature similarity.
//!
//! A signature is `company|title|location`. Company and location are compared
//! with a normalized edit ratio; the title is compared on its sorted tokens so
//! word order does not matter but added or dropped words do.

use jobtrack_core::normalize::SIGNATURE_SEPARATOR;
use serde::Serialize;
use strsim::{generic_levenshtein, normalized_levenshtein};

pub const COMPANY_WEIGHT: f64 = 0.10;
pub const TITLE_WEIGHT: f64 = 0.60;
pub const LOCATION_WEIGHT: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { threshold: 0.90 }
    }
}

/// A candidate key paired with its similarity to the signature being matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch<K> {
    pub key: K,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentScores {
    pub company: f64,
    pub title: f64,
    pub location: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchExplanation {
    pub left: String,
    pub right: String,
    /// `None` when either signature is not a three-part signature.
    pub components: Option<ComponentScores>,
    pub combined: f64,
    pub threshold: f64,
    pub is_match: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchConfig,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        similarity(a, b)
    }

    pub fn is_match(&self, a: &str, b: &str) -> bool {
        similarity(a, b) >= self.config.threshold
    }

    /// Highest-scoring candidate at or above the threshold. Equal scores keep
    /// the smaller key.
    pub fn best_match<'c, K, I>(&self, signature: &str, candidates: I) -> Option<ScoredMatch<K>>
    where
        K: Ord,
        I: IntoIterator<Item = (K, &'c str)>,
    {
        let mut best: Option<ScoredMatch<K>> = None;
        for (key, candidate) in candidates {
            let score = similarity(signature, candidate);
            if score < self.config.threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => score > current.score || (score == current.score && key < current.key),
            };
            if better {
                best = Some(ScoredMatch { key, score });
            }
        }
        best
    }

    /// Every candidate at or above the threshold, best first.
    pub fn all_matches<'c, K, I>(
        &self,
        signature: &str,
        candidates: I,
        limit: Option<usize>,
    ) -> Vec<ScoredMatch<K>>
    where
        K: Ord,
        I: IntoIterator<Item = (K, &'c str)>,
    {
        let mut matches: Vec<ScoredMatch<K>> = candidates
            .into_iter()
            .map(|(key, candidate)| ScoredMatch {
                score: similarity(signature, candidate),
                key,
            })
            .filter(|m| m.score >= self.config.threshold)
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        matches
    }

    pub fn explain(&self, a: &str, b: &str) -> MatchExplanation {
        let threshold = self.config.threshold;
        let (components, combined) = match (split_signature(a), split_signature(b)) {
            (Some(left), Some(right)) => {
                let scores = component_scores(left, right);
                let combined = weighted(&scores);
                (Some(scores), combined)
            }
            _ => (None, sorted_token_ratio(a, b)),
        };
        let is_match = combined >= threshold;

        let reason = match &components {
            None => format!(
                "signatures are not company|title|location triples; whole-string token ratio {combined:.3}"
            ),
            Some(scores) if is_match => format!(
                "combined {combined:.3} >= {threshold:.2} (company {:.3}, title {:.3}, location {:.3})",
                scores.company, scores.title, scores.location
            ),
            Some(scores) => {
                let weakest = [
                    ("company", scores.company),
                    ("title", scores.title),
                    ("location", scores.location),
                ]
                .into_iter()
                .min_by(|x, y| x.1.total_cmp(&y.1))
                .map(|(name, _)| name)
                .unwrap_or("title");
                format!("combined {combined:.3} < {threshold:.2}; weakest component is {weakest}")
            }
        };

        MatchExplanation {
            left: a.to_string(),
            right: b.to_string(),
            components,
            combined,
            threshold,
            is_match,
            reason,
        }
    }
}

/// Combined weighted similarity of two signatures in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    match (split_signature(a), split_signature(b)) {
        (Some(left), Some(right)) => weighted(&component_scores(left, right)),
        _ => sorted_token_ratio(a, b),
    }
}

fn split_signature(signature: &str) -> Option<[&str; 3]> {
    let mut parts = signature.split(SIGNATURE_SEPARATOR);
    let company = parts.next()?;
    let title = parts.next()?;
    let location = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some([company, title, location])
}

fn component_scores(left: [&str; 3], right: [&str; 3]) -> ComponentScores {
    ComponentScores {
        company: normalized_levenshtein(left[0], right[0]),
        title: sorted_token_ratio(left[1], right[1]),
        location: normalized_levenshtein(left[2], right[2]),
    }
}

fn weighted(scores: &ComponentScores) -> f64 {
    let combined = COMPANY_WEIGHT * scores.company
        + TITLE_WEIGHT * scores.title
        + LOCATION_WEIGHT * scores.location;
    combined.clamp(0.0, 1.0)
}

/// Title tokens, lowercased and sorted. `+` and `#` stay part of a token so
/// "c++" and "c#" remain distinct words.
pub fn sorted_tokens(input: &str) -> Vec<String> {
    let mut tokens: Vec<String> = input
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    tokens.sort_unstable();
    tokens
}

pub fn sorted_token_key(input: &str) -> String {
    sorted_tokens(input).join(" ")
}

/// Mean of the character edit ratio and the whole-token edit ratio over the
/// sorted tokens. Word order never matters; swapping one word for another
/// costs a full token even when the spellings are close.
pub fn sorted_token_ratio(a: &str, b: &str) -> f64 {
    let left = sorted_tokens(a);
    let right = sorted_tokens(b);
    let chars = normalized_levenshtein(&left.join(" "), &right.join(" "));
    let longest = left.len().max(right.len());
    let tokens = if longest == 0 {
        1.0
    } else {
        1.0 - generic_levenshtein(&left, &right) as f64 / longest as f64
    };
    (chars + tokens) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_core::normalize::signature;

    #[test]
    fn reordered_title_words_still_match() {
        let score = similarity(
            "acme|research engineer - machine learning|remote",
            "acme|machine learning research engineer|remote",
        );
        assert!(score >= 0.90, "score {score}");
    }

    #[test]
    fn added_seniority_word_does_not_match() {
        let score = similarity("acme|software engineer|sf", "acme|senior software engineer|sf");
        assert!(score < 0.90, "score {score}");
    }

    #[test]
    fn language_symbols_keep_titles_apart() {
        let cpp = signature("acme", "C++ Developer", "Remote");
        let csharp = signature("acme", "C# Developer", "Remote");
        let plain = signature("acme", "C Developer", "Remote");
        for (a, b) in [(&cpp, &csharp), (&cpp, &plain), (&csharp, &plain)] {
            let score = similarity(a, b);
            assert!(score < 0.90, "{a} vs {b} scored {score}");
        }
        assert_eq!(similarity(&cpp, &cpp), 1.0);
    }

    #[test]
    fn identical_signatures_score_one() {
        let sig = signature("acme", "Sr. Software Engineer", "San Francisco, CA");
        assert_eq!(similarity(&sig, &sig), 1.0);
    }

    #[test]
    fn different_company_costs_only_its_weight() {
        let score = similarity("acme|data analyst|remote", "zzzz|data analyst|remote");
        assert!((score - 0.90).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn malformed_signatures_fall_back_to_whole_string_tokens() {
        let score = similarity("data analyst remote", "remote analyst data");
        assert_eq!(score, 1.0);
        let explanation = Matcher::default().explain("data analyst", "acme|data analyst|remote");
        assert!(explanation.components.is_none());
    }

    #[test]
    fn best_match_prefers_score_then_smaller_key() {
        let matcher = Matcher::default();
        let candidates = vec![
            (3, "acme|data analyst|remote"),
            (1, "acme|data analyst|remote"),
            (2, "acme|staff data analyst|remote"),
        ];
        let best = matcher
            .best_match("acme|analyst data|remote", candidates.clone())
            .expect("match");
        assert_eq!(best.key, 1);
        assert_eq!(best.score, 1.0);

        assert!(matcher.best_match("acme|welder|berlin", candidates).is_none());
    }

    #[test]
    fn all_matches_are_ordered_and_limited() {
        let matcher = Matcher::new(MatchConfig { threshold: 0.5 });
        let candidates = vec![
            ("b", "acme|data analyst|remote"),
            ("a", "acme|senior data analyst|remote"),
            ("c", "acme|data analyst|remote"),
        ];
        let all = matcher.all_matches("acme|data analyst|remote", candidates.clone(), None);
        assert_eq!(all.iter().map(|m| m.key).collect::<Vec<_>>(), vec!["b", "c", "a"]);

        let limited = matcher.all_matches("acme|data analyst|remote", candidates, Some(1));
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].key, "b");
    }

    #[test]
    fn explanation_reports_components_and_verdict() {
        let matcher = Matcher::default();
        let hit = matcher.explain("acme|data analyst|remote", "acme|analyst data|remote");
        assert!(hit.is_match);
        let components = hit.components.expect("three-part");
        assert_eq!(components.title, 1.0);
        assert_eq!(components.company, 1.0);

        let miss = matcher.explain("acme|software engineer|sf", "acme|senior software engineer|sf");
        assert!(!miss.is_match);
        assert!(miss.reason.contains("weakest component is title"));
    }
}
