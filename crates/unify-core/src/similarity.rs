//! Pairwise name similarity.
//!
//! Names are normalized (case-folded, punctuation other than `&`, `.` and `-`
//! removed, whitespace collapsed) and compared twice: as-is and with their
//! tokens sorted, so that word order does not matter. The score is the
//! larger of the two comparisons under the configured metric.
//!
//! The default metric is the indel ratio `2 * LCS / (|a| + |b|)` over
//! characters, the same ratio a sequence matcher reports. Grouping
//! thresholds are calibrated against it: "abc waste ltd" vs "abc waste"
//! scores 0.818.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    TokenSortRatio,
    Levenshtein,
    JaroWinkler,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenSortRatio => "token_sort_ratio",
            Self::Levenshtein => "levenshtein",
            Self::JaroWinkler => "jaro_winkler",
        }
    }

    /// Compare two already-normalized, non-empty strings.
    fn compare(&self, a: &str, b: &str) -> f64 {
        match self {
            Self::TokenSortRatio => indel_ratio(a, b),
            Self::Levenshtein => strsim::normalized_levenshtein(a, b),
            Self::JaroWinkler => strsim::jaro_winkler(a, b).max(strsim::jaro_winkler(b, a)),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "token_sort_ratio" | "ratio" | "indel" => Ok(Self::TokenSortRatio),
            "levenshtein" => Ok(Self::Levenshtein),
            "jaro_winkler" => Ok(Self::JaroWinkler),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

/// Scores name pairs with a fixed metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    metric: SimilarityMetric,
}

impl Scorer {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Score two display names in `[0, 1]`. Symmetric; identical names score 1.0.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let na = normalize(a);
        let nb = normalize(b);
        if na.is_empty() && nb.is_empty() {
            return if a.trim() == b.trim() { 1.0 } else { 0.0 };
        }
        self.score_normalized(&na, &nb)
    }

    /// Score two strings that already went through [`normalize`].
    pub fn score_normalized(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }

        let direct = self.metric.compare(a, b);
        let sorted = self.metric.compare(&token_sort(a), &token_sort(b));
        direct.max(sorted).clamp(0.0, 1.0)
    }
}

/// Score with the default metric.
pub fn score(a: &str, b: &str) -> f64 {
    Scorer::default().score(a, b)
}

/// Comparison form of a name. Never used for display.
pub fn normalize(name: &str) -> String {
    let lowercase = name.to_lowercase();
    let cleaned: String = lowercase
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || matches!(c, '&' | '.' | '-') {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_sort(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * lcs_length(&a, &b) as f64 / total as f64
}

/// Two-row longest common subsequence.
fn lcs_length(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
