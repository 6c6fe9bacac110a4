//! Duplicate grouping.
//!
//! Candidates are visited in ascending id order. Each one that is not yet
//! part of a group becomes an anchor and collects every later, unassigned
//! candidate scoring at or above the threshold. Anchors with no neighbours
//! form no group. Scores are symmetric, so an earlier ungrouped candidate
//! has already been compared against every later one and is skipped.
//!
//! Each anchor's sweep runs on the rayon pool; marking members as assigned
//! happens afterwards on the calling thread, in priority order.

use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;

use crate::config::GroupingConfig;
use crate::error::{Result, UnifyError};
use crate::models::{CandidateRecord, DuplicateGroup, SimilarCandidate};
use crate::similarity::{normalize, Scorer, SimilarityMetric};

const CORPORATE_SUFFIXES: &[&str] = &["LTD", "LIMITED", "COMPANY", "CO"];

#[derive(Debug, Clone)]
pub struct DuplicateGrouper {
    scorer: Scorer,
    threshold: f64,
    bucket_by_first_token: bool,
}

impl Default for DuplicateGrouper {
    fn default() -> Self {
        Self::from_config(&GroupingConfig::default())
    }
}

impl DuplicateGrouper {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn from_config(config: &GroupingConfig) -> Self {
        Self {
            scorer: Scorer::new(config.metric),
            threshold: config.threshold,
            bucket_by_first_token: config.bucket_by_first_token,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.scorer = Scorer::new(metric);
        self
    }

    /// Only compare names sharing their first normalized token.
    pub fn with_bucketing(mut self, enabled: bool) -> Self {
        self.bucket_by_first_token = enabled;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.scorer.metric()
    }

    pub fn group(&self, candidates: &[CandidateRecord]) -> Result<Vec<DuplicateGroup>> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(UnifyError::InvalidThreshold(self.threshold));
        }
        check_candidates(candidates)?;

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|a, b| candidates[*a].id.cmp(&candidates[*b].id));

        let normalized: Vec<String> = candidates
            .par_iter()
            .map(|c| normalize(&c.display_name))
            .collect();

        let mut assigned = vec![false; candidates.len()];
        let mut groups = Vec::new();

        for (pos, &anchor) in order.iter().enumerate() {
            if assigned[anchor] || normalized[anchor].is_empty() {
                continue;
            }

            let anchor_name = &normalized[anchor];
            let anchor_bucket = first_token(anchor_name);
            let mut similar: Vec<(usize, f64)> = order[pos + 1..]
                .par_iter()
                .filter(|&&other| !assigned[other] && !normalized[other].is_empty())
                .filter(|&&other| {
                    !self.bucket_by_first_token || first_token(&normalized[other]) == anchor_bucket
                })
                .filter_map(|&other| {
                    let score = self.scorer.score_normalized(anchor_name, &normalized[other]);
                    (score >= self.threshold).then_some((other, score))
                })
                .collect();

            if similar.is_empty() {
                continue;
            }

            similar.sort_by(|(a, sa), (b, sb)| {
                sb.partial_cmp(sa)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| normalized[*a].cmp(&normalized[*b]))
                    .then_with(|| candidates[*a].id.cmp(&candidates[*b].id))
            });

            assigned[anchor] = true;
            for (other, _) in &similar {
                assigned[*other] = true;
            }

            let main_candidate = candidates[anchor].clone();
            let similar_candidates: Vec<SimilarCandidate> = similar
                .into_iter()
                .map(|(idx, score)| SimilarCandidate {
                    record: candidates[idx].clone(),
                    score,
                })
                .collect();
            let suggested_merge_name = suggested_merge_name(
                std::iter::once(main_candidate.display_name.as_str()).chain(
                    similar_candidates
                        .iter()
                        .map(|s| s.record.display_name.as_str()),
                ),
            );

            groups.push(DuplicateGroup {
                group_id: groups.len() as u32 + 1,
                main_candidate,
                similar_candidates,
                suggested_merge_name,
            });
        }

        tracing::info!(
            candidates = candidates.len(),
            groups = groups.len(),
            threshold = self.threshold,
            metric = %self.scorer.metric(),
            "grouping pass finished"
        );
        Ok(groups)
    }
}

/// Group with the default metric and no bucketing.
pub fn group(candidates: &[CandidateRecord], threshold: f64) -> Result<Vec<DuplicateGroup>> {
    DuplicateGrouper::new(threshold).group(candidates)
}

fn check_candidates(candidates: &[CandidateRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate.id.as_str().trim().is_empty() {
            return Err(UnifyError::MalformedCandidates(format!(
                "record '{}' has an empty id",
                candidate.display_name
            )));
        }
        if !seen.insert(&candidate.id) {
            return Err(UnifyError::MalformedCandidates(format!(
                "duplicate id {}",
                candidate.id
            )));
        }
    }
    Ok(())
}

fn first_token(normalized: &str) -> &str {
    normalized.split_whitespace().next().unwrap_or("")
}

/// Default final name for a group: the shortest member name with trailing
/// corporate suffixes removed and each word capitalised.
pub fn suggested_merge_name<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let shortest = names
        .into_iter()
        .map(str::trim)
        .fold(None::<&str>, |best, name| match best {
            Some(b) if b.chars().count() <= name.chars().count() => Some(b),
            _ => Some(name),
        })
        .unwrap_or("");

    let mut words: Vec<&str> = shortest.split_whitespace().collect();
    while words.len() > 1
        && words
            .last()
            .is_some_and(|w| is_corporate_suffix(w))
    {
        words.pop();
    }

    words
        .iter()
        .map(|w| capitalize_word(w))
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches([',', '-', '&', ' '])
        .to_string()
}

fn is_corporate_suffix(word: &str) -> bool {
    let bare = word.trim_matches(|c: char| c == '.' || c == ',' || c == '(' || c == ')');
    CORPORATE_SUFFIXES
        .iter()
        .any(|suffix| bare.eq_ignore_ascii_case(suffix))
}

/// Short all-caps words are kept as acronyms and mixed-case words as
/// written; everything else becomes `Capitalised`.
fn capitalize_word(word: &str) -> String {
    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    let all_upper = !letters.is_empty() && letters.iter().all(|c| c.is_uppercase());
    let starts_upper = word.chars().next().is_some_and(char::is_uppercase);

    if (all_upper && letters.len() <= 3) || (starts_upper && !all_upper) {
        return word.to_string();
    }

    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
