use serde::{Deserialize, Serialize};

use super::candidate::{CandidateRecord, RecordId};

/// A neighbour of a group's main candidate together with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCandidate {
    pub record: CandidateRecord,
    pub score: f64,
}

/// A cluster of candidate records judged similar enough to possibly be the
/// same real-world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: u32,
    pub main_candidate: CandidateRecord,
    /// Ordered by descending score.
    pub similar_candidates: Vec<SimilarCandidate>,
    pub suggested_merge_name: String,
}

impl DuplicateGroup {
    /// Main candidate first, then neighbours in score order.
    pub fn members(&self) -> impl Iterator<Item = &CandidateRecord> {
        std::iter::once(&self.main_candidate)
            .chain(self.similar_candidates.iter().map(|s| &s.record))
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.members().map(|record| &record.id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.member_ids().any(|member| member == id)
    }
}
