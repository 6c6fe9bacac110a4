use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Before/after statistics for one grouping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub original_count: usize,
    pub total_groups: usize,
    pub total_duplicates: usize,
    /// Records that disappear if every group fully merges.
    pub potential_reduction: usize,
}

impl Summary {
    pub fn projected_count(&self) -> usize {
        self.original_count.saturating_sub(self.potential_reduction)
    }
}

/// A recorded grouping pass over one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub entity: String,
    pub pass_number: u32,
    pub threshold: f64,
    pub metric: String,
    pub summary: Summary,
    pub created_at: DateTime<Utc>,
}

/// A pass annotated with statistics accumulated since the first pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: PassRecord,
    /// Candidate count observed at pass #1.
    pub baseline_count: usize,
    /// Records absorbed by merges executed before this pass ran.
    pub absorbed_so_far: usize,
    /// Absorbed so far plus this pass's potential reduction.
    pub cumulative_reduction: usize,
}
