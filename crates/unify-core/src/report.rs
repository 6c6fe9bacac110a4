//! Pass summaries, review exports and pass history.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnifyError};
use crate::models::{
    DuplicateGroup, MergeDecision, MergeResult, PassRecord, PassReport, RecordId, Summary,
};
use crate::similarity::normalize;
use crate::storage::repositories::MergeLogEntry;

const CSV_HEADER: &[&str] = &[
    "group_id",
    "record_id",
    "role",
    "original_name",
    "normalized_name",
    "similarity_score",
    "proposed_name",
    "status",
];

/// Every absorbed record is one fewer final record, assuming all groups
/// fully merge.
pub fn summarize(original_count: usize, groups: &[DuplicateGroup]) -> Summary {
    let total_duplicates = groups.iter().map(|g| g.similar_candidates.len()).sum();
    Summary {
        original_count,
        total_groups: groups.len(),
        total_duplicates,
        potential_reduction: total_duplicates,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = UnifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(UnifyError::Configuration(format!(
                "unknown export format '{other}' (expected csv or json)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Main,
    Similar,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Similar => "similar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Target,
    Absorbed,
    Skipped,
    Failed,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Target => "target",
            Self::Absorbed => "absorbed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// One line of the flat review listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub group_id: u32,
    pub record_id: RecordId,
    pub role: MemberRole,
    pub original_name: String,
    pub normalized_name: String,
    pub similarity_score: f64,
    pub proposed_name: String,
    pub status: MemberStatus,
}

#[derive(Debug, Clone)]
struct GroupOutcome {
    success: bool,
    skipped: bool,
    target: RecordId,
    absorbed: Vec<RecordId>,
}

impl GroupOutcome {
    fn status_of(&self, id: &RecordId) -> MemberStatus {
        if !self.success {
            MemberStatus::Failed
        } else if self.skipped {
            MemberStatus::Skipped
        } else if &self.target == id {
            MemberStatus::Target
        } else if self.absorbed.contains(id) {
            MemberStatus::Absorbed
        } else {
            // left out of the selection
            MemberStatus::Skipped
        }
    }
}

/// Flat listing of a pass's groups, optionally annotated with what happened
/// to each member.
pub struct Report<'a> {
    groups: &'a [DuplicateGroup],
    outcomes: HashMap<u32, GroupOutcome>,
}

impl<'a> Report<'a> {
    pub fn new(groups: &'a [DuplicateGroup]) -> Self {
        Self {
            groups,
            outcomes: HashMap::new(),
        }
    }

    /// Annotate with results of a batch, paired with the decisions that produced them.
    pub fn with_results<'d>(
        mut self,
        outcomes: impl IntoIterator<Item = (&'d MergeDecision, &'d MergeResult)>,
    ) -> Self {
        for (decision, result) in outcomes {
            self.outcomes.insert(
                decision.group_id,
                GroupOutcome {
                    success: result.success,
                    skipped: decision.is_skip(),
                    target: decision.merge_target_id.clone(),
                    absorbed: decision.members_to_absorb(),
                },
            );
        }
        self
    }

    /// Annotate from the audit log. A successful merge wins over failed
    /// attempts at the same group.
    pub fn with_log(mut self, entries: &[MergeLogEntry]) -> Self {
        for entry in entries {
            let already_merged = self
                .outcomes
                .get(&entry.group_id)
                .is_some_and(|o| o.success);
            if already_merged {
                continue;
            }
            self.outcomes.insert(
                entry.group_id,
                GroupOutcome {
                    success: entry.success,
                    skipped: false,
                    target: entry.target_id.clone(),
                    absorbed: entry.absorbed_ids.clone(),
                },
            );
        }
        self
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        let mut rows = Vec::new();
        for group in self.groups {
            let outcome = self.outcomes.get(&group.group_id);
            let similar = group
                .similar_candidates
                .iter()
                .map(|s| (&s.record, s.score, MemberRole::Similar));
            let members =
                std::iter::once((&group.main_candidate, 1.0, MemberRole::Main)).chain(similar);

            for (record, score, role) in members {
                rows.push(ReportRow {
                    group_id: group.group_id,
                    record_id: record.id.clone(),
                    role,
                    original_name: record.display_name.clone(),
                    normalized_name: normalize(&record.display_name),
                    similarity_score: score,
                    proposed_name: group.suggested_merge_name.clone(),
                    status: outcome
                        .map(|o| o.status_of(&record.id))
                        .unwrap_or(MemberStatus::Pending),
                });
            }
        }
        rows
    }

    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => self.to_csv(),
            ExportFormat::Json => self.to_json(),
        }
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for row in self.rows() {
            let group_id = row.group_id.to_string();
            let score = format!("{:.4}", row.similarity_score);
            writer.write_record([
                group_id.as_str(),
                row.record_id.as_str(),
                row.role.as_str(),
                row.original_name.as_str(),
                row.normalized_name.as_str(),
                score.as_str(),
                row.proposed_name.as_str(),
                row.status.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| UnifyError::Io(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| UnifyError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows())?)
    }
}

/// Annotate passes (ascending by number) with cumulative statistics.
///
/// A merge counts towards a pass when it was executed against an earlier
/// pass, or, for untagged merges, before the pass was recorded.
pub fn pass_reports(passes: Vec<PassRecord>, log: &[MergeLogEntry]) -> Vec<PassReport> {
    let baseline_count = passes
        .first()
        .map(|p| p.summary.original_count)
        .unwrap_or_default();

    passes
        .into_iter()
        .map(|pass| {
            let absorbed_so_far = log
                .iter()
                .filter(|e| e.success)
                .filter(|e| match e.pass_number {
                    Some(n) => n < pass.pass_number,
                    None => e.executed_at < pass.created_at,
                })
                .map(|e| e.absorbed_ids.len())
                .sum();
            PassReport {
                baseline_count,
                absorbed_so_far,
                cumulative_reduction: absorbed_so_far + pass.summary.potential_reduction,
                pass,
            }
        })
        .collect()
}
