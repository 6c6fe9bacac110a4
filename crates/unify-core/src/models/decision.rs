use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::candidate::RecordId;
use super::group::DuplicateGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    Merge,
    Skip,
}

/// A reviewed disposition for one duplicate group. Consumed once by the
/// merge executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub group_id: u32,
    pub action: MergeAction,
    pub merge_target_id: RecordId,
    pub final_name: String,
    pub selected_member_ids: BTreeSet<RecordId>,
}

impl MergeDecision {
    /// The programmatic default: keep the main candidate, absorb every
    /// neighbour and rename to the suggested name.
    pub fn accept(group: &DuplicateGroup) -> Self {
        Self {
            group_id: group.group_id,
            action: MergeAction::Merge,
            merge_target_id: group.main_candidate.id.clone(),
            final_name: group.suggested_merge_name.clone(),
            selected_member_ids: group.member_ids().cloned().collect(),
        }
    }

    pub fn skip(group: &DuplicateGroup) -> Self {
        Self {
            action: MergeAction::Skip,
            ..Self::accept(group)
        }
    }

    pub fn with_target(mut self, target: impl Into<RecordId>) -> Self {
        self.merge_target_id = target.into();
        self
    }

    pub fn with_final_name(mut self, name: impl Into<String>) -> Self {
        self.final_name = name.into();
        self
    }

    pub fn with_members<I, T>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RecordId>,
    {
        self.selected_member_ids = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_skip(&self) -> bool {
        self.action == MergeAction::Skip
    }

    /// Selected members other than the target, in id order.
    pub fn members_to_absorb(&self) -> Vec<RecordId> {
        self.selected_member_ids
            .iter()
            .filter(|id| **id != self.merge_target_id)
            .cloned()
            .collect()
    }
}

/// Outcome of executing one merge decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub group_id: u32,
    pub success: bool,
    pub companies_merged: usize,
    #[serde(default)]
    pub rows_repointed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl MergeResult {
    pub fn merged(group_id: u32, companies_merged: usize, rows_repointed: usize) -> Self {
        Self {
            group_id,
            success: true,
            companies_merged,
            rows_repointed,
            error_message: None,
        }
    }

    pub fn skipped(group_id: u32) -> Self {
        Self::merged(group_id, 0, 0)
    }

    pub fn failed(group_id: u32, message: impl Into<String>) -> Self {
        Self {
            group_id,
            success: false,
            companies_merged: 0,
            rows_repointed: 0,
            error_message: Some(message.into()),
        }
    }
}
