use crate::error::ValidationError;
use crate::models::{DuplicateGroup, MergeDecision, RecordId};
use crate::storage::repositories::has_merged_suffix;

/// Check a merge decision against its group before anything touches the
/// database. Rules run in order and the first failure wins.
///
/// Skip decisions are never executed and always pass.
pub fn validate(decision: &MergeDecision, group: &DuplicateGroup) -> Result<(), ValidationError> {
    if decision.is_skip() {
        return Ok(());
    }

    validate_shape(decision)?;

    let unknown: Vec<RecordId> = decision
        .selected_member_ids
        .iter()
        .filter(|id| !group.contains(id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ValidationError::UnknownMember {
            group_id: decision.group_id,
            ids: unknown,
        });
    }

    Ok(())
}

/// The rules that need no group: name, member count, target membership.
///
/// A name ending in the merged suffix would make the surviving record look
/// absorbed, so it is refused along with blank names.
pub fn validate_shape(decision: &MergeDecision) -> Result<(), ValidationError> {
    let group_id = decision.group_id;
    let name = decision.final_name.trim();

    if name.is_empty() {
        return Err(ValidationError::EmptyName { group_id });
    }

    if has_merged_suffix(name) {
        return Err(ValidationError::ReservedName {
            group_id,
            name: name.to_string(),
        });
    }

    if decision.selected_member_ids.len() < 2 {
        return Err(ValidationError::InsufficientMembers {
            group_id,
            selected: decision.selected_member_ids.len(),
        });
    }

    if !decision.selected_member_ids.contains(&decision.merge_target_id) {
        return Err(ValidationError::TargetNotSelected {
            group_id,
            target: decision.merge_target_id.clone(),
        });
    }

    Ok(())
}
