use thiserror::Error;

use crate::models::RecordId;

/// All errors that can occur in unify-core.
#[derive(Debug, Error)]
pub enum UnifyError {
    #[error("Invalid merge decision: {0}")]
    Validation(#[from] ValidationError),

    #[error("Stale group {group_id}: records no longer mergeable: {}", join_ids(.ids))]
    StaleState { group_id: u32, ids: Vec<RecordId> },

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed candidate data: {0}")]
    MalformedCandidates(String),

    #[error("Similarity threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("Pass not found: #{0}")]
    PassNotFound(u32),

    #[error("Entity not configured: {0}")]
    EntityNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Caller-correctable problems with a merge decision. Checked before any
/// database mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("group {group_id}: final name is empty")]
    EmptyName { group_id: u32 },

    #[error("group {group_id}: final name '{name}' ends with the reserved merged suffix")]
    ReservedName { group_id: u32, name: String },

    #[error("group {group_id}: at least two members must be selected, got {selected}")]
    InsufficientMembers { group_id: u32, selected: usize },

    #[error("group {group_id}: merge target {target} is not among the selected members")]
    TargetNotSelected { group_id: u32, target: RecordId },

    #[error("group {group_id}: selected ids are not members of the group: {}", join_ids(.ids))]
    UnknownMember { group_id: u32, ids: Vec<RecordId> },

    #[error("group {group_id} does not exist in this pass")]
    UnknownGroup { group_id: u32 },
}

fn join_ids(ids: &[RecordId]) -> String {
    ids.iter().map(RecordId::as_str).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, UnifyError>;
