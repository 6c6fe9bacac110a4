mod candidate_repository;
mod merge_log_repository;
mod pass_repository;

pub use candidate_repository::{
    has_merged_suffix, CandidateRepository, EntityRow, SqliteCandidateRepository, MERGED_STATUS,
    MERGED_SUFFIX,
};
pub use merge_log_repository::{MergeLogEntry, MergeLogRepository, SqliteMergeLogRepository};
pub use pass_repository::{PassRepository, SqlitePassRepository};
