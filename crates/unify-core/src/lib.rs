pub mod config;
pub mod error;
pub mod grouping;
pub mod merge;
pub mod models;
pub mod report;
pub mod similarity;
pub mod storage;
pub mod unifier;
pub mod validation;

pub use config::{AppConfig, DependentColumn, EntityConfig, GroupingConfig};
pub use error::{Result, UnifyError, ValidationError};
pub use models::*;

pub use grouping::{group, suggested_merge_name, DuplicateGrouper};
pub use merge::{BatchProgress, MergeBatch, MergeExecutor, MergeOutcome};
pub use report::{pass_reports, summarize, ExportFormat, MemberStatus, Report, ReportRow};
pub use similarity::{normalize, score, Scorer, SimilarityMetric};
pub use unifier::{GroupingOutcome, Unifier};
pub use validation::validate;

pub use storage::database::{open_database, open_in_memory, ConnectionPool};
pub use storage::repositories::{
    CandidateRepository, MergeLogEntry, MergeLogRepository, PassRepository,
    SqliteCandidateRepository, SqliteMergeLogRepository, SqlitePassRepository,
};
