use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, EntityConfig};
use crate::error::{Result, UnifyError};
use crate::grouping::DuplicateGrouper;
use crate::merge::{MergeBatch, MergeExecutor};
use crate::models::{CandidateRecord, DuplicateGroup, MergeDecision, PassRecord, PassReport, Summary};
use crate::report::{pass_reports, summarize, ExportFormat, Report};
use crate::storage::database::{open_database, ConnectionPool};
use crate::storage::repositories::{
    CandidateRepository, MergeLogEntry, MergeLogRepository, PassRepository,
    SqliteCandidateRepository, SqliteMergeLogRepository, SqlitePassRepository,
};

const FULL_LOG: usize = u32::MAX as usize;

/// Result of one grouping pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingOutcome {
    pub pass: PassRecord,
    pub groups: Vec<DuplicateGroup>,
    pub summary: Summary,
}

/// Entry point tying the database and configuration to grouping, merging
/// and reporting.
pub struct Unifier {
    pool: ConnectionPool,
    config: AppConfig,
}

impl Unifier {
    pub fn new(pool: ConnectionPool, config: AppConfig) -> Self {
        Self { pool, config }
    }

    /// Open (and migrate) the database named by the configuration.
    pub fn open(config: AppConfig) -> Result<Self> {
        let pool = open_database(&config.database_path())?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn entity(&self, name: &str) -> Result<&EntityConfig> {
        let entity = self.config.entity(name)?;
        entity.verify_schema(&self.pool.get_connection())?;
        Ok(entity)
    }

    /// Current active candidates, ordered by id.
    pub fn candidates(&self, entity: &str) -> Result<Vec<CandidateRecord>> {
        let entity = self.entity(entity)?;
        let conn = self.pool.get_connection();
        SqliteCandidateRepository::new(&conn, entity).list_active()
    }

    /// Group the current candidates and record the result as the entity's
    /// next pass. Without a threshold the configured one is used.
    pub fn compute_groups(&self, entity: &str, threshold: Option<f64>) -> Result<GroupingOutcome> {
        let candidates = self.candidates(entity)?;
        let grouper = DuplicateGrouper::from_config(&self.config.grouping)
            .with_threshold(threshold.unwrap_or(self.config.grouping.threshold));

        let groups = grouper.group(&candidates)?;
        let summary = summarize(candidates.len(), &groups);

        let conn = self.pool.get_connection();
        let pass = SqlitePassRepository::new(&conn).record(
            entity,
            grouper.threshold(),
            grouper.metric().as_str(),
            summary,
            &groups,
        )?;

        tracing::info!(
            entity,
            pass = pass.pass_number,
            threshold = grouper.threshold(),
            candidates = summary.original_count,
            groups = summary.total_groups,
            potential_reduction = summary.potential_reduction,
            "grouping pass recorded"
        );
        Ok(GroupingOutcome {
            pass,
            groups,
            summary,
        })
    }

    /// A recorded pass and its groups; the latest pass when `pass_number` is None.
    pub fn load_pass(
        &self,
        entity: &str,
        pass_number: Option<u32>,
    ) -> Result<(PassRecord, Vec<DuplicateGroup>)> {
        let conn = self.pool.get_connection();
        let repo = SqlitePassRepository::new(&conn);
        let pass = match pass_number {
            Some(n) => repo.find(entity, n)?.ok_or(UnifyError::PassNotFound(n))?,
            None => repo.latest(entity)?.ok_or(UnifyError::PassNotFound(1))?,
        };
        let groups = repo.load_groups(entity, pass.pass_number)?;
        Ok((pass, groups))
    }

    /// Start a merge run. Configuration problems surface here, before any
    /// decision executes.
    pub fn execute_merges<I>(
        &self,
        entity: &str,
        decisions: I,
        groups: &[DuplicateGroup],
        pass_number: Option<u32>,
    ) -> Result<MergeBatch<'_>>
    where
        I: IntoIterator<Item = MergeDecision>,
    {
        let config = self.config.entity(entity)?;
        let mut executor = MergeExecutor::new(&self.pool, entity, config)?;
        if let Some(n) = pass_number {
            executor = executor.with_pass(n);
        }
        Ok(executor.into_batch(decisions, groups))
    }

    /// Render a pass's groups with the merge status of every member.
    pub fn export_report(
        &self,
        entity: &str,
        pass_number: Option<u32>,
        format: ExportFormat,
    ) -> Result<String> {
        let (pass, groups) = self.load_pass(entity, pass_number)?;
        let log: Vec<MergeLogEntry> = self
            .merge_log(entity, FULL_LOG)?
            .into_iter()
            .filter(|e| e.pass_number == Some(pass.pass_number))
            .collect();
        Report::new(&groups).with_log(&log).render(format)
    }

    pub fn pass_history(&self, entity: &str) -> Result<Vec<PassReport>> {
        let passes = {
            let conn = self.pool.get_connection();
            SqlitePassRepository::new(&conn).list(entity)?
        };
        let log = self.merge_log(entity, FULL_LOG)?;
        Ok(pass_reports(passes, &log))
    }

    /// Most recent first.
    pub fn merge_log(&self, entity: &str, limit: usize) -> Result<Vec<MergeLogEntry>> {
        let conn = self.pool.get_connection();
        SqliteMergeLogRepository::new(&conn).list(entity, limit)
    }

    pub fn absorbed_total(&self, entity: &str) -> Result<usize> {
        let conn = self.pool.get_connection();
        SqliteMergeLogRepository::new(&conn).absorbed_total(entity)
    }
}
