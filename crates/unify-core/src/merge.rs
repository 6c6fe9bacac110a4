//! Transactional merge execution.
//!
//! Every decision runs in its own `BEGIN IMMEDIATE` transaction: the write
//! lock is taken before the mergeability check, foreign keys in every
//! declared dependent column are repointed to the target, absorbed rows are
//! renamed with the `[MERGED]` suffix (and flagged when a status column is
//! configured), the target is renamed, and an audit entry is written. Any
//! failure rolls the whole decision back. Absorbed rows are never deleted.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EntityConfig;
use crate::error::{Result, UnifyError, ValidationError};
use crate::models::{DuplicateGroup, MergeDecision, MergeResult, RecordId};
use crate::storage::database::ConnectionPool;
use crate::storage::repositories::{
    CandidateRepository, MergeLogEntry, MergeLogRepository, SqliteCandidateRepository,
    SqliteMergeLogRepository, MERGED_STATUS, MERGED_SUFFIX,
};
use crate::validation::{validate, validate_shape};

pub struct MergeExecutor<'a> {
    pool: &'a ConnectionPool,
    entity_name: String,
    entity: &'a EntityConfig,
    pass_number: Option<u32>,
}

impl<'a> MergeExecutor<'a> {
    /// Fails with a configuration error, before any transaction starts, when
    /// the entity or one of its dependents is not declared correctly.
    pub fn new(
        pool: &'a ConnectionPool,
        entity_name: impl Into<String>,
        entity: &'a EntityConfig,
    ) -> Result<Self> {
        {
            let conn = pool.get_connection();
            entity.verify_schema(&conn)?;
        }
        Ok(Self {
            pool,
            entity_name: entity_name.into(),
            entity,
            pass_number: None,
        })
    }

    /// Tag audit entries with the pass the decisions were reviewed in.
    pub fn with_pass(mut self, pass_number: u32) -> Self {
        self.pass_number = Some(pass_number);
        self
    }

    /// Execute one decision. Failures are reported in the result, never raised.
    pub fn execute(&self, decision: &MergeDecision) -> MergeResult {
        match self.try_execute(decision) {
            Ok(result) => result,
            Err(err) => self.fail(decision, &err),
        }
    }

    pub fn try_execute(&self, decision: &MergeDecision) -> Result<MergeResult> {
        if decision.is_skip() {
            tracing::debug!(group_id = decision.group_id, "decision skipped");
            return Ok(MergeResult::skipped(decision.group_id));
        }
        validate_shape(decision)?;

        let absorbed = decision.members_to_absorb();
        let final_name = decision.final_name.trim();

        let mut conn = self.pool.get_connection();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(transaction_error)?;

        let previous_name = self.check_mergeable(&tx, decision, &absorbed)?;
        let rows_repointed = self
            .apply(&tx, &decision.merge_target_id, &absorbed, final_name)
            .map_err(|e| match e {
                UnifyError::Database(db) => transaction_error(db),
                other => other,
            })?;

        SqliteMergeLogRepository::new(&tx).append(&MergeLogEntry {
            id: Uuid::now_v7(),
            entity: self.entity_name.clone(),
            pass_number: self.pass_number,
            group_id: decision.group_id,
            target_id: decision.merge_target_id.clone(),
            absorbed_ids: absorbed.clone(),
            final_name: final_name.to_string(),
            previous_name: Some(previous_name),
            rows_repointed,
            success: true,
            error_message: None,
            executed_at: Utc::now(),
        })?;

        tx.commit().map_err(transaction_error)?;

        tracing::info!(
            entity = %self.entity_name,
            group_id = decision.group_id,
            target = %decision.merge_target_id,
            absorbed = absorbed.len(),
            rows_repointed,
            "merge committed"
        );
        Ok(MergeResult::merged(decision.group_id, absorbed.len(), rows_repointed))
    }

    /// Run decisions one at a time, yielding each result as it completes.
    /// Each decision is checked against its group from `groups` first.
    pub fn into_batch<I>(self, decisions: I, groups: &[DuplicateGroup]) -> MergeBatch<'a>
    where
        I: IntoIterator<Item = MergeDecision>,
    {
        let decisions: Vec<MergeDecision> = decisions.into_iter().collect();
        MergeBatch {
            executor: self,
            groups: groups.iter().map(|g| (g.group_id, g.clone())).collect(),
            progress: BatchProgress {
                total: decisions.len(),
                ..BatchProgress::default()
            },
            decisions: decisions.into_iter(),
        }
    }

    /// Returns the target's current name. Every referenced id must exist and
    /// not be merged already.
    fn check_mergeable(
        &self,
        conn: &Connection,
        decision: &MergeDecision,
        absorbed: &[RecordId],
    ) -> Result<String> {
        let repo = SqliteCandidateRepository::new(conn, self.entity);
        let mut stale = Vec::new();
        let mut previous_name = String::new();

        for id in std::iter::once(&decision.merge_target_id).chain(absorbed) {
            match repo.find(id)? {
                Some(row) if !row.merged => {
                    if id == &decision.merge_target_id {
                        previous_name = row.name;
                    }
                }
                _ => stale.push(id.clone()),
            }
        }

        if !stale.is_empty() {
            return Err(UnifyError::StaleState {
                group_id: decision.group_id,
                ids: stale,
            });
        }
        Ok(previous_name)
    }

    fn apply(
        &self,
        conn: &Connection,
        target: &RecordId,
        absorbed: &[RecordId],
        final_name: &str,
    ) -> Result<usize> {
        let e = self.entity;
        let mut rows_repointed = 0;

        for id in absorbed {
            for dependent in &e.dependents {
                let changed = conn.execute(
                    &format!(
                        "UPDATE {table} SET {column} = ?1 WHERE {column} = ?2",
                        table = dependent.table,
                        column = dependent.column
                    ),
                    params![target, id],
                )?;
                tracing::debug!(
                    table = %dependent.table,
                    column = %dependent.column,
                    from = %id,
                    to = %target,
                    changed,
                    "repointed references"
                );
                rows_repointed += changed;
            }
        }

        let mark_sql = match &e.status_column {
            Some(status) => format!(
                "UPDATE {} SET {} = {} || ?1, {status} = '{MERGED_STATUS}' WHERE {} = ?2",
                e.table, e.name_column, e.name_column, e.id_column
            ),
            None => format!(
                "UPDATE {} SET {} = {} || ?1 WHERE {} = ?2",
                e.table, e.name_column, e.name_column, e.id_column
            ),
        };
        for id in absorbed {
            conn.execute(&mark_sql, params![MERGED_SUFFIX, id])?;
        }

        conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                e.table, e.name_column, e.id_column
            ),
            params![final_name, target],
        )?;

        Ok(rows_repointed)
    }

    fn fail(&self, decision: &MergeDecision, err: &UnifyError) -> MergeResult {
        tracing::warn!(
            entity = %self.entity_name,
            group_id = decision.group_id,
            error = %err,
            "merge failed"
        );

        let conn = self.pool.get_connection();
        let logged = SqliteMergeLogRepository::new(&conn).append(&MergeLogEntry {
            id: Uuid::now_v7(),
            entity: self.entity_name.clone(),
            pass_number: self.pass_number,
            group_id: decision.group_id,
            target_id: decision.merge_target_id.clone(),
            absorbed_ids: decision.members_to_absorb(),
            final_name: decision.final_name.clone(),
            previous_name: None,
            rows_repointed: 0,
            success: false,
            error_message: Some(err.to_string()),
            executed_at: Utc::now(),
        });
        if let Err(log_err) = logged {
            tracing::warn!(error = %log_err, "could not record failed merge");
        }

        MergeResult::failed(decision.group_id, err.to_string())
    }
}

fn transaction_error(err: rusqlite::Error) -> UnifyError {
    UnifyError::Transaction(err.to_string())
}

/// Running counters for a batch of merges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub processed: usize,
    pub successes: usize,
    pub errors: usize,
    pub absorbed: usize,
}

impl BatchProgress {
    fn record(&mut self, result: &MergeResult) {
        self.processed += 1;
        if result.success {
            self.successes += 1;
            self.absorbed += result.companies_merged;
        } else {
            self.errors += 1;
        }
    }
}

/// One decision's result plus the counters after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub result: MergeResult,
    pub progress: BatchProgress,
}

/// Sequential merge run over reviewed decisions. Each call to `next`
/// executes exactly one decision; dropping the batch stops before the next.
pub struct MergeBatch<'a> {
    executor: MergeExecutor<'a>,
    groups: HashMap<u32, DuplicateGroup>,
    decisions: std::vec::IntoIter<MergeDecision>,
    progress: BatchProgress,
}

impl<'a> MergeBatch<'a> {
    pub fn progress(&self) -> BatchProgress {
        self.progress
    }

    /// Drain the remaining decisions.
    pub fn finish(self) -> (Vec<MergeResult>, BatchProgress) {
        let mut last = self.progress;
        let results = self
            .map(|outcome| {
                last = outcome.progress;
                outcome.result
            })
            .collect();
        (results, last)
    }

    fn run(&self, decision: &MergeDecision) -> MergeResult {
        let checked = match self.groups.get(&decision.group_id) {
            Some(group) => validate(decision, group),
            None => Err(ValidationError::UnknownGroup {
                group_id: decision.group_id,
            }),
        };

        match checked {
            Ok(()) => self.executor.execute(decision),
            Err(err) => self.executor.fail(decision, &err.into()),
        }
    }
}

impl Iterator for MergeBatch<'_> {
    type Item = MergeOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        let decision = self.decisions.next()?;
        let result = self.run(&decision);
        self.progress.record(&result);
        Some(MergeOutcome {
            result,
            progress: self.progress,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.decisions.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group;
    use crate::storage::database::open_in_memory;

    fn seed(pool: &ConnectionPool) {
        pool.get_connection()
            .execute_batch(
                "
                CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                CREATE TABLE vehicles (
                    id INTEGER PRIMARY KEY,
                    plate TEXT,
                    company_id INTEGER REFERENCES companies(id)
                );
                INSERT INTO companies (id, name) VALUES
                    (1, 'ABC Waste Ltd'), (2, 'ABC Waste'), (3, 'XYZ Corp');
                INSERT INTO vehicles (plate, company_id) VALUES
                    ('KAA 001A', 1), ('KAB 002B', 2), ('KAC 003C', 2), ('KAD 004D', 3);
                ",
            )
            .unwrap();
    }

    fn entity() -> EntityConfig {
        EntityConfig::new("companies").with_dependent("vehicles", "company_id")
    }

    fn name_of(pool: &ConnectionPool, id: i64) -> String {
        pool.get_connection()
            .query_row("SELECT name FROM companies WHERE id = ?1", [id], |r| r.get(0))
            .unwrap()
    }

    fn vehicles_of(pool: &ConnectionPool, id: i64) -> i64 {
        pool.get_connection()
            .query_row(
                "SELECT COUNT(*) FROM vehicles WHERE company_id = ?1",
                [id],
                |r| r.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_merge_repoints_references_and_renames() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        let entity = entity();
        let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

        let decision = MergeDecision {
            group_id: 1,
            action: crate::models::MergeAction::Merge,
            merge_target_id: RecordId::from(1),
            final_name: "ABC Waste Services".to_string(),
            selected_member_ids: [RecordId::from(1), RecordId::from(2)].into_iter().collect(),
        };
        let result = executor.execute(&decision);

        assert!(result.success, "{result:?}");
        assert_eq!(result.companies_merged, 1);
        assert_eq!(result.rows_repointed, 2);
        assert_eq!(name_of(&pool, 1), "ABC Waste Services");
        assert_eq!(name_of(&pool, 2), "ABC Waste [MERGED]");
        assert_eq!(vehicles_of(&pool, 1), 3);
        assert_eq!(vehicles_of(&pool, 2), 0);
        assert_eq!(vehicles_of(&pool, 3), 1);

        let log = SqliteMergeLogRepository::new(&pool.get_connection())
            .list("companies", 10)
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].previous_name.as_deref(), Some("ABC Waste Ltd"));
    }

    #[test]
    fn test_status_column_is_flagged_when_configured() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        pool.get_connection()
            .execute_batch("ALTER TABLE companies ADD COLUMN status TEXT")
            .unwrap();
        let entity = entity().with_status_column("status");
        let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

        let candidates = SqliteCandidateRepository::new(&pool.get_connection(), &entity)
            .list_active()
            .unwrap();
        let groups = group(&candidates, 0.7).unwrap();
        let result = executor.execute(&MergeDecision::accept(&groups[0]));
        assert!(result.success);

        let status: Option<String> = pool
            .get_connection()
            .query_row("SELECT status FROM companies WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status.as_deref(), Some("merged"));
    }

    #[test]
    fn test_absorbed_id_cannot_be_merged_again() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        let entity = entity();
        let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

        let first = MergeDecision {
            group_id: 1,
            action: crate::models::MergeAction::Merge,
            merge_target_id: RecordId::from(1),
            final_name: "ABC Waste".to_string(),
            selected_member_ids: [RecordId::from(1), RecordId::from(2)].into_iter().collect(),
        };
        let second = MergeDecision {
            group_id: 2,
            merge_target_id: RecordId::from(3),
            selected_member_ids: [RecordId::from(2), RecordId::from(3)].into_iter().collect(),
            ..first.clone()
        };

        assert!(executor.execute(&first).success);
        let err = executor.try_execute(&second).unwrap_err();
        assert!(matches!(
            err,
            UnifyError::StaleState { group_id: 2, ref ids } if ids == &vec![RecordId::from(2)]
        ));
        assert_eq!(name_of(&pool, 3), "XYZ Corp");
        assert_eq!(vehicles_of(&pool, 3), 1);
    }

    #[test]
    fn test_database_failure_rolls_back_the_whole_decision() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        pool.get_connection()
            .execute_batch(
                "CREATE TRIGGER refuse_rename BEFORE UPDATE OF name ON companies
                 WHEN NEW.name = 'Forbidden'
                 BEGIN SELECT RAISE(ABORT, 'rename refused'); END;",
            )
            .unwrap();
        let entity = entity();
        let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

        let decision = MergeDecision {
            group_id: 1,
            action: crate::models::MergeAction::Merge,
            merge_target_id: RecordId::from(1),
            final_name: "Forbidden".to_string(),
            selected_member_ids: [RecordId::from(1), RecordId::from(2)].into_iter().collect(),
        };
        let result = executor.execute(&decision);

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("rename refused"));
        assert_eq!(name_of(&pool, 2), "ABC Waste");
        assert_eq!(vehicles_of(&pool, 2), 2);
        assert_eq!(vehicles_of(&pool, 1), 1);
    }

    #[test]
    fn test_missing_dependent_declaration_is_fatal() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        let no_dependents = EntityConfig::new("companies");
        assert!(matches!(
            MergeExecutor::new(&pool, "companies", &no_dependents),
            Err(UnifyError::Configuration(_))
        ));

        let wrong_column = EntityConfig::new("companies").with_dependent("vehicles", "owner");
        assert!(MergeExecutor::new(&pool, "companies", &wrong_column).is_err());
    }

    #[test]
    fn test_batch_reports_progress_and_isolates_failures() {
        let pool = open_in_memory().unwrap();
        seed(&pool);
        let entity = entity();
        let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

        let candidates = SqliteCandidateRepository::new(&pool.get_connection(), &entity)
            .list_active()
            .unwrap();
        let groups = group(&candidates, 0.7).unwrap();
        let bad = MergeDecision::accept(&groups[0]).with_members([1]);
        let unknown = MergeDecision {
            group_id: 99,
            ..MergeDecision::accept(&groups[0])
        };
        let good = MergeDecision::accept(&groups[0]);

        let outcomes: Vec<MergeOutcome> = executor
            .into_batch([bad, unknown, good], &groups)
            .collect();

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].result.success);
        assert!(outcomes[0].result.error_message.as_ref().unwrap().contains("at least two"));
        assert!(outcomes[1].result.error_message.as_ref().unwrap().contains("does not exist"));
        assert!(outcomes[2].result.success);
        assert_eq!(
            outcomes[2].progress,
            BatchProgress {
                total: 3,
                processed: 3,
                successes: 1,
                errors: 2,
                absorbed: 1,
            }
        );
        assert_eq!(outcomes[0].progress.processed, 1);
    }
}
