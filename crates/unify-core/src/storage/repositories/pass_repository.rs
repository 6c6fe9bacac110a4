use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, UnifyError};
use crate::models::{CandidateRecord, DuplicateGroup, PassRecord, SimilarCandidate, Summary};

pub trait PassRepository {
    /// Store a finished pass and its groups under the next pass number.
    fn record(
        &self,
        entity: &str,
        threshold: f64,
        metric: &str,
        summary: Summary,
        groups: &[DuplicateGroup],
    ) -> Result<PassRecord>;
    fn list(&self, entity: &str) -> Result<Vec<PassRecord>>;
    fn find(&self, entity: &str, pass_number: u32) -> Result<Option<PassRecord>>;
    fn latest(&self, entity: &str) -> Result<Option<PassRecord>>;
    fn load_groups(&self, entity: &str, pass_number: u32) -> Result<Vec<DuplicateGroup>>;
}

pub struct SqlitePassRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePassRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const PASS_COLUMNS: &str = "entity, pass_number, threshold, metric, candidate_count, \
                            total_groups, total_duplicates, created_at";

fn row_to_pass(row: &rusqlite::Row<'_>) -> rusqlite::Result<PassRecord> {
    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let total_duplicates = row.get::<_, i64>(6)? as usize;

    Ok(PassRecord {
        entity: row.get(0)?,
        pass_number: row.get(1)?,
        threshold: row.get(2)?,
        metric: row.get(3)?,
        summary: Summary {
            original_count: row.get::<_, i64>(4)? as usize,
            total_groups: row.get::<_, i64>(5)? as usize,
            total_duplicates,
            potential_reduction: total_duplicates,
        },
        created_at,
    })
}

impl<'a> PassRepository for SqlitePassRepository<'a> {
    fn record(
        &self,
        entity: &str,
        threshold: f64,
        metric: &str,
        summary: Summary,
        groups: &[DuplicateGroup],
    ) -> Result<PassRecord> {
        let tx = self.conn.unchecked_transaction()?;

        let pass_number: u32 = tx.query_row(
            "SELECT COALESCE(MAX(pass_number), 0) + 1 FROM unify_passes WHERE entity = ?1",
            params![entity],
            |row| row.get(0),
        )?;
        let created_at = Utc::now();

        tx.execute(
            &format!("INSERT INTO unify_passes ({PASS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                entity,
                pass_number,
                threshold,
                metric,
                summary.original_count as i64,
                summary.total_groups as i64,
                summary.total_duplicates as i64,
                created_at.to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO unify_pass_members
                    (entity, pass_number, group_id, position, record_id, display_name,
                     attributes, score, suggested_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for group in groups {
                let members = std::iter::once((&group.main_candidate, 1.0)).chain(
                    group
                        .similar_candidates
                        .iter()
                        .map(|s| (&s.record, s.score)),
                );
                for (position, (record, score)) in members.enumerate() {
                    stmt.execute(params![
                        entity,
                        pass_number,
                        group.group_id,
                        position as i64,
                        record.id.as_str(),
                        record.display_name,
                        serde_json::to_string(&record.attributes)?,
                        score,
                        group.suggested_merge_name,
                    ])?;
                }
            }
        }

        tx.commit()?;

        Ok(PassRecord {
            entity: entity.to_string(),
            pass_number,
            threshold,
            metric: metric.to_string(),
            summary,
            created_at,
        })
    }

    fn list(&self, entity: &str) -> Result<Vec<PassRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PASS_COLUMNS} FROM unify_passes WHERE entity = ?1 ORDER BY pass_number"
        ))?;
        let rows = stmt.query_map(params![entity], row_to_pass)?;
        let mut passes = Vec::new();
        for row in rows {
            passes.push(row?);
        }
        Ok(passes)
    }

    fn find(&self, entity: &str, pass_number: u32) -> Result<Option<PassRecord>> {
        let pass = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PASS_COLUMNS} FROM unify_passes WHERE entity = ?1 AND pass_number = ?2"
                ),
                params![entity, pass_number],
                row_to_pass,
            )
            .optional()?;
        Ok(pass)
    }

    fn latest(&self, entity: &str) -> Result<Option<PassRecord>> {
        let pass = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PASS_COLUMNS} FROM unify_passes WHERE entity = ?1
                     ORDER BY pass_number DESC LIMIT 1"
                ),
                params![entity],
                row_to_pass,
            )
            .optional()?;
        Ok(pass)
    }

    fn load_groups(&self, entity: &str, pass_number: u32) -> Result<Vec<DuplicateGroup>> {
        if self.find(entity, pass_number)?.is_none() {
            return Err(UnifyError::PassNotFound(pass_number));
        }

        let mut stmt = self.conn.prepare(
            "SELECT group_id, position, record_id, display_name, attributes, score, suggested_name
             FROM unify_pass_members
             WHERE entity = ?1 AND pass_number = ?2
             ORDER BY group_id, position",
        )?;
        let rows = stmt.query_map(params![entity, pass_number], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let (group_id, position, record_id, display_name, attributes, score, suggested) = row?;
            let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes)?;
            let record = CandidateRecord {
                id: record_id.into(),
                display_name,
                attributes,
            };

            if position == 0 {
                groups.push(DuplicateGroup {
                    group_id,
                    main_candidate: record,
                    similar_candidates: Vec::new(),
                    suggested_merge_name: suggested,
                });
            } else if let Some(group) = groups.last_mut()
                && group.group_id == group_id
            {
                group.similar_candidates.push(SimilarCandidate { record, score });
            }
        }
        Ok(groups)
    }
}
