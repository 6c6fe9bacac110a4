use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::RecordId;

/// Audit record of one executed merge decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub id: Uuid,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_number: Option<u32>,
    pub group_id: u32,
    pub target_id: RecordId,
    pub absorbed_ids: Vec<RecordId>,
    pub final_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
    pub rows_repointed: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

pub trait MergeLogRepository {
    fn append(&self, entry: &MergeLogEntry) -> Result<()>;
    /// Most recent first.
    fn list(&self, entity: &str, limit: usize) -> Result<Vec<MergeLogEntry>>;

    fn absorbed_total(&self, entity: &str) -> Result<usize>;
}

const LOG_COLUMNS: &str = "id, entity, pass_number, group_id, target_id, absorbed_ids, \
                           final_name, previous_name, rows_repointed, success, error_message, \
                           executed_at";

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MergeLogEntry> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?;
    let absorbed_ids: String = row.get(5)?;
    let absorbed_ids =
        serde_json::from_str(&absorbed_ids).map_err(|e| conversion_error(5, e))?;
    let executed_at: String = row.get(11)?;
    let executed_at = DateTime::parse_from_rfc3339(&executed_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(11, e))?;

    Ok(MergeLogEntry {
        id,
        entity: row.get(1)?,
        pass_number: row.get(2)?,
        group_id: row.get(3)?,
        target_id: row.get::<_, String>(4)?.into(),
        absorbed_ids,
        final_name: row.get(6)?,
        previous_name: row.get(7)?,
        rows_repointed: row.get::<_, i64>(8)? as usize,
        success: row.get(9)?,
        error_message: row.get(10)?,
        executed_at,
    })
}

pub struct SqliteMergeLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMergeLogRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl<'a> MergeLogRepository for SqliteMergeLogRepository<'a> {
    fn append(&self, entry: &MergeLogEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO unify_merge_log
                (id, entity, pass_number, group_id, target_id, absorbed_ids, final_name,
                 previous_name, rows_repointed, success, error_message, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id.to_string(),
                entry.entity,
                entry.pass_number,
                entry.group_id,
                entry.target_id.as_str(),
                serde_json::to_string(&entry.absorbed_ids)?,
                entry.final_name,
                entry.previous_name,
                entry.rows_repointed as i64,
                entry.success,
                entry.error_message,
                entry.executed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list(&self, entity: &str, limit: usize) -> Result<Vec<MergeLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity, pass_number, group_id, target_id, absorbed_ids, final_name,
                    previous_name, rows_repointed, success, error_message, executed_at
             FROM unify_merge_log
             WHERE entity = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![entity, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<u32>>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, bool>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (
                id,
                entity,
                pass_number,
                group_id,
                target_id,
                absorbed_ids,
                final_name,
                previous_name,
                rows_repointed,
                success,
                error_message,
                executed_at,
            ) = row?;

            entries.push(MergeLogEntry {
                id: Uuid::parse_str(&id).unwrap_or_default(),
                entity,
                pass_number,
                group_id,
                target_id: target_id.into(),
                absorbed_ids: serde_json::from_str(&absorbed_ids)?,
                final_name,
                previous_name,
                rows_repointed: rows_repointed as usize,
                success,
                error_message,
                executed_at: DateTime::parse_from_rfc3339(&executed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(entries)
    }

    fn absorbed_total(&self, entity: &str) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT absorbed_ids FROM unify_merge_log WHERE entity = ?1 AND success = 1",
        )?;
        let rows = stmt.query_map(params![entity], |row| row.get::<_, String>(0))?;
        let mut total = 0;
        for row in rows {
            let ids: Vec<RecordId> = serde_json::from_str(&row?)?;
            total += ids.len();
        }
        Ok(total)
    }
}
