use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::EntityConfig;
use crate::error::Result;
use crate::models::{CandidateRecord, RecordId};

/// Appended to an absorbed row's name; rows carrying it are no longer mergeable.
pub const MERGED_SUFFIX: &str = " [MERGED]";
pub const MERGED_STATUS: &str = "merged";

/// Whether a name carries the merged suffix. Matches the SQL predicate the
/// repository filters on: exact and case-sensitive.
pub fn has_merged_suffix(name: &str) -> bool {
    name.ends_with(MERGED_SUFFIX)
}

/// Current state of one entity row, as seen inside a merge transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub id: RecordId,
    pub name: String,
    pub merged: bool,
}

pub trait CandidateRepository {
    /// Every row that has not been merged away, ordered by id.
    fn list_active(&self) -> Result<Vec<CandidateRecord>>;
    fn count_active(&self) -> Result<usize>;
    fn find(&self, id: &RecordId) -> Result<Option<EntityRow>>;
}

pub struct SqliteCandidateRepository<'a> {
    conn: &'a Connection,
    entity: &'a EntityConfig,
}

impl<'a> SqliteCandidateRepository<'a> {
    pub fn new(conn: &'a Connection, entity: &'a EntityConfig) -> Self {
        Self { conn, entity }
    }

    /// SQL truth value for "this row has been merged away". Never NULL, so
    /// it can be negated safely.
    fn merged_expr(&self) -> String {
        let name = &self.entity.name_column;
        let suffix_len = MERGED_SUFFIX.chars().count();
        let mut expr =
            format!("COALESCE(substr({name}, -{suffix_len}), '') = '{MERGED_SUFFIX}'");
        if let Some(status) = &self.entity.status_column {
            expr.push_str(&format!(" OR COALESCE({status}, '') = '{MERGED_STATUS}'"));
        }
        format!("({expr})")
    }

    fn active_filter(&self) -> String {
        format!("NOT {}", self.merged_expr())
    }
}

impl<'a> CandidateRepository for SqliteCandidateRepository<'a> {
    fn list_active(&self) -> Result<Vec<CandidateRecord>> {
        let e = self.entity;
        let mut columns = vec![e.id_column.clone(), e.name_column.clone()];
        columns.extend(e.attribute_columns.iter().cloned());

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            columns.join(", "),
            e.table,
            self.active_filter(),
            e.id_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut attributes = BTreeMap::new();
            for (offset, column) in e.attribute_columns.iter().enumerate() {
                if let Some(value) = display_value(row.get::<_, Value>(offset + 2)?) {
                    attributes.insert(column.clone(), value);
                }
            }
            Ok(CandidateRecord {
                id: row.get(0)?,
                display_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                attributes,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn count_active(&self) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.entity.table,
            self.active_filter()
        );
        let count = self
            .conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0).map(|n| n as usize))?;
        Ok(count)
    }

    fn find(&self, id: &RecordId) -> Result<Option<EntityRow>> {
        let e = self.entity;
        let sql = format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = ?1",
            e.id_column,
            e.name_column,
            self.merged_expr(),
            e.table,
            e.id_column
        );
        let row = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok(EntityRow {
                    id: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    merged: row.get(2)?,
                })
            })
            .optional()?;
        Ok(row)
    }
}

fn display_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(_) => None,
    }
}
