use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 2;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

/// Bookkeeping tables owned by the unifier. Entity and dependent tables
/// belong to the host application and are never created here.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS unify_passes (
            entity           TEXT NOT NULL,
            pass_number      INTEGER NOT NULL,
            threshold        REAL NOT NULL,
            metric           TEXT NOT NULL,
            candidate_count  INTEGER NOT NULL,
            total_groups     INTEGER NOT NULL,
            total_duplicates INTEGER NOT NULL,
            created_at       TEXT NOT NULL,
            PRIMARY KEY (entity, pass_number)
        );

        CREATE TABLE IF NOT EXISTS unify_merge_log (
            id               TEXT PRIMARY KEY,
            entity           TEXT NOT NULL,
            group_id         INTEGER NOT NULL,
            target_id        TEXT NOT NULL,
            absorbed_ids     TEXT NOT NULL DEFAULT '[]',
            final_name       TEXT NOT NULL,
            previous_name    TEXT,
            rows_repointed   INTEGER NOT NULL DEFAULT 0,
            success          INTEGER NOT NULL,
            error_message    TEXT,
            executed_at      TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_pass_members_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS unify_pass_members (
            entity         TEXT NOT NULL,
            pass_number    INTEGER NOT NULL,
            group_id       INTEGER NOT NULL,
            position       INTEGER NOT NULL,
            record_id      TEXT NOT NULL,
            display_name   TEXT NOT NULL,
            attributes     TEXT NOT NULL DEFAULT '{}',
            score          REAL NOT NULL,
            suggested_name TEXT NOT NULL,
            PRIMARY KEY (entity, pass_number, group_id, position),
            FOREIGN KEY (entity, pass_number)
                REFERENCES unify_passes(entity, pass_number) ON DELETE CASCADE
        );

        ALTER TABLE unify_merge_log ADD COLUMN pass_number INTEGER;

        CREATE INDEX IF NOT EXISTS idx_merge_log_entity ON unify_merge_log(entity, executed_at);
        ",
    )?;
    Ok(())
}
