use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V1Initial;

impl Migration for V1Initial {
    fn version(&self) -> u32 {
        1
    }

    fn description(&self) -> &'static str {
        "Pass history and merge audit log"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_tables(conn)
    }
}
