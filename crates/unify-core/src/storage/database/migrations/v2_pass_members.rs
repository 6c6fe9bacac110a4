use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V2PassMembers;

impl Migration for V2PassMembers {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Group snapshots per pass; pass number on merge log entries"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_pass_members_table(conn)
    }
}
