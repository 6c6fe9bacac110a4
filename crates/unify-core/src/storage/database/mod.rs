mod connection;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use migrations::{get_applied_versions, run_migrations, Migration};
pub use schema::SCHEMA_VERSION;

use std::path::Path;

use crate::error::Result;

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}
