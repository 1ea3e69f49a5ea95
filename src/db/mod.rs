pub mod migrations;
pub mod queries;
pub mod repository;

use anyhow::Context;
use rusqlite::Connection;

pub use repository::{
    AuditRecord, BookingRepository, ListingRepository, PaymentRepository, PaymentUpdate,
    SqliteRepository,
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}
