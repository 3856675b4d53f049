//! Database layer for the booking core.
//!
//! Row access lives in free functions taking a `&Connection` so the same
//! code runs inside an engine transaction (a `Transaction` derefs to
//! `Connection`) or directly on a [`Database`] for reads.

mod schema;
mod sessions;
mod appointments;
mod ledger;
mod patients;
mod leases;

pub use schema::*;
pub use sessions::*;
pub use appointments::*;
pub use ledger::*;
pub use patients::*;
pub use leases::*;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Database connection wrapper.
///
/// One `Database` per worker; workers coordinate only through SQLite's
/// locking.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open database at path; contended writers wait up to `busy_timeout`.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction.
    ///
    /// `IMMEDIATE` takes the write lock up front, so two writers never both
    /// read and then race to upgrade. Dropping the transaction rolls back.
    pub fn transaction(&mut self) -> DbResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}
