//! Encounter lease database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbResult};
use crate::models::EncounterLease;

pub fn fetch_lease(conn: &Connection, enct_id: i64) -> DbResult<Option<EncounterLease>> {
    let lease = conn
        .query_row(
            r#"
            SELECT enct_id, holder, acquired_at_ms, expires_at_ms
            FROM encounter_leases
            WHERE enct_id = ?
            "#,
            [enct_id],
            |row| {
                Ok(EncounterLease {
                    enct_id: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at_ms: row.get(2)?,
                    expires_at_ms: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(lease)
}

pub fn upsert_lease(conn: &Connection, lease: &EncounterLease) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO encounter_leases (enct_id, holder, acquired_at_ms, expires_at_ms)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(enct_id) DO UPDATE SET
            holder = excluded.holder,
            acquired_at_ms = excluded.acquired_at_ms,
            expires_at_ms = excluded.expires_at_ms
        "#,
        params![lease.enct_id, lease.holder, lease.acquired_at_ms, lease.expires_at_ms],
    )?;
    Ok(())
}

/// Remove the lease only if `holder` owns it.
pub fn delete_lease(conn: &Connection, enct_id: i64, holder: i64) -> DbResult<bool> {
    let rows = conn.execute(
        "DELETE FROM encounter_leases WHERE enct_id = ?1 AND holder = ?2",
        params![enct_id, holder],
    )?;
    Ok(rows > 0)
}

impl Database {
    /// Get the stored lease for an encounter, expired or not.
    pub fn get_lease(&self, enct_id: i64) -> DbResult<Option<EncounterLease>> {
        fetch_lease(&self.conn, enct_id)
    }
}
