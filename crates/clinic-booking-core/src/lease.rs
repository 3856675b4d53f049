//! Encounter edit leases.
//!
//! Only one provider edits an encounter's notes at a time. A lease that is
//! not renewed expires on its own, so a crashed client never blocks others
//! for longer than the TTL.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::{self, Database, DbError};
use crate::models::EncounterLease;

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Encounter {enct_id} is locked by provider {holder}")]
    Locked { enct_id: i64, holder: i64 },

    #[error("Provider {holder} does not hold the lease on encounter {enct_id}")]
    NotHolder { enct_id: i64, holder: i64 },

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<rusqlite::Error> for LeaseError {
    fn from(e: rusqlite::Error) -> Self {
        LeaseError::Database(DbError::Sqlite(e))
    }
}

pub type LeaseResult<T> = Result<T, LeaseError>;

pub struct EncounterLocks<'a> {
    db: &'a mut Database,
    clock: &'a dyn Clock,
}

impl<'a> EncounterLocks<'a> {
    pub fn new(db: &'a mut Database, clock: &'a dyn Clock) -> Self {
        Self { db, clock }
    }

    /// Take or refresh the lease. Succeeds when the encounter is free, the
    /// caller already holds it, or the previous lease has expired.
    pub fn acquire(&mut self, enct_id: i64, holder: i64, ttl: Duration) -> LeaseResult<EncounterLease> {
        let now_ms = self.clock.now_millis();
        let tx = self.db.transaction()?;

        if let Some(current) = db::fetch_lease(&tx, enct_id)? {
            if current.holder != holder && !current.is_expired(now_ms) {
                return Err(LeaseError::Locked {
                    enct_id,
                    holder: current.holder,
                });
            }
        }

        let lease = EncounterLease {
            enct_id,
            holder,
            acquired_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_millis(ttl)),
        };
        db::upsert_lease(&tx, &lease)?;
        tx.commit()?;

        info!(enct_id, holder, expires_at_ms = lease.expires_at_ms, "encounter lease acquired");
        Ok(lease)
    }

    /// Extend a live lease held by `holder`.
    pub fn renew(&mut self, enct_id: i64, holder: i64, ttl: Duration) -> LeaseResult<EncounterLease> {
        let now_ms = self.clock.now_millis();
        let tx = self.db.transaction()?;

        let mut lease = db::fetch_lease(&tx, enct_id)?
            .filter(|l| l.is_held_by(holder, now_ms))
            .ok_or(LeaseError::NotHolder { enct_id, holder })?;
        lease.expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));
        db::upsert_lease(&tx, &lease)?;
        tx.commit()?;

        debug!(enct_id, holder, expires_at_ms = lease.expires_at_ms, "encounter lease renewed");
        Ok(lease)
    }

    /// Give up the lease. Only the current holder may release, even after
    /// expiry, as long as nobody else has taken it.
    pub fn release(&mut self, enct_id: i64, holder: i64) -> LeaseResult<()> {
        let tx = self.db.transaction()?;
        if !db::delete_lease(&tx, enct_id, holder)? {
            return Err(LeaseError::NotHolder { enct_id, holder });
        }
        tx.commit()?;

        info!(enct_id, holder, "encounter lease released");
        Ok(())
    }

    /// Current live lease, if any.
    pub fn current(&self, enct_id: i64) -> LeaseResult<Option<EncounterLease>> {
        let now_ms = self.clock.now_millis();
        Ok(self
            .db
            .get_lease(enct_id)?
            .filter(|l| !l.is_expired(now_ms)))
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}
