//! Canonical lock ordering for session rows.
//!
//! Every transaction that writes to more than one session locks the rows in
//! ascending `session_id` order, whatever order the caller named them in.

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::trace;

use super::error::{BookingError, BookingResult};
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet {
    sessions: BTreeSet<i64>,
}

impl LockSet {
    pub fn of<I: IntoIterator<Item = i64>>(session_ids: I) -> Self {
        Self {
            sessions: session_ids.into_iter().collect(),
        }
    }

    /// Session ids in acquisition order.
    pub fn order(&self) -> impl Iterator<Item = i64> + '_ {
        self.sessions.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Lock every session in order. Fails with `NotFound` at the first
    /// missing session; the caller's transaction then rolls back.
    pub fn acquire(&self, conn: &Connection) -> BookingResult<()> {
        for session_id in self.order() {
            trace!(session_id, "locking session row");
            if !db::lock_session(conn, session_id)? {
                return Err(BookingError::not_found("session", session_id));
            }
        }
        Ok(())
    }
}
