//! Status ledger database operations.
//!
//! Rows are only ever inserted; the schema triggers reject updates and
//! deletes.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::{Actor, Status, StatusEvent};

const EVENT_COLUMNS: &str = "event_id, appt_id, seq, from_status, to_status, actor_kind, actor_id, changed_at, prev_hash, event_hash";

pub fn insert_event(conn: &Connection, event: &StatusEvent) -> DbResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO status_events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            event.event_id,
            event.appt_id,
            event.seq,
            event.from_status.map(|s| s.as_str()),
            event.to_status.as_str(),
            event.changed_by.kind(),
            event.changed_by.id(),
            event.changed_at,
            event.prev_hash,
            event.event_hash,
        ],
    )?;
    Ok(())
}

/// Most recent event for an appointment.
pub fn latest_event(conn: &Connection, appt_id: i64) -> DbResult<Option<StatusEvent>> {
    conn.query_row(
        &format!(
            "SELECT {EVENT_COLUMNS} FROM status_events WHERE appt_id = ? ORDER BY seq DESC LIMIT 1"
        ),
        [appt_id],
        event_row,
    )
    .optional()?
    .map(TryInto::try_into)
    .transpose()
}

/// Full history in `seq` order.
pub fn event_history(conn: &Connection, appt_id: i64) -> DbResult<Vec<StatusEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM status_events WHERE appt_id = ? ORDER BY seq"
    ))?;
    let rows = stmt.query_map([appt_id], event_row)?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?.try_into()?);
    }
    Ok(events)
}

/// Latest `changed_at` across the whole ledger.
pub fn latest_changed_at(conn: &Connection) -> DbResult<Option<NaiveDateTime>> {
    let latest = conn.query_row("SELECT MAX(changed_at) FROM status_events", [], |row| {
        row.get::<_, Option<NaiveDateTime>>(0)
    })?;
    Ok(latest)
}

/// Appointment ids that have at least one event.
pub fn appointments_with_events(conn: &Connection) -> DbResult<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT DISTINCT appt_id FROM status_events ORDER BY appt_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

impl Database {
    /// Get an appointment's status history.
    pub fn get_history(&self, appt_id: i64) -> DbResult<Vec<StatusEvent>> {
        event_history(&self.conn, appt_id)
    }

    /// Current status; `None` if the appointment does not exist.
    pub fn get_current_status(&self, appt_id: i64) -> DbResult<Option<Status>> {
        Ok(super::fetch_appointment(&self.conn, appt_id)?.map(|view| view.status))
    }
}

/// Intermediate row struct for database mapping.
struct EventRow {
    event_id: String,
    appt_id: i64,
    seq: i64,
    from_status: Option<String>,
    to_status: String,
    actor_kind: String,
    actor_id: i64,
    changed_at: NaiveDateTime,
    prev_hash: String,
    event_hash: String,
}

fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        event_id: row.get(0)?,
        appt_id: row.get(1)?,
        seq: row.get(2)?,
        from_status: row.get(3)?,
        to_status: row.get(4)?,
        actor_kind: row.get(5)?,
        actor_id: row.get(6)?,
        changed_at: row.get(7)?,
        prev_hash: row.get(8)?,
        event_hash: row.get(9)?,
    })
}

fn parse_status(s: &str) -> DbResult<Status> {
    Status::parse(s).ok_or_else(|| DbError::Constraint(format!("Unknown appointment status: {s}")))
}

impl TryFrom<EventRow> for StatusEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let from_status = row.from_status.as_deref().map(parse_status).transpose()?;
        let to_status = parse_status(&row.to_status)?;
        let changed_by = Actor::from_parts(&row.actor_kind, row.actor_id)
            .ok_or_else(|| DbError::Constraint(format!("Unknown actor kind: {}", row.actor_kind)))?;

        Ok(StatusEvent {
            event_id: row.event_id,
            appt_id: row.appt_id,
            seq: row.seq,
            from_status,
            to_status,
            changed_by,
            changed_at: row.changed_at,
            prev_hash: row.prev_hash,
            event_hash: row.event_hash,
        })
    }
}
