//! Hash chain over an appointment's status events.

use chrono::NaiveDateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::{self, Database};
use crate::models::{Actor, Status, StatusEvent};

use super::report::{ChainBreak, ChainReport};

/// Audit errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Fields covered by an event hash, in fixed order.
#[derive(Serialize)]
struct EventPayload<'a> {
    event_id: &'a str,
    appt_id: i64,
    seq: i64,
    from_status: Option<Status>,
    to_status: Status,
    changed_by: Actor,
    changed_at: NaiveDateTime,
    prev_hash: &'a str,
}

/// Compute SHA-256 hash of data.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of an event's content and its `prev_hash`; `event_hash` itself is
/// not covered.
pub fn compute_event_hash(event: &StatusEvent) -> AuditResult<String> {
    let payload = EventPayload {
        event_id: &event.event_id,
        appt_id: event.appt_id,
        seq: event.seq,
        from_status: event.from_status,
        to_status: event.to_status,
        changed_by: event.changed_by,
        changed_at: event.changed_at,
        prev_hash: &event.prev_hash,
    };
    let json = serde_json::to_string(&payload)?;
    Ok(hash_data(json.as_bytes()))
}

/// Check one appointment's history, given in `seq` order.
///
/// Returns the first break found, if any.
pub fn verify_events(events: &[StatusEvent]) -> AuditResult<Option<ChainBreak>> {
    let mut previous: Option<&StatusEvent> = None;

    for event in events {
        let expected_seq = previous.map_or(1, |p| p.seq + 1);
        if event.seq != expected_seq {
            return Ok(Some(ChainBreak::new(event, format!("expected seq {expected_seq}"))));
        }

        let expected_prev = previous.map_or("", |p| p.event_hash.as_str());
        if event.prev_hash != expected_prev {
            return Ok(Some(ChainBreak::new(event, "prev_hash does not match predecessor")));
        }

        if compute_event_hash(event)? != event.event_hash {
            return Ok(Some(ChainBreak::new(event, "event_hash does not match content")));
        }

        if let Some(p) = previous {
            if event.changed_at <= p.changed_at {
                return Ok(Some(ChainBreak::new(event, "changed_at not after predecessor")));
            }
            if event.from_status != Some(p.to_status) {
                return Ok(Some(ChainBreak::new(event, "from_status does not continue history")));
            }
        } else if event.from_status.is_some() {
            return Ok(Some(ChainBreak::new(event, "first event must have no from_status")));
        }

        previous = Some(event);
    }

    Ok(None)
}

/// Ledger verifier.
pub struct AuditLog<'a> {
    db: &'a Database,
}

impl<'a> AuditLog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Verify a single appointment's chain.
    pub fn verify_appointment(&self, appt_id: i64) -> AuditResult<ChainReport> {
        let events = db::event_history(self.db.conn(), appt_id)?;
        let broken = verify_events(&events)?;
        Ok(ChainReport {
            appointments_checked: 1,
            events_checked: events.len(),
            head_hash: events.last().map(|e| e.event_hash.clone()),
            breaks: broken.into_iter().collect(),
        })
    }

    /// Verify every appointment that has at least one event.
    pub fn verify_all(&self) -> AuditResult<ChainReport> {
        let appt_ids = db::appointments_with_events(self.db.conn())?;

        let mut report = ChainReport::default();
        for appt_id in appt_ids {
            let single = self.verify_appointment(appt_id)?;
            report.merge(single);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
    }

    fn chain(statuses: &[Status]) -> Vec<StatusEvent> {
        let mut events: Vec<StatusEvent> = Vec::new();
        for (i, to_status) in statuses.iter().enumerate() {
            let prev = events.last();
            let mut event = StatusEvent {
                event_id: format!("event-{i}"),
                appt_id: 1,
                seq: i as i64 + 1,
                from_status: prev.map(|p| p.to_status),
                to_status: *to_status,
                changed_by: Actor::Provider(10),
                changed_at: at(i as u32),
                prev_hash: prev.map(|p| p.event_hash.clone()).unwrap_or_default(),
                event_hash: String::new(),
            };
            event.event_hash = compute_event_hash(&event).unwrap();
            events.push(event);
        }
        events
    }

    #[test]
    fn test_hash_is_deterministic() {
        let events = chain(&[Status::Booked]);
        assert_eq!(compute_event_hash(&events[0]).unwrap(), events[0].event_hash);
        assert_eq!(events[0].event_hash.len(), 64);
    }

    #[test]
    fn test_valid_chain_verifies() {
        let events = chain(&[Status::Booked, Status::CheckedIn, Status::Completed]);
        assert_eq!(verify_events(&events).unwrap(), None);
    }

    #[test]
    fn test_rewritten_status_is_detected() {
        let mut events = chain(&[Status::Booked, Status::Cancelled, Status::Booked]);
        events[1].to_status = Status::NoShow;

        let broken = verify_events(&events).unwrap().unwrap();
        assert_eq!(broken.seq, 2);
    }

    #[test]
    fn test_dropped_event_is_detected() {
        let mut events = chain(&[Status::Booked, Status::CheckedIn, Status::Completed]);
        events.remove(1);

        let broken = verify_events(&events).unwrap().unwrap();
        assert_eq!(broken.seq, 3);
    }

    #[test]
    fn test_repeated_timestamp_is_detected() {
        let mut events = chain(&[Status::Booked, Status::Cancelled]);
        events[1].changed_at = events[0].changed_at;
        events[1].event_hash = compute_event_hash(&events[1]).unwrap();

        let broken = verify_events(&events).unwrap().unwrap();
        assert_eq!(broken.seq, 2);
        assert_eq!(broken.reason, "changed_at not after predecessor");
    }

    #[test]
    fn test_verify_empty_database() {
        let db = Database::open_in_memory().unwrap();
        let report = AuditLog::new(&db).verify_all().unwrap();
        assert!(report.is_intact());
        assert_eq!(report.events_checked, 0);
    }
}
