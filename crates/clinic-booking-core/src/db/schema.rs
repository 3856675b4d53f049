//! SQLite schema definition.

/// Complete database schema for the booking core.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Clinic Sessions
-- ============================================================================

CREATE TABLE IF NOT EXISTS clinic_sessions (
    session_id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL,
    date TEXT NOT NULL,                          -- YYYY-MM-DD, clinic local
    period TEXT NOT NULL CHECK (period IN ('morning', 'afternoon', 'evening')),
    capacity INTEGER NOT NULL CHECK (capacity > 0),
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'stopped')),
    lock_version INTEGER NOT NULL DEFAULT 0,     -- bumped by every write lock
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sessions_provider ON clinic_sessions(provider_id, date, period);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON clinic_sessions(status, date);

-- ============================================================================
-- Appointments (never deleted)
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    appt_id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL,
    session_id INTEGER NOT NULL REFERENCES clinic_sessions(session_id),
    slot_seq INTEGER NOT NULL CHECK (slot_seq >= 1),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_appointments_session ON appointments(session_id, slot_seq);
-- One appointment identity per (patient, session); re-booking reuses it.
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_pair ON appointments(patient_id, session_id);

CREATE TRIGGER IF NOT EXISTS appointments_no_delete BEFORE DELETE ON appointments
BEGIN
    SELECT RAISE(ABORT, 'Appointments are never deleted');
END;

-- ============================================================================
-- Status Ledger (Append-Only - Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS status_events (
    event_id TEXT PRIMARY KEY,
    appt_id INTEGER NOT NULL REFERENCES appointments(appt_id),
    seq INTEGER NOT NULL CHECK (seq >= 1),
    from_status TEXT CHECK (from_status IN ('booked', 'checked_in', 'completed', 'cancelled', 'no_show')),
    to_status TEXT NOT NULL CHECK (to_status IN ('booked', 'checked_in', 'completed', 'cancelled', 'no_show')),
    actor_kind TEXT NOT NULL CHECK (actor_kind IN ('provider', 'patient')),
    actor_id INTEGER NOT NULL,
    changed_at TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    event_hash TEXT NOT NULL,
    UNIQUE (appt_id, seq)
);

CREATE TRIGGER IF NOT EXISTS status_events_no_update BEFORE UPDATE ON status_events
BEGIN
    SELECT RAISE(ABORT, 'Status events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS status_events_no_delete BEFORE DELETE ON status_events
BEGIN
    SELECT RAISE(ABORT, 'Status events are append-only');
END;

-- ============================================================================
-- Patient Standing
-- ============================================================================

CREATE TABLE IF NOT EXISTS patient_standing (
    patient_id INTEGER PRIMARY KEY,
    no_show_count INTEGER NOT NULL DEFAULT 0 CHECK (no_show_count >= 0),
    banned_until TEXT,                           -- YYYY-MM-DD, inclusive
    ban_issued_at_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per penalised appointment; the count is derived from these
CREATE TABLE IF NOT EXISTS no_show_records (
    patient_id INTEGER NOT NULL,
    appt_id INTEGER NOT NULL,
    reason TEXT NOT NULL CHECK (reason IN ('no_show', 'cancellation')),
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (patient_id, appt_id)
);

CREATE TRIGGER IF NOT EXISTS no_show_records_no_delete BEFORE DELETE ON no_show_records
BEGIN
    SELECT RAISE(ABORT, 'No-show history is retained');
END;

-- ============================================================================
-- Encounter Edit Leases
-- ============================================================================

CREATE TABLE IF NOT EXISTS encounter_leases (
    enct_id INTEGER PRIMARY KEY,
    holder INTEGER NOT NULL,
    acquired_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn seed_event(conn: &Connection) {
        conn.execute(
            "INSERT INTO clinic_sessions (provider_id, date, period, capacity) VALUES (1, '2026-03-02', 'morning', 2)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO appointments (patient_id, session_id, slot_seq, created_at) VALUES (5, 1, 1, '2026-03-01 10:00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO status_events
               (event_id, appt_id, seq, from_status, to_status, actor_kind, actor_id, changed_at, prev_hash, event_hash)
               VALUES ('e1', 1, 1, NULL, 'booked', 'provider', 1, '2026-03-01 10:00:00', '', 'h1')"#,
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_is_reapplicable() {
        let conn = setup();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_capacity_must_be_positive() {
        let conn = setup();
        let result = conn.execute(
            "INSERT INTO clinic_sessions (provider_id, date, period, capacity) VALUES (1, '2026-03-02', 'morning', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_status_events_reject_update_and_delete() {
        let conn = setup();
        seed_event(&conn);

        let update = conn.execute(
            "UPDATE status_events SET to_status = 'completed' WHERE event_id = 'e1'",
            [],
        );
        assert!(update.is_err());

        let delete = conn.execute("DELETE FROM status_events WHERE event_id = 'e1'", []);
        assert!(delete.is_err());

        let to_status: String = conn
            .query_row(
                "SELECT to_status FROM status_events WHERE event_id = 'e1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(to_status, "booked");
    }

    #[test]
    fn test_event_seq_unique_per_appointment() {
        let conn = setup();
        seed_event(&conn);

        let duplicate = conn.execute(
            r#"INSERT INTO status_events
               (event_id, appt_id, seq, from_status, to_status, actor_kind, actor_id, changed_at, prev_hash, event_hash)
               VALUES ('e2', 1, 1, 'booked', 'cancelled', 'provider', 1, '2026-03-01 10:05:00', 'h1', 'h2')"#,
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_one_appointment_per_patient_and_session() {
        let conn = setup();
        seed_event(&conn);
        let second = conn.execute(
            "INSERT INTO appointments (patient_id, session_id, slot_seq, created_at) VALUES (5, 1, 2, '2026-03-01 10:05:00')",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_appointments_never_deleted() {
        let conn = setup();
        seed_event(&conn);
        let result = conn.execute("DELETE FROM appointments WHERE appt_id = 1", []);
        assert!(result.is_err());
    }
}
