//! Clinic Booking Core Library
//!
//! Appointment booking and lifecycle engine for outpatient clinics: finite
//! per-session capacity under concurrent requests, an append-only status
//! history per appointment, queue-order no-show inference and a booking ban
//! for repeat no-shows.
//!
//! # Architecture
//!
//! ```text
//!   create / cancel / checkin / reschedule / update_status
//!                          │
//!              BEGIN IMMEDIATE + LockSet (ascending session ids)
//!                          │
//!        ┌─────────────────┼─────────────────┐
//!        ▼                 ▼                 ▼
//!   SessionStore     PenaltyTracker     StatusLedger
//!  capacity, window   bans, records    append-only events
//!                                            │
//!                                     NoShowCascade
//!                                 (after every status change)
//!                                            │
//!                                  ┌─────────▼─────────┐
//!                                  │   Audit chain     │
//!                                  │ hash(prev, event) │
//!                                  └───────────────────┘
//! ```
//!
//! # Core Principle
//!
//! **Current status is never stored.** It is always the last event in the
//! ledger; an appointment with no events is booked.
//!
//! # Modules
//!
//! - [`db`]: SQLite storage layer
//! - [`models`]: Domain types (ClinicSession, Appointment, StatusEvent, etc.)
//! - [`booking`]: Booking engine, cascade and penalties
//! - [`audit`]: Hash-chain verification of the status ledger
//! - [`lease`]: Encounter edit leases
//! - [`config`], [`clock`]: Runtime configuration and time source

pub mod audit;
pub mod booking;
pub mod clock;
pub mod config;
pub mod db;
pub mod lease;
pub mod models;

// Re-export commonly used types
pub use audit::{AuditLog, ChainReport};
pub use booking::{BookingEngine, BookingError, BookingResult, Settlement};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{BookingConfig, PenaltyPolicy};
pub use db::Database;
pub use lease::{EncounterLocks, LeaseError};
pub use models::{
    Actor, Appointment, AppointmentView, CapacityInfo, ClinicSession, EncounterLease,
    PatientStanding, Period, SessionStatus, Status, StatusEvent,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

// =========================================================================
// FFI Error Type
// =========================================================================

/// Client-visible errors; one variant per error kind.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicBookingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate booking: {0}")]
    DuplicateBooking(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Session full: {0}")]
    SessionFull(String),

    #[error("Banned until {0}")]
    Banned(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encounter locked by provider {0}")]
    Locked(i64),

    #[error("Not the lease holder: {0}")]
    NotHolder(String),

    #[error("Internal error")]
    Internal,
}

impl From<BookingError> for ClinicBookingError {
    fn from(e: BookingError) -> Self {
        let message = e.to_string();
        match e {
            BookingError::NotFound(_) => ClinicBookingError::NotFound(message),
            BookingError::DuplicateBooking { .. } => ClinicBookingError::DuplicateBooking(message),
            BookingError::SessionClosed(_) => ClinicBookingError::SessionClosed(message),
            BookingError::SessionFull(_) => ClinicBookingError::SessionFull(message),
            BookingError::Banned { until } => ClinicBookingError::Banned(until.to_string()),
            BookingError::IllegalTransition { .. } => {
                ClinicBookingError::IllegalTransition(message)
            }
            BookingError::InvalidInput(_) => ClinicBookingError::InvalidInput(message),
            BookingError::Database(_) | BookingError::Audit(_) => internal(&message),
        }
    }
}

impl From<lease::LeaseError> for ClinicBookingError {
    fn from(e: lease::LeaseError) -> Self {
        match e {
            LeaseError::Locked { holder, .. } => ClinicBookingError::Locked(holder),
            LeaseError::NotHolder { .. } => ClinicBookingError::NotHolder(e.to_string()),
            LeaseError::Database(_) => internal(&e.to_string()),
        }
    }
}

impl From<db::DbError> for ClinicBookingError {
    fn from(e: db::DbError) -> Self {
        internal(&e.to_string())
    }
}

impl From<audit::AuditError> for ClinicBookingError {
    fn from(e: audit::AuditError) -> Self {
        internal(&e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicBookingError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        internal(&format!("Lock poisoned: {}", e))
    }
}

/// Log the detail, hand the caller nothing but the kind.
fn internal(detail: &str) -> ClinicBookingError {
    tracing::error!(detail, "internal error");
    ClinicBookingError::Internal
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install a `tracing` subscriber. `filter` uses `EnvFilter` syntax; when
/// absent, `RUST_LOG` is used, falling back to `info`. Later calls are
/// ignored.
#[uniffi::export]
pub fn init_logging(filter: Option<String>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open or create a database at the given path with default settings.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<ClinicBookingCore>, ClinicBookingError> {
    ClinicBookingCore::open(BookingConfig::with_path(path))
}

/// Open the database described by the `CLINIC_*` environment variables.
#[uniffi::export]
pub fn open_database_from_env() -> Result<Arc<ClinicBookingCore>, ClinicBookingError> {
    let config = BookingConfig::from_env()
        .map_err(|e| ClinicBookingError::InvalidInput(format!("{e:#}")))?;
    ClinicBookingCore::open(config)
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ClinicBookingCore>, ClinicBookingError> {
    let db = Database::open_in_memory()?;
    Ok(ClinicBookingCore::with_clock(
        db,
        Arc::new(SystemClock),
        BookingConfig::default(),
    ))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
///
/// Each instance owns one connection. Run one instance per worker against
/// the same database file; they coordinate through SQLite locking.
#[derive(uniffi::Object)]
pub struct ClinicBookingCore {
    db: Arc<Mutex<Database>>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl ClinicBookingCore {
    fn open(config: BookingConfig) -> Result<Arc<Self>, ClinicBookingError> {
        let db = Database::open_with_timeout(&config.database_path, config.busy_timeout)?;
        tracing::info!(path = %config.database_path, "database opened");
        Ok(Self::with_clock(db, Arc::new(SystemClock), config))
    }

    /// Build around an existing database and time source.
    pub fn with_clock(db: Database, clock: Arc<dyn Clock>, config: BookingConfig) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            clock,
            config,
        })
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut BookingEngine<'_>) -> BookingResult<T>,
    ) -> Result<T, ClinicBookingError> {
        let mut db = self.db.lock()?;
        let mut engine = BookingEngine::new(&mut db, self.clock.as_ref(), &self.config.penalty);
        Ok(f(&mut engine)?)
    }

    fn with_locks<T>(
        &self,
        f: impl FnOnce(&mut EncounterLocks<'_>) -> lease::LeaseResult<T>,
    ) -> Result<T, ClinicBookingError> {
        let mut db = self.db.lock()?;
        let mut locks = EncounterLocks::new(&mut db, self.clock.as_ref());
        Ok(f(&mut locks)?)
    }
}

#[uniffi::export]
impl ClinicBookingCore {
    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Create a session. `date` is `YYYY-MM-DD`, `period` one of
    /// `morning`, `afternoon`, `evening`.
    pub fn create_session(
        &self,
        provider_id: i64,
        date: String,
        period: String,
        capacity: i64,
    ) -> Result<FfiSession, ClinicBookingError> {
        let date = parse_date(&date)?;
        let period = parse_period(&period)?;
        let session =
            self.with_engine(|e| e.create_session(provider_id, date, period, capacity))?;
        Ok(session.into())
    }

    pub fn update_session(
        &self,
        provider_id: i64,
        session_id: i64,
        date: String,
        period: String,
        capacity: i64,
    ) -> Result<FfiSession, ClinicBookingError> {
        let date = parse_date(&date)?;
        let period = parse_period(&period)?;
        let session = self.with_engine(|e| {
            e.update_session(provider_id, session_id, date, period, capacity)
        })?;
        Ok(session.into())
    }

    pub fn cancel_session(
        &self,
        provider_id: i64,
        session_id: i64,
    ) -> Result<FfiSession, ClinicBookingError> {
        let session = self.with_engine(|e| e.cancel_session(provider_id, session_id))?;
        Ok(session.into())
    }

    pub fn sessions_for_provider(
        &self,
        provider_id: i64,
    ) -> Result<Vec<FfiSession>, ClinicBookingError> {
        let sessions = self.with_engine(|e| e.sessions_for_provider(provider_id))?;
        Ok(sessions.into_iter().map(|s| s.into()).collect())
    }

    pub fn capacity_info(&self, session_id: i64) -> Result<FfiCapacityInfo, ClinicBookingError> {
        let info = self.with_engine(|e| e.capacity_info(session_id))?;
        Ok(info.into())
    }

    /// Whether the session is still bookable by time; stops it if not.
    pub fn is_within_booking_window(&self, session_id: i64) -> Result<bool, ClinicBookingError> {
        self.with_engine(|e| e.is_within_booking_window(session_id))
    }

    /// Stop every session whose window has ended.
    pub fn close_elapsed_sessions(&self) -> Result<Vec<i64>, ClinicBookingError> {
        self.with_engine(|e| e.close_elapsed_sessions())
    }

    /// Confirm the no-shows of an ended session.
    pub fn settle_session(&self, session_id: i64) -> Result<FfiSettlement, ClinicBookingError> {
        let settlement = self.with_engine(|e| e.settle_session(session_id))?;
        Ok(settlement.into())
    }

    // =========================================================================
    // Appointment Operations
    // =========================================================================

    pub fn create_appointment(
        &self,
        patient_id: i64,
        session_id: i64,
    ) -> Result<FfiAppointment, ClinicBookingError> {
        let view = self.with_engine(|e| e.create(patient_id, session_id))?;
        Ok(view.into())
    }

    pub fn cancel_appointment(
        &self,
        appt_id: i64,
        patient_id: i64,
    ) -> Result<FfiAppointment, ClinicBookingError> {
        let view = self.with_engine(|e| e.cancel(appt_id, patient_id))?;
        Ok(view.into())
    }

    pub fn reschedule_appointment(
        &self,
        appt_id: i64,
        old_session_id: i64,
        new_session_id: i64,
        patient_id: i64,
    ) -> Result<FfiAppointment, ClinicBookingError> {
        let view = self.with_engine(|e| {
            e.reschedule(appt_id, old_session_id, new_session_id, patient_id)
        })?;
        Ok(view.into())
    }

    pub fn checkin(
        &self,
        appt_id: i64,
        patient_id: i64,
    ) -> Result<FfiAppointment, ClinicBookingError> {
        let view = self.with_engine(|e| e.checkin(appt_id, patient_id))?;
        Ok(view.into())
    }

    /// Provider status change; `status` uses the storage names
    /// (`checked_in`, `completed`, `cancelled`, `no_show`).
    pub fn update_status(
        &self,
        provider_id: i64,
        appt_id: i64,
        status: String,
    ) -> Result<FfiAppointment, ClinicBookingError> {
        let status = Status::parse(&status)
            .ok_or_else(|| ClinicBookingError::InvalidInput(format!("unknown status: {status}")))?;
        let view = self.with_engine(|e| e.update_status(provider_id, appt_id, status))?;
        Ok(view.into())
    }

    pub fn appointments_for_session(
        &self,
        session_id: i64,
    ) -> Result<Vec<FfiAppointment>, ClinicBookingError> {
        let views = self.with_engine(|e| e.appointments_for_session(session_id))?;
        Ok(views.into_iter().map(|v| v.into()).collect())
    }

    pub fn appointments_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<FfiAppointment>, ClinicBookingError> {
        let views = self.with_engine(|e| e.appointments_for_patient(patient_id))?;
        Ok(views.into_iter().map(|v| v.into()).collect())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Current status from the ledger.
    pub fn latest_status(&self, appt_id: i64) -> Result<String, ClinicBookingError> {
        let status = self.with_engine(|e| e.latest_status(appt_id))?;
        Ok(status.as_str().to_string())
    }

    pub fn status_history(&self, appt_id: i64) -> Result<Vec<FfiStatusEvent>, ClinicBookingError> {
        let events = self.with_engine(|e| e.history(appt_id))?;
        Ok(events.into_iter().map(|e| e.into()).collect())
    }

    /// Recompute every hash link in the ledger.
    pub fn verify_audit_log(&self) -> Result<FfiAuditReport, ClinicBookingError> {
        let db = self.db.lock()?;
        let report = AuditLog::new(&db).verify_all()?;
        Ok(report.into())
    }

    // =========================================================================
    // Penalty Operations
    // =========================================================================

    pub fn is_banned(&self, patient_id: i64) -> Result<FfiBanStatus, ClinicBookingError> {
        let (banned, until) = self.with_engine(|e| e.is_banned(patient_id))?;
        Ok(FfiBanStatus {
            banned,
            banned_until: until.map(|d| d.to_string()),
        })
    }

    pub fn patient_standing(&self, patient_id: i64) -> Result<FfiStanding, ClinicBookingError> {
        let standing = self.with_engine(|e| e.standing(patient_id))?;
        Ok(standing.into())
    }

    // =========================================================================
    // Encounter Lock Operations
    // =========================================================================

    /// Lease an encounter for editing with the configured TTL.
    pub fn lock_encounter(&self, enct_id: i64, holder: i64) -> Result<FfiLease, ClinicBookingError> {
        let ttl = self.config.encounter_lock_ttl;
        let lease = self.with_locks(|l| l.acquire(enct_id, holder, ttl))?;
        Ok(lease.into())
    }

    pub fn renew_encounter_lock(
        &self,
        enct_id: i64,
        holder: i64,
    ) -> Result<FfiLease, ClinicBookingError> {
        let ttl = self.config.encounter_lock_ttl;
        let lease = self.with_locks(|l| l.renew(enct_id, holder, ttl))?;
        Ok(lease.into())
    }

    pub fn unlock_encounter(&self, enct_id: i64, holder: i64) -> Result<(), ClinicBookingError> {
        self.with_locks(|l| l.release(enct_id, holder))
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ClinicBookingError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ClinicBookingError::InvalidInput(format!("invalid date {raw:?}: {e}")))
}

fn parse_period(raw: &str) -> Result<Period, ClinicBookingError> {
    Period::parse(raw)
        .ok_or_else(|| ClinicBookingError::InvalidInput(format!("unknown period: {raw}")))
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe session.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSession {
    pub session_id: i64,
    pub provider_id: i64,
    pub date: String,
    pub period: String,
    pub capacity: i64,
    pub status: String,
}

impl From<ClinicSession> for FfiSession {
    fn from(session: ClinicSession) -> Self {
        Self {
            session_id: session.session_id,
            provider_id: session.provider_id,
            date: session.date.to_string(),
            period: session.period.as_str().to_string(),
            capacity: session.capacity,
            status: session.status.as_str().to_string(),
        }
    }
}

/// FFI-safe capacity snapshot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCapacityInfo {
    pub session_id: i64,
    pub capacity: i64,
    pub active_booked: i64,
    pub remaining: i64,
    pub status: String,
    pub window_start: String,
    pub window_end: String,
}

impl From<CapacityInfo> for FfiCapacityInfo {
    fn from(info: CapacityInfo) -> Self {
        Self {
            session_id: info.session_id,
            capacity: info.capacity,
            active_booked: info.active_booked,
            remaining: info.remaining(),
            status: info.status.as_str().to_string(),
            window_start: info.window.start.to_string(),
            window_end: info.window.end.to_string(),
        }
    }
}

/// FFI-safe appointment with its current status.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub appt_id: i64,
    pub patient_id: i64,
    pub session_id: i64,
    pub slot_seq: i64,
    pub status: String,
    pub created_at: String,
}

impl From<AppointmentView> for FfiAppointment {
    fn from(view: AppointmentView) -> Self {
        Self {
            appt_id: view.appointment.appt_id,
            patient_id: view.appointment.patient_id,
            session_id: view.appointment.session_id,
            slot_seq: view.appointment.slot_seq,
            status: view.status.as_str().to_string(),
            created_at: view.appointment.created_at.to_string(),
        }
    }
}

/// FFI-safe ledger event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStatusEvent {
    pub event_id: String,
    pub appt_id: i64,
    pub seq: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor_kind: String,
    pub actor_id: i64,
    pub changed_at: String,
    pub event_hash: String,
}

impl From<StatusEvent> for FfiStatusEvent {
    fn from(event: StatusEvent) -> Self {
        Self {
            event_id: event.event_id,
            appt_id: event.appt_id,
            seq: event.seq,
            from_status: event.from_status.map(|s| s.as_str().to_string()),
            to_status: event.to_status.as_str().to_string(),
            actor_kind: event.changed_by.kind().to_string(),
            actor_id: event.changed_by.id(),
            changed_at: event.changed_at.to_string(),
            event_hash: event.event_hash,
        }
    }
}

/// FFI-safe settlement result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSettlement {
    pub session_id: i64,
    pub marked_no_show: Vec<i64>,
    pub penalised: Vec<i64>,
}

impl From<Settlement> for FfiSettlement {
    fn from(settlement: Settlement) -> Self {
        Self {
            session_id: settlement.session_id,
            marked_no_show: settlement.marked_no_show,
            penalised: settlement.penalised,
        }
    }
}

/// FFI-safe ban check result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBanStatus {
    pub banned: bool,
    pub banned_until: Option<String>,
}

/// FFI-safe patient standing.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStanding {
    pub patient_id: i64,
    pub no_show_count: i64,
    pub banned_until: Option<String>,
}

impl From<PatientStanding> for FfiStanding {
    fn from(standing: PatientStanding) -> Self {
        Self {
            patient_id: standing.patient_id,
            no_show_count: standing.no_show_count,
            banned_until: standing.banned_until.map(|d| d.to_string()),
        }
    }
}

/// FFI-safe encounter lease.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLease {
    pub enct_id: i64,
    pub holder: i64,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}

impl From<EncounterLease> for FfiLease {
    fn from(lease: EncounterLease) -> Self {
        Self {
            enct_id: lease.enct_id,
            holder: lease.holder,
            acquired_at_ms: lease.acquired_at_ms,
            expires_at_ms: lease.expires_at_ms,
        }
    }
}

/// FFI-safe audit verification report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAuditReport {
    pub intact: bool,
    pub appointments_checked: u64,
    pub events_checked: u64,
    pub broken_appointments: Vec<i64>,
}

impl From<ChainReport> for FfiAuditReport {
    fn from(report: ChainReport) -> Self {
        Self {
            intact: report.is_intact(),
            appointments_checked: report.appointments_checked as u64,
            events_checked: report.events_checked as u64,
            broken_appointments: report.breaks.iter().map(|b| b.appt_id).collect(),
        }
    }
}
