//! Booking engine errors.

use chrono::NaiveDate;
use thiserror::Error;

use crate::audit::AuditError;
use crate::db::DbError;
use crate::models::Status;

#[derive(Error, Debug)]
pub enum BookingError {
    /// Entity missing or not owned by the caller
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Patient {patient_id} already holds a booking in session {session_id}")]
    DuplicateBooking { patient_id: i64, session_id: i64 },

    #[error("Session {0} is closed")]
    SessionClosed(i64),

    #[error("Session {0} is full")]
    SessionFull(i64),

    #[error("Patient is banned from booking until {until}")]
    Banned { until: NaiveDate },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: Status, to: Status },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

impl From<rusqlite::Error> for BookingError {
    fn from(e: rusqlite::Error) -> Self {
        BookingError::Database(DbError::Sqlite(e))
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    /// Stable client-visible code.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::NotFound(_) => "NOT_FOUND",
            BookingError::DuplicateBooking { .. } => "DUPLICATE_BOOKING",
            BookingError::SessionClosed(_) => "SESSION_CLOSED",
            BookingError::SessionFull(_) => "SESSION_FULL",
            BookingError::Banned { .. } => "BANNED",
            BookingError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            BookingError::InvalidInput(_) => "INVALID_INPUT",
            BookingError::Database(_) | BookingError::Audit(_) => "INTERNAL",
        }
    }

    /// Business-rule rejection, as opposed to an internal failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BookingError::Database(_) | BookingError::Audit(_))
    }

    pub(crate) fn not_found(what: &str, id: i64) -> Self {
        BookingError::NotFound(format!("{what} {id}"))
    }
}
