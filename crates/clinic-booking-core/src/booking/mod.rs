//! Appointment booking and lifecycle.
//!
//! Components are thin views over one connection; [`BookingEngine`] opens
//! the transaction and hands the same connection to each of them.

mod cascade;
mod engine;
mod error;
mod ledger;
mod lock_order;
mod penalty;
mod sessions;

pub use cascade::*;
pub use engine::*;
pub use error::*;
pub use ledger::*;
pub use lock_order::*;
pub use penalty::*;
pub use sessions::*;
