//! Tamper-evident status ledger.
//!
//! Each event stores the hash of its predecessor for the same appointment,
//! so rewriting any committed event breaks every later link.

mod chain;
mod report;

pub use chain::*;
pub use report::*;
