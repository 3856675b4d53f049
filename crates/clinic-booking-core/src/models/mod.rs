//! Domain models for the clinic booking system.

mod appointment;
mod encounter;
mod patient;
mod session;
mod status;

pub use appointment::*;
pub use encounter::*;
pub use patient::*;
pub use session::*;
pub use status::*;
