//! `sightline-memory` – The Audit Trail.
//!
//! Persists every session, admitted frame, detection, spoken message, audio
//! playback attempt and error of the perception loop to a local SQLite
//! database, and lets a second process tail it.
//!
//! # Modules
//!
//! - [`audit`] – [`AuditStore`][audit::AuditStore]: typed inserts, terminal
//!   state transitions and read-back queries over the six audit tables.
//! - [`observer`] – [`AuditObserver`][observer::AuditObserver]: watermark
//!   polling of new detections and spoken messages.
//! - [`records`] – row types and typed ids.
//! - [`schema`] – versioned migrations keyed on `PRAGMA user_version`.

pub mod audit;
pub mod observer;
pub mod records;
pub mod schema;

pub use audit::{AuditError, AuditStore};
pub use observer::{AuditObserver, ObservedBatch};
