//! `sightline-perception` – what the camera sees.
//!
//! # Modules
//!
//! - [`scheduler`] – [`FrameScheduler`][scheduler::FrameScheduler]: admits
//!   every N-th frame to detection.
//! - [`filter`] – [`ConfidenceFilter`][filter::ConfidenceFilter] and
//!   [`distinct_labels`][filter::distinct_labels].
//! - [`detector`] – the [`Detector`][detector::Detector] contract,
//!   [`CommandDetector`][detector::CommandDetector] (JSON-lines subprocess)
//!   and [`ScriptedDetector`][detector::ScriptedDetector] for tests.

pub mod detector;
pub mod filter;
pub mod scheduler;

pub use detector::{CommandDetector, Detector, ScriptedDetector};
pub use filter::{ConfidenceFilter, distinct_labels};
pub use scheduler::{Admission, FrameScheduler};
