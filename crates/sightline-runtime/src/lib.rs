//! `sightline-runtime` – The Narration Loop
//!
//! Drives capture, detection, repetition control and speech, and records
//! every step in the audit store.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]: owns
//!   the camera, detector, narrator and audit store and runs the
//!   capture → detect → narrate cycle until asked to stop.
//! - [`cooldown`] – [`CooldownController`][cooldown::CooldownController]:
//!   suppresses a label once it has been spoken `max_repeat` times within the
//!   cooldown window.
//! - [`narration`] – [`NarrationManager`][narration::NarrationManager]:
//!   synthesizes and plays one message and audits the attempt.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod cooldown;
pub mod narration;
pub mod orchestrator;
pub mod telemetry;

pub use cooldown::{CooldownController, CooldownPolicy, LabelState};
pub use narration::{NarrationManager, NarrationOutcome, NarrationState};
pub use orchestrator::{CycleReport, Orchestrator, OrchestratorConfig, RunState};
pub use telemetry::{TelemetryConfig, TelemetryGuard, init_tracing};
