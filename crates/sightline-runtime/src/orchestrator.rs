//! [`Orchestrator`] – the perception-to-narration loop.
//!
//! Each cycle:
//!
//! 1. **Capture** – grab a frame from the [`Camera`] and bump the frame
//!    counter.
//! 2. **Schedule** – ask the [`FrameScheduler`]; skipped frames end the
//!    cycle without touching the detector.
//! 3. **Detect** – run the [`Detector`] and the [`ConfidenceFilter`], timing
//!    both, then persist the frame event and every surviving detection.
//! 4. **Narrate** – for each distinct label that the [`CooldownController`]
//!    allows, hand the label to the [`NarrationManager`].
//!
//! [`Orchestrator::run`] drives cycles until the shutdown flag is raised.
//! Any error out of a cycle is recorded as a `RUNTIME` error row against the
//! active session before cleanup. The camera and the session are released on
//! every exit path, including drop.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::AtomicBool;
//!
//! use sightline_hal::sim::{NullSink, ScriptedSynthesizer, SimCamera};
//! use sightline_memory::AuditStore;
//! use sightline_perception::ScriptedDetector;
//! use sightline_runtime::narration::NarrationManager;
//! use sightline_runtime::orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let narrator = NarrationManager::new(
//!     Box::new(ScriptedSynthesizer::new()),
//!     Box::new(NullSink::new("null")),
//!     "en",
//! );
//! let mut orchestrator = Orchestrator::new(
//!     OrchestratorConfig::default(),
//!     Box::new(SimCamera::new("sim", 4, 4)),
//!     Box::new(ScriptedDetector::new()),
//!     narrator,
//!     AuditStore::open_in_memory().unwrap(),
//! )
//! .unwrap();
//!
//! // Already-raised flag: start, then shut down immediately.
//! orchestrator.run(&AtomicBool::new(true)).unwrap();
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sightline_hal::camera::Camera;
use sightline_memory::audit::AuditStore;
use sightline_memory::records::{FrameId, SessionId};
use sightline_perception::{Admission, ConfidenceFilter, Detector, FrameScheduler, distinct_labels};
use sightline_types::{Component, Severity, SightError};
use tracing::{debug, debug_span, error, info, warn};

use crate::cooldown::{CooldownController, CooldownPolicy};
use crate::narration::{NarrationManager, NarrationOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`Orchestrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Run detection on every N-th captured frame.
    pub infer_every_n_frames: u64,
    /// Detections below this confidence are discarded.
    pub confidence_threshold: f32,
    /// Narrations of one label before the cooldown applies.
    pub max_repeat: u32,
    pub cooldown_seconds: u64,
    /// Stored on the run session row.
    pub app_version: String,
    pub model_id: Option<i64>,
    pub device_notes: Option<String>,
    /// Sleep between cycles in [`Orchestrator::run`].
    pub pacing: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            infer_every_n_frames: 3,
            confidence_threshold: 0.35,
            max_repeat: 2,
            cooldown_seconds: 600,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            model_id: Some(1),
            device_notes: Some("Raspberry Pi target".to_string()),
            pacing: Duration::from_millis(10),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// What one [`Orchestrator::run_cycle`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub frame_number: u64,
    /// `Some` when the frame was admitted and persisted.
    pub frame_id: Option<FrameId>,
    pub detect_ms: u64,
    /// Distinct labels that passed the confidence filter.
    pub labels: BTreeSet<String>,
    pub spoken: Vec<String>,
    pub failed: Vec<String>,
    pub suppressed: Vec<String>,
}

impl CycleReport {
    pub fn admitted(&self) -> bool {
        self.frame_id.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every collaborator of the loop and the audit store.
pub struct Orchestrator {
    config: OrchestratorConfig,
    camera: Option<Box<dyn Camera>>,
    detector: Box<dyn Detector>,
    scheduler: FrameScheduler,
    filter: ConfidenceFilter,
    cooldown: CooldownController,
    narrator: NarrationManager,
    store: AuditStore,
    state: RunState,
    session: Option<SessionId>,
    frame_counter: u64,
}

impl Orchestrator {
    /// Wire up an orchestrator in the [`RunState::Stopped`] state.
    ///
    /// # Errors
    ///
    /// Returns [`SightError::Config`] if the frame interval is zero, the
    /// confidence threshold lies outside `[0, 1]`, or the cooldown does not
    /// fit in a time span.
    pub fn new(
        config: OrchestratorConfig,
        camera: Box<dyn Camera>,
        detector: Box<dyn Detector>,
        narrator: NarrationManager,
        store: AuditStore,
    ) -> Result<Self, SightError> {
        let scheduler = FrameScheduler::new(config.infer_every_n_frames)?;
        let filter = ConfidenceFilter::new(config.confidence_threshold)?;
        let cooldown = CooldownController::new(CooldownPolicy::new(config.max_repeat, config.cooldown_seconds)?);
        Ok(Self {
            config,
            camera: Some(camera),
            detector,
            scheduler,
            filter,
            cooldown,
            narrator,
            store,
            state: RunState::Stopped,
            session: None,
            frame_counter: 0,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The active session, or the last one after [`stop`](Self::stop).
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    pub fn cooldown(&self) -> &CooldownController {
        &self.cooldown
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open a new run session. A no-op while already running.
    pub fn start(&mut self) -> Result<SessionId, SightError> {
        if let (RunState::Running, Some(session)) = (self.state, self.session) {
            info!(session_id = %session, "orchestrator already running");
            return Ok(session);
        }
        let session = self.store.create_session(
            &self.config.app_version,
            self.config.model_id,
            self.config.device_notes.as_deref(),
        )?;
        self.session = Some(session);
        self.frame_counter = 0;
        self.state = RunState::Running;
        info!(
            session_id = %session,
            infer_every = self.scheduler.interval(),
            threshold = self.filter.threshold(),
            "orchestrator started"
        );
        Ok(session)
    }

    /// Finalize the run session. A no-op while already stopped.
    pub fn stop(&mut self) -> Result<(), SightError> {
        let session = match (self.state, self.session) {
            (RunState::Running, Some(session)) => session,
            _ => {
                info!("orchestrator already stopped");
                return Ok(());
            }
        };
        // Stays Running on failure so shutdown can try again.
        self.store.end_session(session)?;
        self.state = RunState::Stopped;
        info!(session_id = %session, frames = self.frame_counter, "orchestrator stopped");
        Ok(())
    }

    /// Release the camera and finalize the session, logging failures.
    ///
    /// Safe to call any number of times; the camera is released only once.
    pub fn shutdown(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            match camera.release() {
                Ok(()) => debug!(camera = camera.id(), "camera released"),
                Err(e) => warn!(camera = camera.id(), error = %e, "camera release failed"),
            }
        }
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to finalize run session");
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Run cycles until `shutdown` is set, then clean up.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a cycle, after recording it as a
    /// `RUNTIME` error row and running cleanup.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), SightError> {
        self.start()?;
        let result = self.drive(shutdown);

        if let Err(e) = &result {
            error!(error = %e, "main loop crashed");
            if let Some(session) = self.session {
                let details = e.to_string();
                if let Err(log_err) = self.store.log_error(
                    session,
                    Component::Runtime,
                    Severity::Error,
                    "Main loop crashed",
                    Some(&details),
                ) {
                    warn!(error = %log_err, "could not record runtime failure");
                }
            }
        }

        self.shutdown();
        result
    }

    fn drive(&mut self, shutdown: &AtomicBool) -> Result<(), SightError> {
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle()?;
            std::thread::sleep(self.config.pacing);
        }
        info!("shutdown requested");
        Ok(())
    }

    /// Execute one capture → detect → narrate iteration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the orchestrator is not running or the camera has
    /// been released, or if capture, detection or any audit write fails.
    /// Synthesis and playback failures are not errors; they show up in
    /// [`CycleReport::failed`].
    pub fn run_cycle(&mut self) -> Result<CycleReport, SightError> {
        let session = match (self.state, self.session) {
            (RunState::Running, Some(session)) => session,
            _ => {
                return Err(SightError::HardwareFault {
                    component: "orchestrator".to_string(),
                    details: "orchestrator is not running".to_string(),
                });
            }
        };
        let camera = self.camera.as_mut().ok_or_else(|| SightError::HardwareFault {
            component: "orchestrator".to_string(),
            details: "camera already released".to_string(),
        })?;

        // ── 1. Capture ────────────────────────────────────────────────────────
        let frame = camera.capture()?;
        self.frame_counter += 1;
        let frame_number = self.frame_counter;
        let _span = debug_span!("cycle", session_id = %session, frame_number).entered();

        let mut report = CycleReport {
            frame_number,
            ..CycleReport::default()
        };

        // ── 2. Schedule ───────────────────────────────────────────────────────
        if self.scheduler.admits(frame_number) == Admission::Skip {
            return Ok(report);
        }

        // ── 3. Detect ─────────────────────────────────────────────────────────
        let started = Instant::now();
        let detections = self.filter.apply(self.detector.detect(&frame)?);
        let detect_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let frame_id = self
            .store
            .insert_frame_event(session, frame_number, detect_ms, detections.len())?;
        for detection in &detections {
            self.store.insert_detection(session, frame_id, detection)?;
        }
        report.frame_id = Some(frame_id);
        report.detect_ms = detect_ms;

        let labels = distinct_labels(&detections);
        if !labels.is_empty() {
            let joined = labels.iter().cloned().collect::<Vec<_>>().join(", ");
            info!(session_id = %session, frame_number, detect_ms, "DETECTED {joined}");
        }

        // ── 4. Narrate ────────────────────────────────────────────────────────
        for label in &labels {
            if !self.cooldown.should_speak(label, &labels) {
                report.suppressed.push(label.clone());
                continue;
            }
            match self.narrator.narrate(
                &self.store,
                &mut self.cooldown,
                session,
                Some(frame_id),
                label,
                label,
            )? {
                NarrationOutcome::Spoken { .. } => report.spoken.push(label.clone()),
                NarrationOutcome::Failed { .. } => report.failed.push(label.clone()),
            }
        }

        report.labels = labels;
        Ok(report)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use sightline_hal::sim::{CameraStats, NullSink, ScriptedSynthesizer, SimCamera};
    use sightline_memory::records::AudioOutcome;
    use sightline_perception::ScriptedDetector;
    use sightline_types::{BoundingBox, Detection};

    use super::*;

    struct Harness {
        orchestrator: Orchestrator,
        camera: Arc<CameraStats>,
        detector_calls: Arc<AtomicUsize>,
        played: Arc<AtomicUsize>,
    }

    fn harness(detector: ScriptedDetector, synth: ScriptedSynthesizer, camera: SimCamera) -> Harness {
        let camera_stats = camera.stats();
        let detector_calls = detector.call_counter();
        let sink = NullSink::new("USB Speaker");
        let played = sink.played();
        let config = OrchestratorConfig {
            pacing: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Box::new(camera),
            Box::new(detector),
            NarrationManager::new(Box::new(synth), Box::new(sink), "en"),
            AuditStore::open_in_memory().unwrap(),
        )
        .unwrap();
        Harness {
            orchestrator,
            camera: camera_stats,
            detector_calls,
            played,
        }
    }

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(10, 10, 50, 80))
    }

    fn sim_camera() -> SimCamera {
        SimCamera::new("sim", 4, 4)
    }

    #[test]
    fn invalid_config_is_rejected() {
        for config in [
            OrchestratorConfig {
                infer_every_n_frames: 0,
                ..OrchestratorConfig::default()
            },
            OrchestratorConfig {
                confidence_threshold: 1.5,
                ..OrchestratorConfig::default()
            },
        ] {
            let result = Orchestrator::new(
                config,
                Box::new(sim_camera()),
                Box::new(ScriptedDetector::new()),
                NarrationManager::new(
                    Box::new(ScriptedSynthesizer::new()),
                    Box::new(NullSink::new("null")),
                    "en",
                ),
                AuditStore::open_in_memory().unwrap(),
            );
            assert!(matches!(result, Err(SightError::Config(_))));
        }
    }

    #[test]
    fn only_every_third_frame_reaches_the_detector() {
        let detector = ScriptedDetector::new().then_return(vec![det("person", 0.9)]);
        let mut h = harness(detector, ScriptedSynthesizer::new(), sim_camera());
        h.orchestrator.start().unwrap();

        let r1 = h.orchestrator.run_cycle().unwrap();
        let r2 = h.orchestrator.run_cycle().unwrap();
        assert!(!r1.admitted() && !r2.admitted());
        assert_eq!(h.detector_calls.load(Ordering::SeqCst), 0);

        let r3 = h.orchestrator.run_cycle().unwrap();
        assert!(r3.admitted());
        assert_eq!(r3.frame_number, 3);
        assert_eq!(h.detector_calls.load(Ordering::SeqCst), 1);
        assert_eq!(r3.spoken, vec!["person"]);
        assert_eq!(h.played.load(Ordering::SeqCst), 1);

        let session = h.orchestrator.session().unwrap();
        let frames = h.orchestrator.store().frames_for_session(session).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_number, 3);
        assert_eq!(frames[0].objects_found, 1);
        assert_eq!(h.camera.captures(), 3);
    }

    #[test]
    fn low_confidence_detection_is_neither_stored_nor_spoken() {
        let detector = ScriptedDetector::new().then_return(vec![det("chair", 0.20)]);
        let mut h = harness(detector, ScriptedSynthesizer::new(), sim_camera());
        h.orchestrator.start().unwrap();
        for _ in 0..3 {
            h.orchestrator.run_cycle().unwrap();
        }

        let store = h.orchestrator.store();
        let session = h.orchestrator.session().unwrap();
        let frames = store.frames_for_session(session).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].objects_found, 0);
        assert!(store.detections_for_frame(frames[0].id).unwrap().is_empty());
        assert!(store.messages_for_session(session).unwrap().is_empty());
        assert_eq!(h.played.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_label_is_suppressed_after_max_repeat() {
        let detector = ScriptedDetector::new()
            .then_return(vec![det("person", 0.9)])
            .then_return(vec![det("person", 0.8)])
            .then_return(vec![det("person", 0.95), det("dog", 0.6)]);
        let mut h = harness(detector, ScriptedSynthesizer::new(), sim_camera());
        h.orchestrator.start().unwrap();

        let reports: Vec<_> = (0..9).map(|_| h.orchestrator.run_cycle().unwrap()).collect();
        assert_eq!(reports[2].spoken, vec!["person"]);
        assert_eq!(reports[5].spoken, vec!["person"]);
        assert_eq!(reports[8].suppressed, vec!["person"]);
        assert_eq!(reports[8].spoken, vec!["dog"]);
        assert_eq!(h.orchestrator.cooldown().state("person").count, 2);
    }

    #[test]
    fn tts_failure_is_recorded_and_label_can_retry() {
        let detector = ScriptedDetector::new()
            .then_return(vec![det("person", 0.9)])
            .then_return(vec![det("person", 0.9)]);
        let synth = ScriptedSynthesizer::new().then_fail("piper exited with 1");
        let mut h = harness(detector, synth, sim_camera());
        h.orchestrator.start().unwrap();

        let reports: Vec<_> = (0..6).map(|_| h.orchestrator.run_cycle().unwrap()).collect();
        assert_eq!(reports[2].failed, vec!["person"]);
        assert_eq!(reports[5].spoken, vec!["person"]);

        let store = h.orchestrator.store();
        let session = h.orchestrator.session().unwrap();
        let errors = store.errors_for_session(session).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, Component::Tts);

        let audio = store.audio_events_for_session(session).unwrap();
        assert_eq!(audio.len(), 2);
        assert_eq!(
            audio[0].outcome,
            Some(AudioOutcome::Failed {
                error_text: "piper exited with 1".into()
            })
        );
        assert_eq!(audio[1].outcome, Some(AudioOutcome::Succeeded));
        assert_eq!(h.orchestrator.cooldown().state("person").count, 1);
    }

    #[test]
    fn detector_failure_records_runtime_error_and_cleans_up() {
        let detector = ScriptedDetector::new().then_fail("model crashed");
        let mut h = harness(detector, ScriptedSynthesizer::new(), sim_camera());

        let err = h.orchestrator.run(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, SightError::DetectionFailed(_)));
        assert_eq!(h.orchestrator.state(), RunState::Stopped);
        assert_eq!(h.camera.releases(), 1);

        let store = h.orchestrator.store();
        let session = h.orchestrator.session().unwrap();
        let errors = store.errors_for_session(session).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, Component::Runtime);
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[0].short_message, "Main loop crashed");
        assert!(errors[0].long_details.as_deref().unwrap_or("").contains("model crashed"));
        assert!(store.session(session).unwrap().end_time.is_some());
    }

    #[test]
    fn camera_failure_ends_the_run() {
        let mut h = harness(
            ScriptedDetector::new(),
            ScriptedSynthesizer::new(),
            sim_camera().failing_after(4),
        );
        let err = h.orchestrator.run(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, SightError::HardwareFault { .. }));
        let session = h.orchestrator.session().unwrap();
        let frames = h.orchestrator.store().frames_for_session(session).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(h.camera.releases(), 1);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        let s1 = h.orchestrator.start().unwrap();
        let s2 = h.orchestrator.start().unwrap();
        assert_eq!(s1, s2);

        h.orchestrator.stop().unwrap();
        let ended = h.orchestrator.store().session(s1).unwrap().end_time;
        assert!(ended.is_some());
        h.orchestrator.stop().unwrap();
        assert_eq!(h.orchestrator.store().session(s1).unwrap().end_time, ended);
    }

    #[test]
    fn failed_finalization_keeps_the_run_open() {
        let mut h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        let session = h.orchestrator.start().unwrap();
        h.orchestrator.store().end_session(session).unwrap();

        assert!(matches!(h.orchestrator.stop(), Err(SightError::Persistence(_))));
        assert_eq!(h.orchestrator.state(), RunState::Running);
        // The cleanup path attempts the write again instead of skipping it.
        assert!(h.orchestrator.stop().is_err());
    }

    #[test]
    fn restart_opens_new_session_and_resets_counter() {
        let mut h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        let s1 = h.orchestrator.start().unwrap();
        h.orchestrator.run_cycle().unwrap();
        h.orchestrator.stop().unwrap();

        let s2 = h.orchestrator.start().unwrap();
        assert_ne!(s1, s2);
        assert_eq!(h.orchestrator.run_cycle().unwrap().frame_number, 1);
    }

    #[test]
    fn cycle_requires_running_state() {
        let mut h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        assert!(h.orchestrator.run_cycle().is_err());
        assert_eq!(h.camera.captures(), 0);
    }

    #[test]
    fn camera_is_released_exactly_once() {
        let h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        let stats = Arc::clone(&h.camera);
        let mut orchestrator = h.orchestrator;

        orchestrator.run(&AtomicBool::new(true)).unwrap();
        orchestrator.shutdown();
        drop(orchestrator);
        assert_eq!(stats.releases(), 1);
    }

    #[test]
    fn drop_finalizes_running_session() {
        let h = harness(ScriptedDetector::new(), ScriptedSynthesizer::new(), sim_camera());
        let stats = Arc::clone(&h.camera);
        let mut orchestrator = h.orchestrator;
        orchestrator.start().unwrap();
        drop(orchestrator);
        assert_eq!(stats.releases(), 1);
    }

    #[test]
    fn narrated_messages_link_to_frames_of_the_same_session() {
        let detector = ScriptedDetector::new()
            .then_return(vec![det("person", 0.9), det("cup", 0.5)])
            .then_return(vec![det("dog", 0.7)]);
        let mut h = harness(detector, ScriptedSynthesizer::new(), sim_camera());
        h.orchestrator.start().unwrap();
        for _ in 0..6 {
            h.orchestrator.run_cycle().unwrap();
        }

        let store = h.orchestrator.store();
        let session = h.orchestrator.session().unwrap();
        let frames = store.frames_for_session(session).unwrap();
        let messages = store.messages_for_session(session).unwrap();
        assert_eq!(messages.len(), 3);
        for m in &messages {
            let frame_id = m.frame_id.unwrap();
            assert!(frames.iter().any(|f| f.id == frame_id));
        }
        assert!(store.orphaned_message_links().unwrap().is_empty());
    }
}
