//! In-process simulation drivers for headless testing without a camera,
//! speaker, or TTS engine.
//!
//! The stubs share their counters through [`Arc`]s so a test can keep a
//! handle after moving the driver into the orchestrator.
//!
//! # Example
//!
//! ```rust
//! use sightline_hal::camera::Camera;
//! use sightline_hal::sim::SimCamera;
//!
//! let mut cam = SimCamera::new("sim", 4, 4);
//! let stats = cam.stats();
//! cam.capture().unwrap();
//! cam.release().unwrap();
//! assert_eq!(stats.captures(), 1);
//! assert_eq!(stats.releases(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sightline_types::SightError;

use crate::camera::{Camera, CameraFrame};
use crate::voice::{AudioArtifact, AudioSink, SynthesisError, Synthesizer};

// ────────────────────────────────────────────────────────────────────────────
// Stub camera
// ────────────────────────────────────────────────────────────────────────────

/// Capture/release counters shared between a [`SimCamera`] and its test.
#[derive(Debug, Default)]
pub struct CameraStats {
    captures: AtomicUsize,
    releases: AtomicUsize,
}

impl CameraStats {
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// A simulated camera that returns blank RGB frames.
///
/// Optionally fails once a capture budget is exhausted, to exercise crash
/// handling.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    fail_after: Option<usize>,
    stats: Arc<CameraStats>,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            fail_after: None,
            stats: Arc::new(CameraStats::default()),
        }
    }

    /// Return a [`SightError::HardwareFault`] on every capture after the
    /// first `frames` succeed.
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn stats(&self) -> Arc<CameraStats> {
        Arc::clone(&self.stats)
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, SightError> {
        let taken = self.stats.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| taken >= limit) {
            return Err(SightError::HardwareFault {
                component: self.id.clone(),
                details: "simulated capture failure".to_string(),
            });
        }
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data: vec![0u8; CameraFrame::rgb_len(self.width, self.height)],
        })
    }

    fn release(&mut self) -> Result<(), SightError> {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub synthesizer
// ────────────────────────────────────────────────────────────────────────────

/// A synthesizer that replays a script of outcomes.
///
/// Each call pops the next scripted result; `Ok` writes an empty temporary
/// wav file. Once the script is exhausted every call succeeds.
#[derive(Default)]
pub struct ScriptedSynthesizer {
    script: VecDeque<Result<(), String>>,
    spoken: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure with the given diagnostic text.
    pub fn then_fail(mut self, detail: impl Into<String>) -> Self {
        self.script.push_back(Err(detail.into()));
        self
    }

    /// Queue a success.
    pub fn then_succeed(mut self) -> Self {
        self.script.push_back(Ok(()));
        self
    }

    /// Handle to the texts passed to [`Synthesizer::synthesize`], in order.
    pub fn spoken(&self) -> Arc<std::sync::Mutex<Vec<String>>> {
        Arc::clone(&self.spoken)
    }
}

impl Synthesizer for ScriptedSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<AudioArtifact, SynthesisError> {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        match self.script.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                let file = tempfile::Builder::new()
                    .prefix("sim_tts_")
                    .suffix(".wav")
                    .tempfile()
                    .map_err(|e| SynthesisError::new(e.to_string()))?;
                Ok(AudioArtifact::new(file.into_temp_path()))
            }
            Err(detail) => Err(SynthesisError::new(detail)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub sink
// ────────────────────────────────────────────────────────────────────────────

/// An audio sink that discards audio and counts playbacks.
pub struct NullSink {
    name: String,
    played: Arc<AtomicUsize>,
}

impl NullSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            played: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn played(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.played)
    }
}

impl AudioSink for NullSink {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn play(&mut self, artifact: &AudioArtifact) -> Result<(), SynthesisError> {
        if !artifact.path().exists() {
            return Err(SynthesisError::new("artifact missing before playback"));
        }
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
