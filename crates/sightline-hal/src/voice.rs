//! Speech output traits: synthesis into a temporary artifact, then playback.

use std::path::Path;

use sightline_types::SightError;
use tempfile::TempPath;
use thiserror::Error;

/// A synthesis or playback failure, carrying the collaborator's diagnostic
/// text (typically its stderr).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{detail}")]
pub struct SynthesisError {
    pub detail: String,
}

impl SynthesisError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<SynthesisError> for SightError {
    fn from(e: SynthesisError) -> Self {
        SightError::SynthesisFailed(e.detail)
    }
}

/// A playable audio file on disk.
///
/// The file is removed when the artifact is dropped, whichever way the
/// narration attempt ends.
#[derive(Debug)]
pub struct AudioArtifact {
    path: TempPath,
}

impl AudioArtifact {
    pub fn new(path: TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Offline text-to-speech engine.
pub trait Synthesizer: Send {
    /// Render `text` (UTF-8) into a playable audio artifact.
    fn synthesize(&mut self, text: &str) -> Result<AudioArtifact, SynthesisError>;
}

/// Audio output device.
pub trait AudioSink: Send {
    /// Identifier recorded as `audio_event.output_device`.
    fn device_name(&self) -> &str;

    /// Play `artifact` to completion.
    fn play(&mut self, artifact: &AudioArtifact) -> Result<(), SynthesisError>;
}
