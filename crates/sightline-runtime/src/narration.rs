//! [`NarrationManager`] – speaks one label and records the attempt.
//!
//! Each attempt moves through [`NarrationState`]:
//!
//! 1. **Pending** – a spoken message row and a started audio event row are
//!    written.
//! 2. **Started** – the text is synthesized and the artifact played.
//! 3. **Succeeded** / **Failed** – the audio event is finalized. Success
//!    also advances the label in the [`CooldownController`]; failure appends
//!    a `TTS` error row and leaves the label untouched.
//!
//! A synthesis or playback failure is reported as
//! [`NarrationOutcome::Failed`], not as an `Err`: the loop keeps running.
//! Only audit store failures propagate.

use sightline_hal::voice::{AudioSink, SynthesisError, Synthesizer};
use sightline_memory::audit::AuditStore;
use sightline_memory::records::{AudioEventId, AudioOutcome, FrameId, MessageId, SessionId};
use sightline_types::{Component, Severity, SightError};
use tracing::{debug, info, warn};

use crate::cooldown::CooldownController;

/// Lifecycle stage of one narration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationState {
    Pending,
    Started,
    Succeeded,
    Failed,
}

/// Result of [`NarrationManager::narrate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationOutcome {
    Spoken {
        message_id: MessageId,
        audio_event_id: AudioEventId,
    },
    Failed {
        message_id: MessageId,
        audio_event_id: AudioEventId,
        detail: String,
    },
}

impl NarrationOutcome {
    pub fn state(&self) -> NarrationState {
        match self {
            NarrationOutcome::Spoken { .. } => NarrationState::Succeeded,
            NarrationOutcome::Failed { .. } => NarrationState::Failed,
        }
    }
}

/// Owns the speech collaborators used by the orchestrator.
pub struct NarrationManager {
    synthesizer: Box<dyn Synthesizer>,
    sink: Box<dyn AudioSink>,
    language_code: String,
    state: Option<NarrationState>,
}

impl NarrationManager {
    pub fn new(
        synthesizer: Box<dyn Synthesizer>,
        sink: Box<dyn AudioSink>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            language_code: language_code.into(),
            state: None,
        }
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    /// Stage reached by the most recent attempt; `None` before the first.
    ///
    /// An attempt aborted by an audit store error stays in the stage where
    /// the write failed.
    pub fn state(&self) -> Option<NarrationState> {
        self.state
    }

    fn enter(&mut self, state: NarrationState, label: &str) {
        debug!(label, ?state, "narration state");
        self.state = Some(state);
    }

    /// Speak `text` for `label` and audit the attempt under `session`.
    pub fn narrate(
        &mut self,
        store: &AuditStore,
        cooldown: &mut CooldownController,
        session: SessionId,
        frame: Option<FrameId>,
        label: &str,
        text: &str,
    ) -> Result<NarrationOutcome, SightError> {
        self.enter(NarrationState::Pending, label);
        let message_id = store.insert_spoken_message(session, frame, text, &self.language_code)?;
        let audio_event_id = store.start_audio_event(session, message_id, Some(self.sink.device_name()))?;

        self.enter(NarrationState::Started, label);
        match self.speak(text) {
            Ok(()) => {
                store.finish_audio_event(audio_event_id, &AudioOutcome::Succeeded)?;
                self.enter(NarrationState::Succeeded, label);
                cooldown.mark_spoken(label);
                info!(
                    session_id = %session,
                    message_id = %message_id,
                    label,
                    device = self.sink.device_name(),
                    "SPOKEN {text}"
                );
                Ok(NarrationOutcome::Spoken {
                    message_id,
                    audio_event_id,
                })
            }
            Err(e) => {
                let detail = e.detail;
                store.finish_audio_event(
                    audio_event_id,
                    &AudioOutcome::Failed {
                        error_text: detail.clone(),
                    },
                )?;
                self.enter(NarrationState::Failed, label);
                store.log_error(session, Component::Tts, Severity::Error, "TTS failed", Some(&detail))?;
                warn!(session_id = %session, label, error = %detail, "TTS failed");
                Ok(NarrationOutcome::Failed {
                    message_id,
                    audio_event_id,
                    detail,
                })
            }
        }
    }

    // The artifact is dropped (and its file removed) before this returns.
    fn speak(&mut self, text: &str) -> Result<(), SynthesisError> {
        let artifact = self.synthesizer.synthesize(text)?;
        self.sink.play(&artifact)
    }
}
