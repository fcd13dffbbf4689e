//! Row types and typed ids for the audit tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sightline_types::{BoundingBox, Component, Severity};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Primary key of `run_session`.
    SessionId
);
row_id!(
    /// Primary key of `frame_event`.
    FrameId
);
row_id!(DetectionId);
row_id!(
    /// Primary key of `spoken_message`.
    MessageId
);
row_id!(AudioEventId);
row_id!(ErrorId);

/// One continuous run of the perception loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSession {
    pub id: SessionId,
    pub start_time: DateTime<Utc>,
    /// `None` while the session is running.
    pub end_time: Option<DateTime<Utc>>,
    pub app_version: String,
    pub model_id: Option<i64>,
    pub device_notes: Option<String>,
}

/// A frame that was admitted to detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub id: FrameId,
    pub session_id: SessionId,
    pub frame_number: u64,
    pub captured_at: DateTime<Utc>,
    pub detect_ms: u64,
    pub objects_found: u32,
}

/// A persisted detection (already past the confidence threshold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: DetectionId,
    pub session_id: SessionId,
    pub frame_id: FrameId,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Text handed to the speech synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpokenMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub frame_id: Option<FrameId>,
    pub text: String,
    pub language_code: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal state of an [`AudioEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AudioOutcome {
    Succeeded,
    Failed { error_text: String },
}

impl AudioOutcome {
    pub fn was_successful(&self) -> bool {
        matches!(self, AudioOutcome::Succeeded)
    }

    pub fn error_text(&self) -> Option<&str> {
        match self {
            AudioOutcome::Succeeded => None,
            AudioOutcome::Failed { error_text } => Some(error_text),
        }
    }
}

/// One playback attempt for a [`SpokenMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub id: AudioEventId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `None` until the event reaches its terminal state.
    pub outcome: Option<AudioOutcome>,
    pub output_device: Option<String>,
}

/// An immutable record of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppError {
    pub id: ErrorId,
    pub session_id: SessionId,
    pub happened_at: DateTime<Utc>,
    pub component: Component,
    pub severity: Severity,
    pub short_message: String,
    pub long_details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_integers() {
        assert_eq!(serde_json::to_string(&SessionId(7)).unwrap(), "7");
        assert_eq!(FrameId(3).to_string(), "3");
    }

    #[test]
    fn audio_outcome_accessors() {
        let ok = AudioOutcome::Succeeded;
        assert!(ok.was_successful());
        assert_eq!(ok.error_text(), None);

        let failed = AudioOutcome::Failed {
            error_text: "no voice".into(),
        };
        assert!(!failed.was_successful());
        assert_eq!(failed.error_text(), Some("no voice"));
    }
}
