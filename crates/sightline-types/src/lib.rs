use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned bounding box in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Convert a centre-form box (`x_center, y_center, w, h`) as emitted by
    /// YOLO-style models into a top-left integer box.
    ///
    /// Coordinates are truncated toward zero.
    pub fn from_center(x_center: f32, y_center: f32, w: f32, h: f32) -> Self {
        Self {
            x: (x_center - w / 2.0) as i32,
            y: (y_center - h / 2.0) as i32,
            w: w as i32,
            h: h as i32,
        }
    }
}

/// A single object reported by the detection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name, e.g. `"person"`.
    pub label: String,
    /// Model confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Pipeline component that an audit error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Component {
    /// Speech synthesis and playback.
    Tts,
    /// The main perception loop.
    Runtime,
}

impl Component {
    /// The value stored in `app_error.component_name`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Tts => "TTS",
            Component::Runtime => "RUNTIME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TTS" => Some(Component::Tts),
            "RUNTIME" => Some(Component::Runtime),
            _ => None,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity recorded alongside an audit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global error type spanning camera faults, detector failures, persistence
/// failures and configuration rejections.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SightError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_box_converts_to_top_left() {
        let b = BoundingBox::from_center(100.0, 50.0, 40.0, 20.0);
        assert_eq!(b, BoundingBox::new(80, 40, 40, 20));
    }

    #[test]
    fn center_box_truncates_fractional_pixels() {
        let b = BoundingBox::from_center(10.7, 10.2, 5.5, 3.9);
        assert_eq!(b.x, 7);
        assert_eq!(b.y, 8);
        assert_eq!(b.w, 5);
        assert_eq!(b.h, 3);
    }

    #[test]
    fn component_names_match_stored_values() {
        assert_eq!(Component::Tts.as_str(), "TTS");
        assert_eq!(Component::Runtime.as_str(), "RUNTIME");
        assert_eq!(Component::parse("TTS"), Some(Component::Tts));
        assert_eq!(Component::parse("tts"), None);
        assert_eq!(Component::parse("CAMERA"), None);
    }

    #[test]
    fn severity_parse_is_inverse_of_as_str() {
        for s in [Severity::Info, Severity::Warning, Severity::Error, Severity::Critical] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn component_serializes_uppercase() {
        let json = serde_json::to_string(&Component::Tts).unwrap();
        assert_eq!(json, "\"TTS\"");
    }

    #[test]
    fn sight_error_display() {
        let err = SightError::HardwareFault {
            component: "camera".to_string(),
            details: "buffer underrun".to_string(),
        };
        assert!(err.to_string().contains("camera"));
        assert!(SightError::Persistence("disk full".into())
            .to_string()
            .contains("disk full"));
    }
}
