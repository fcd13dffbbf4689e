//! The [`Detector`] collaborator contract and a JSON-lines subprocess
//! implementation.
//!
//! # Wire protocol of [`CommandDetector`]
//!
//! For every frame the detector process receives on stdin:
//!
//! 1. one header line: `{"width":640,"height":480,"bytes":921600}`
//! 2. exactly `bytes` bytes of packed RGB24 pixel data.
//!
//! It answers with one line on stdout: a JSON array of objects
//!
//! ```json
//! [{"label":"person","conf":0.91,"box_x":12,"box_y":34,"box_w":120,"box_h":220}]
//! ```
//!
//! Instead of `box_*` a detection may carry `"xywh": [xc, yc, w, h]` in
//! centre form, which is converted to a top-left box.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use sightline_hal::camera::CameraFrame;
use sightline_types::{BoundingBox, Detection, SightError};
use tracing::{debug, info};

/// An object-detection engine.
pub trait Detector: Send {
    /// Run detection on one frame. An empty result is valid.
    ///
    /// # Errors
    ///
    /// Returns [`SightError::DetectionFailed`] when the engine fails.
    fn detect(&mut self, frame: &CameraFrame) -> Result<Vec<Detection>, SightError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    bytes: usize,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    conf: f32,
    #[serde(default)]
    box_x: Option<i32>,
    #[serde(default)]
    box_y: Option<i32>,
    #[serde(default)]
    box_w: Option<i32>,
    #[serde(default)]
    box_h: Option<i32>,
    #[serde(default)]
    xywh: Option<[f32; 4]>,
}

impl WireDetection {
    fn into_detection(self) -> Result<Detection, SightError> {
        if !(0.0..=1.0).contains(&self.conf) {
            return Err(SightError::DetectionFailed(format!(
                "confidence {} for {:?} is outside [0, 1]",
                self.conf, self.label
            )));
        }
        let bbox = match self.xywh {
            Some([xc, yc, w, h]) => BoundingBox::from_center(xc, yc, w, h),
            None => BoundingBox::new(
                self.box_x.unwrap_or(0),
                self.box_y.unwrap_or(0),
                self.box_w.unwrap_or(0),
                self.box_h.unwrap_or(0),
            ),
        };
        Ok(Detection::new(self.label, self.conf, bbox))
    }
}

/// Parse one response line from a detector process.
pub fn parse_detections(line: &str) -> Result<Vec<Detection>, SightError> {
    let wire: Vec<WireDetection> = serde_json::from_str(line.trim())
        .map_err(|e| SightError::DetectionFailed(format!("malformed detector output: {e}")))?;
    wire.into_iter().map(WireDetection::into_detection).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandDetector
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps a long-lived detector process (e.g. a YOLO wrapper script) and
/// exchanges one request/response pair per frame.
pub struct CommandDetector {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl CommandDetector {
    /// # Errors
    ///
    /// Returns [`SightError::DetectionFailed`] if the process cannot start.
    pub fn spawn(command: &[String]) -> Result<Self, SightError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SightError::DetectionFailed("detector command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SightError::DetectionFailed(format!("failed to start {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SightError::DetectionFailed("detector has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SightError::DetectionFailed("detector has no stdout".to_string()))?;

        info!(%program, "detector process started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn send(&mut self, frame: &CameraFrame) -> std::io::Result<()> {
        let header = FrameHeader {
            width: frame.width,
            height: frame.height,
            bytes: frame.data.len(),
        };
        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        self.stdin.write_all(&line)?;
        self.stdin.write_all(&frame.data)?;
        self.stdin.flush()
    }
}

impl Detector for CommandDetector {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Vec<Detection>, SightError> {
        self.send(frame)
            .map_err(|e| SightError::DetectionFailed(format!("failed to send frame: {e}")))?;

        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| SightError::DetectionFailed(format!("failed to read detections: {e}")))?;
        if n == 0 {
            return Err(SightError::DetectionFailed("detector process exited".to_string()));
        }
        let detections = parse_detections(&line)?;
        debug!(count = detections.len(), "detector replied");
        Ok(detections)
    }
}

impl Drop for CommandDetector {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedDetector
// ─────────────────────────────────────────────────────────────────────────────

/// A detector that replays canned results, one entry per call.
///
/// Once the script runs out every call returns an empty result.
#[derive(Default)]
pub struct ScriptedDetector {
    script: VecDeque<Result<Vec<Detection>, SightError>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_return(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    pub fn then_fail(mut self, detail: impl Into<String>) -> Self {
        self.script.push_back(Err(SightError::DetectionFailed(detail.into())));
        self
    }

    /// Number of frames this detector has been asked to process.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter that outlives moving the detector into a loop.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &CameraFrame) -> Result<Vec<Detection>, SightError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame() -> CameraFrame {
        CameraFrame {
            width: 2,
            height: 2,
            data: vec![0u8; 12],
        }
    }

    #[test]
    fn parses_top_left_boxes() {
        let dets = parse_detections(
            r#"[{"label":"person","conf":0.91,"box_x":12,"box_y":34,"box_w":120,"box_h":220}]"#,
        )
        .unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "person");
        assert_eq!(dets[0].bbox, BoundingBox::new(12, 34, 120, 220));
    }

    #[test]
    fn parses_center_form_boxes() {
        let dets = parse_detections(r#"[{"label":"cup","conf":0.5,"xywh":[100.0,50.0,40.0,20.0]}]"#).unwrap();
        assert_eq!(dets[0].bbox, BoundingBox::new(80, 40, 40, 20));
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_detections("[]\n").unwrap().is_empty());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let err = parse_detections(r#"[{"label":"cat","conf":1.7}]"#).unwrap_err();
        assert!(matches!(err, SightError::DetectionFailed(_)));
    }

    #[test]
    fn malformed_output_is_detection_failure() {
        assert!(matches!(
            parse_detections("not json"),
            Err(SightError::DetectionFailed(_))
        ));
    }

    #[test]
    fn spawn_rejects_empty_command() {
        assert!(CommandDetector::spawn(&[]).is_err());
    }

    #[test]
    fn scripted_detector_replays_then_returns_empty() {
        let mut det = ScriptedDetector::new()
            .then_return(vec![Detection::new("dog", 0.8, BoundingBox::default())])
            .then_fail("gpu lost");
        let frame = blank_frame();
        assert_eq!(det.detect(&frame).unwrap().len(), 1);
        assert!(det.detect(&frame).is_err());
        assert!(det.detect(&frame).unwrap().is_empty());
        assert_eq!(det.calls(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_round_trips_through_shell_process() {
        // Consume the header line and the 12 pixel bytes, then answer.
        let script = r#"while IFS= read -r header; do head -c 12 >/dev/null; echo '[{"label":"person","conf":0.9,"box_x":1,"box_y":2,"box_w":3,"box_h":4}]'; done"#;
        let cmd = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let mut det = CommandDetector::spawn(&cmd).unwrap();
        let frame = blank_frame();
        let first = det.detect(&frame).unwrap();
        assert_eq!(first[0].label, "person");
        let second = det.detect(&frame).unwrap();
        assert_eq!(second[0].bbox, BoundingBox::new(1, 2, 3, 4));
    }
}
