//! Generic `Camera` trait and a process-backed RGB frame source.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};

use sightline_types::SightError;
use tracing::{debug, info, warn};

/// A raw RGB24 frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB24 pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Number of bytes an RGB24 frame of the given size occupies.
    pub fn rgb_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"picam"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`SightError::HardwareFault`] if the frame cannot be captured
    /// (e.g. the device is disconnected or the stream ended).
    fn capture(&mut self) -> Result<CameraFrame, SightError>;

    /// Stop the device and release any OS resources it holds.
    ///
    /// Called exactly once by the owner at shutdown.
    fn release(&mut self) -> Result<(), SightError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StreamCamera
// ────────────────────────────────────────────────────────────────────────────

/// Reads fixed-size RGB24 frames from a byte stream.
///
/// The usual source is the stdout of a capture tool such as
/// `rpicam-vid --codec rgb -o -`, spawned with [`StreamCamera::spawn`].
pub struct StreamCamera {
    id: String,
    width: u32,
    height: u32,
    reader: Option<Box<dyn Read + Send>>,
    child: Option<Child>,
}

impl StreamCamera {
    /// Spawn `program args…` and read frames from its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`SightError::HardwareFault`] if the command is empty or the
    /// process cannot be started.
    pub fn spawn(
        id: impl Into<String>,
        command: &[String],
        width: u32,
        height: u32,
    ) -> Result<Self, SightError> {
        let id = id.into();
        let (program, args) = command.split_first().ok_or_else(|| SightError::HardwareFault {
            component: id.clone(),
            details: "camera command is empty".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SightError::HardwareFault {
                component: id.clone(),
                details: format!("failed to start {program}: {e}"),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| SightError::HardwareFault {
            component: id.clone(),
            details: "camera process has no stdout".to_string(),
        })?;

        info!(camera = %id, %program, width, height, "camera stream started");
        Ok(Self {
            id,
            width,
            height,
            reader: Some(Box::new(stdout)),
            child: Some(child),
        })
    }

    /// Wrap an arbitrary reader (e.g. a file of concatenated raw frames).
    pub fn from_reader(
        id: impl Into<String>,
        reader: Box<dyn Read + Send>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            reader: Some(reader),
            child: None,
        }
    }

    fn fault(&self, details: impl Into<String>) -> SightError {
        SightError::HardwareFault {
            component: self.id.clone(),
            details: details.into(),
        }
    }
}

impl Camera for StreamCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, SightError> {
        let len = CameraFrame::rgb_len(self.width, self.height);
        let mut data = vec![0u8; len];
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Err(self.fault("camera already released")),
        };
        if let Err(e) = reader.read_exact(&mut data) {
            return Err(match e.kind() {
                ErrorKind::UnexpectedEof => self.fault("camera stream ended"),
                _ => self.fault(format!("frame read failed: {e}")),
            });
        }
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn release(&mut self) -> Result<(), SightError> {
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited; still reap it below.
                debug!(camera = %self.id, error = %e, "camera process kill failed");
            }
            child
                .wait()
                .map_err(|e| self.fault(format!("failed to reap camera process: {e}")))?;
        }
        info!(camera = %self.id, "camera released");
        Ok(())
    }
}

impl Drop for StreamCamera {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!(camera = %self.id, "camera dropped without release; releasing now");
            let _ = self.release();
        }
    }
}
