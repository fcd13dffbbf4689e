//! [`FrameScheduler`] – deterministic frame admission gate.
//!
//! Detection is the expensive step on embedded hardware, so only every
//! N-th captured frame is forwarded to the detector.
//!
//! # Example
//!
//! ```rust
//! use sightline_perception::scheduler::{Admission, FrameScheduler};
//!
//! let scheduler = FrameScheduler::new(3).unwrap();
//! assert_eq!(scheduler.admits(1), Admission::Skip);
//! assert_eq!(scheduler.admits(2), Admission::Skip);
//! assert_eq!(scheduler.admits(3), Admission::Admit);
//! ```

use sightline_types::SightError;

/// Outcome of asking the scheduler about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward the frame to the detector.
    Admit,
    /// Drop the frame without running detection.
    Skip,
}

/// Admits frame numbers that are exact multiples of a fixed interval.
///
/// Holds no counter of its own; the caller owns the running frame number.
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    interval: u64,
}

impl FrameScheduler {
    /// Create a scheduler admitting one frame in every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`SightError::Config`] when `interval` is zero.
    pub fn new(interval: u64) -> Result<Self, SightError> {
        if interval == 0 {
            return Err(SightError::Config(
                "frame admission interval must be at least 1".to_string(),
            ));
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn admits(&self, frame_number: u64) -> Admission {
        if frame_number % self.interval == 0 {
            Admission::Admit
        } else {
            Admission::Skip
        }
    }
}
