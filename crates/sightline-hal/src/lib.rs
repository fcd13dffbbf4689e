//! `sightline-hal` – device drivers.
//!
//! # Modules
//!
//! - [`camera`] – the [`Camera`][camera::Camera] trait and
//!   [`StreamCamera`][camera::StreamCamera], which reads fixed-size RGB24
//!   frames from a capture process such as `rpicam-vid`.
//! - [`voice`] – [`Synthesizer`][voice::Synthesizer] and
//!   [`AudioSink`][voice::AudioSink] traits plus the self-deleting
//!   [`AudioArtifact`][voice::AudioArtifact].
//! - [`piper`] – [`PiperSynthesizer`][piper::PiperSynthesizer] (offline Piper
//!   TTS) and [`AplaySink`][piper::AplaySink] (ALSA playback).
//! - [`sim`] – stub drivers for headless tests.

pub mod camera;
pub mod piper;
pub mod sim;
pub mod voice;

pub use camera::{Camera, CameraFrame, StreamCamera};
pub use piper::{AplaySink, PiperSynthesizer};
pub use voice::{AudioArtifact, AudioSink, SynthesisError, Synthesizer};
