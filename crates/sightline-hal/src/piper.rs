//! Piper offline TTS and ALSA `aplay` playback, both driven as subprocesses.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::voice::{AudioArtifact, AudioSink, SynthesisError, Synthesizer};

/// Runs the `piper` CLI with the text on stdin and `--output_file <wav>`.
pub struct PiperSynthesizer {
    bin: PathBuf,
    model: PathBuf,
    config: PathBuf,
}

impl PiperSynthesizer {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
            config: config.into(),
        }
    }

    fn command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--config")
            .arg(&self.config)
            .arg("--output_file")
            .arg(output);
        cmd
    }
}

impl Synthesizer for PiperSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<AudioArtifact, SynthesisError> {
        let wav = tempfile::Builder::new()
            .prefix("tts_")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| SynthesisError::new(format!("failed to create temp wav: {e}")))?
            .into_temp_path();

        let mut child = self
            .command(&wav)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SynthesisError::new(format!("failed to start {}: {e}", self.bin.display())))?;

        // Piper may exit before reading its input; reap it and prefer its
        // own diagnostic over the broken pipe.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()),
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .map_err(|e| SynthesisError::new(format!("piper did not finish: {e}")))?;
        check_status("piper", &output)?;
        written.map_err(|e| SynthesisError::new(format!("failed to write text to piper: {e}")))?;

        debug!(path = %wav.display(), "piper wrote audio");
        Ok(AudioArtifact::new(wav))
    }
}

/// Plays WAV artifacts through `aplay -q [-D device]`.
pub struct AplaySink {
    name: String,
    alsa_device: Option<String>,
}

impl AplaySink {
    /// `name` is the human-readable device label stored in the audit trail;
    /// `alsa_device` is passed to `aplay -D` when set.
    pub fn new(name: impl Into<String>, alsa_device: Option<String>) -> Self {
        Self {
            name: name.into(),
            alsa_device,
        }
    }

    fn args(&self, path: &Path) -> Vec<String> {
        let mut args = vec!["-q".to_string()];
        if let Some(dev) = &self.alsa_device {
            args.push("-D".to_string());
            args.push(dev.clone());
        }
        args.push(path.display().to_string());
        args
    }
}

impl AudioSink for AplaySink {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn play(&mut self, artifact: &AudioArtifact) -> Result<(), SynthesisError> {
        let output = Command::new("aplay")
            .args(self.args(artifact.path()))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SynthesisError::new(format!("failed to start aplay: {e}")))?;
        check_status("aplay", &output)
    }
}

fn check_status(tool: &str, output: &Output) -> Result<(), SynthesisError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    Err(SynthesisError::new(if stderr.is_empty() {
        format!("{tool} exited with {}", output.status)
    } else {
        stderr.to_string()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piper_command_passes_model_config_and_output() {
        let piper = PiperSynthesizer::new("/opt/piper", "/m/voice.onnx", "/m/voice.onnx.json");
        let cmd = piper.command(Path::new("/tmp/out.wav"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["--model", "/m/voice.onnx", "--config", "/m/voice.onnx.json", "--output_file", "/tmp/out.wav"]
        );
        assert_eq!(cmd.get_program(), "/opt/piper");
    }

    #[test]
    fn missing_piper_binary_is_synthesis_error() {
        let mut piper = PiperSynthesizer::new("/nonexistent/piper-bin", "m", "c");
        let err = piper.synthesize("hello").unwrap_err();
        assert!(err.detail.contains("failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn early_piper_exit_reports_its_stderr() {
        // `sh` rejects `--model` and exits without reading stdin.
        let mut piper = PiperSynthesizer::new("sh", "m", "c");
        let text = "x".repeat(1 << 20);
        let err = piper.synthesize(&text).unwrap_err();
        assert!(!err.detail.contains("failed to write"), "{}", err.detail);
        assert!(!err.detail.is_empty());
    }

    #[test]
    fn aplay_args_include_device_when_configured() {
        let sink = AplaySink::new("USB Speaker", Some("plughw:1,0".to_string()));
        assert_eq!(sink.args(Path::new("/tmp/a.wav")), ["-q", "-D", "plughw:1,0", "/tmp/a.wav"]);
        assert_eq!(sink.device_name(), "USB Speaker");
    }

    #[test]
    fn aplay_args_without_device() {
        let sink = AplaySink::new("default", None);
        assert_eq!(sink.args(Path::new("/tmp/a.wav")), ["-q", "/tmp/a.wav"]);
    }
}
