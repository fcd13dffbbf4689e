//! Configuration – reads/writes `~/.sightline/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Values are resolved as: file (or default) → `SIGHTLINE_*` environment
//! overrides → [`Config::validate`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sightline_runtime::OrchestratorConfig;
use sightline_types::SightError;

const BASE_DIR: &str = "/opt/ai_assistant";

/// Persisted device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run detection on every N-th frame (≥ 1).
    pub infer_every_n_frames: u64,
    /// Minimum detector confidence in `[0, 1]`.
    pub confidence_threshold: f32,
    pub max_repeat: u32,
    pub cooldown_seconds: u64,

    /// Label stored with each audio event.
    pub output_device: String,
    /// ALSA device passed to `aplay -D`; the system default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alsa_device: Option<String>,
    pub language_code: String,

    pub db_path: PathBuf,
    pub app_version: String,
    pub model_id: Option<i64>,
    pub device_notes: Option<String>,

    pub frame_width: u32,
    pub frame_height: u32,
    /// Sleep between loop iterations, in milliseconds.
    pub pacing_ms: u64,

    /// Command that writes raw RGB24 frames to stdout.
    pub camera_command: Vec<String>,
    /// Command speaking the JSON-lines detector protocol on stdin/stdout.
    pub detector_command: Vec<String>,

    pub piper_bin: PathBuf,
    pub piper_model: PathBuf,
    pub piper_config: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let (width, height): (u32, u32) = (640, 480);
        Self {
            infer_every_n_frames: 3,
            confidence_threshold: 0.35,
            max_repeat: 2,
            cooldown_seconds: 600,
            output_device: "USB Speaker".to_string(),
            alsa_device: None,
            language_code: "en".to_string(),
            db_path: PathBuf::from(format!("{BASE_DIR}/visual_assistant_v1.db")),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            model_id: Some(1),
            device_notes: Some("Raspberry Pi target".to_string()),
            frame_width: width,
            frame_height: height,
            pacing_ms: 10,
            camera_command: vec![
                "rpicam-vid".to_string(),
                "-t".to_string(),
                "0".to_string(),
                "-n".to_string(),
                "--width".to_string(),
                width.to_string(),
                "--height".to_string(),
                height.to_string(),
                "--codec".to_string(),
                "rgb".to_string(),
                "-o".to_string(),
                "-".to_string(),
            ],
            detector_command: vec!["python3".to_string(), format!("{BASE_DIR}/detector.py")],
            piper_bin: PathBuf::from(format!("{BASE_DIR}/tools/piper_cli/piper")),
            piper_model: PathBuf::from(format!("{BASE_DIR}/models/piper/voice.onnx")),
            piper_config: PathBuf::from(format!("{BASE_DIR}/models/piper/voice.onnx.json")),
        }
    }
}

impl Config {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), SightError> {
        let fail = |msg: String| Err(SightError::Config(msg));
        if self.infer_every_n_frames == 0 {
            return fail("infer_every_n_frames must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold {} is outside [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return fail(format!(
                "frame size {}x{} must be non-zero",
                self.frame_width, self.frame_height
            ));
        }
        if self.language_code.trim().is_empty() {
            return fail("language_code must not be empty".into());
        }
        if self.db_path.as_os_str().is_empty() {
            return fail("db_path must not be empty".into());
        }
        if self.camera_command.is_empty() {
            return fail("camera_command must not be empty".into());
        }
        if self.detector_command.is_empty() {
            return fail("detector_command must not be empty".into());
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            infer_every_n_frames: self.infer_every_n_frames,
            confidence_threshold: self.confidence_threshold,
            max_repeat: self.max_repeat,
            cooldown_seconds: self.cooldown_seconds,
            app_version: self.app_version.clone(),
            model_id: self.model_id,
            device_notes: self.device_notes.clone(),
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}

/// Return the path to `~/.sightline/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sightline").join("config.toml")
}

/// Load, override from the environment, and validate.
///
/// A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<Config, SightError> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| SightError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| SightError::Config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `SIGHTLINE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SIGHTLINE_INFER_EVERY` | `infer_every_n_frames` |
/// | `SIGHTLINE_CONF_THRESHOLD` | `confidence_threshold` |
/// | `SIGHTLINE_MAX_REPEAT` | `max_repeat` |
/// | `SIGHTLINE_COOLDOWN_SECS` | `cooldown_seconds` |
/// | `SIGHTLINE_OUTPUT_DEVICE` | `output_device` |
/// | `SIGHTLINE_LANGUAGE` | `language_code` |
/// | `SIGHTLINE_DB_PATH` | `db_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Unparseable or out-of-range values are ignored.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("SIGHTLINE_INFER_EVERY").and_then(|v| v.trim().parse::<u64>().ok())
        && n >= 1
    {
        cfg.infer_every_n_frames = n;
    }
    if let Some(t) = lookup("SIGHTLINE_CONF_THRESHOLD").and_then(|v| v.trim().parse::<f32>().ok())
        && (0.0..=1.0).contains(&t)
    {
        cfg.confidence_threshold = t;
    }
    if let Some(n) = lookup("SIGHTLINE_MAX_REPEAT").and_then(|v| v.trim().parse::<u32>().ok()) {
        cfg.max_repeat = n;
    }
    if let Some(n) = lookup("SIGHTLINE_COOLDOWN_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
        cfg.cooldown_seconds = n;
    }
    if let Some(v) = lookup("SIGHTLINE_OUTPUT_DEVICE").filter(|v| !v.trim().is_empty()) {
        cfg.output_device = v;
    }
    if let Some(v) = lookup("SIGHTLINE_LANGUAGE").filter(|v| !v.trim().is_empty()) {
        cfg.language_code = v;
    }
    if let Some(v) = lookup("SIGHTLINE_DB_PATH").filter(|v| !v.trim().is_empty()) {
        cfg.db_path = PathBuf::from(v);
    }
}

/// Save the config, creating the parent directory if necessary.
///
/// Only a directory created here is restricted to its owner; an existing
/// parent keeps its permissions.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), SightError> {
    let io_err = |what: &str, e: std::io::Error| SightError::Config(format!("{what}: {e}"));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| SightError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| env.get(k).cloned());
        cfg
    }

    #[test]
    fn defaults_match_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.infer_every_n_frames, 3);
        assert!((cfg.confidence_threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(cfg.max_repeat, 2);
        assert_eq!(cfg.cooldown_seconds, 600);
        assert_eq!(cfg.output_device, "USB Speaker");
        assert_eq!(cfg.db_path, PathBuf::from("/opt/ai_assistant/visual_assistant_v1.db"));
        assert!(cfg.camera_command.contains(&"640".to_string()));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Config = toml::from_str("max_repeat = 5\nlanguage_code = \"es\"\n").unwrap();
        assert_eq!(cfg.max_repeat, 5);
        assert_eq!(cfg.language_code, "es");
        assert_eq!(cfg.infer_every_n_frames, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = overrides(&[
            ("SIGHTLINE_INFER_EVERY", "5"),
            ("SIGHTLINE_CONF_THRESHOLD", "0.5"),
            ("SIGHTLINE_MAX_REPEAT", "1"),
            ("SIGHTLINE_COOLDOWN_SECS", "30"),
            ("SIGHTLINE_OUTPUT_DEVICE", "HDMI"),
            ("SIGHTLINE_LANGUAGE", "fr"),
            ("SIGHTLINE_DB_PATH", "/tmp/a.db"),
        ]);
        assert_eq!(cfg.infer_every_n_frames, 5);
        assert!((cfg.confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.max_repeat, 1);
        assert_eq!(cfg.cooldown_seconds, 30);
        assert_eq!(cfg.output_device, "HDMI");
        assert_eq!(cfg.language_code, "fr");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/a.db"));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let cfg = overrides(&[
            ("SIGHTLINE_INFER_EVERY", "0"),
            ("SIGHTLINE_CONF_THRESHOLD", "1.7"),
            ("SIGHTLINE_MAX_REPEAT", "lots"),
            ("SIGHTLINE_LANGUAGE", "  "),
        ]);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            Config {
                infer_every_n_frames: 0,
                ..Config::default()
            },
            Config {
                confidence_threshold: -0.1,
                ..Config::default()
            },
            Config {
                frame_width: 0,
                ..Config::default()
            },
            Config {
                detector_command: Vec::new(),
                ..Config::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(SightError::Config(_))));
        }
    }

    #[test]
    fn invalid_file_value_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "infer_every_n_frames = 0\n").unwrap();
        assert!(matches!(load_from(&path), Err(SightError::Config(_))));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.max_repeat, Config::default().max_repeat);
    }

    #[test]
    fn roundtrip_saved_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            alsa_device: Some("plughw:1,0".into()),
            cooldown_seconds: 120,
            ..Config::default()
        };
        save_to(&cfg, &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let loaded: Config = toml::from_str(&raw).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn existing_parent_keeps_its_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o755)).unwrap();

        save_to(&Config::default(), &shared.join("s.toml")).unwrap();
        let mode = fs::metadata(&shared).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn bare_file_name_saves_in_current_directory() {
        let name = format!("sightline-save-{}.toml", std::process::id());
        let path = PathBuf::from(&name);
        let result = save_to(&Config::default(), &path);
        let written = path.exists();
        let _ = fs::remove_file(&path);
        result.unwrap();
        assert!(written);
    }

    #[test]
    fn config_path_points_to_sightline_dir() {
        let p = config_path_for_home("/home/pi");
        assert_eq!(p, PathBuf::from("/home/pi/.sightline/config.toml"));
    }

    #[test]
    fn orchestrator_config_carries_loop_settings() {
        let cfg = Config {
            pacing_ms: 25,
            ..Config::default()
        };
        let oc = cfg.orchestrator_config();
        assert_eq!(oc.infer_every_n_frames, 3);
        assert_eq!(oc.pacing, Duration::from_millis(25));
        assert_eq!(oc.device_notes.as_deref(), Some("Raspberry Pi target"));
    }
}
