//! Configuration – reads `~/.labrig/config.toml`.
//!
//! Every field has a default, so a missing or partial file is valid. The
//! file location can be overridden with `LABRIG_CONFIG`.

use labrig_types::{
    ArmConfig, AutomationConfig, RigConfig, ThermalConfig, VolumeConfig, WebcamConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// `[server]`: listeners, worker pool and process-wide switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// WebSocket command channel.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// MJPEG and JSON media endpoints.
    #[serde(default = "default_media_port")]
    pub media_port: u16,

    /// Upper bound on threads running blocking driver calls.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// `"compact"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Run against simulated drivers.
    #[serde(default)]
    pub simulate: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_ws_port() -> u16 {
    8765
}
fn default_media_port() -> u16 {
    8081
}
fn default_worker_threads() -> usize {
    16
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ws_port: default_ws_port(),
            media_port: default_media_port(),
            worker_threads: default_worker_threads(),
            log_format: default_log_format(),
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub arm: ArmConfig,
    #[serde(default)]
    pub rig: RigConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub webcam: WebcamConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
}

/// `LABRIG_CONFIG` if set, otherwise `~/.labrig/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LABRIG_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".labrig").join("config.toml")
}

/// Load the config with environment overrides applied.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

/// Load the file at `path`; defaults when it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

/// Apply environment overrides, reading variables through `var`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LABRIG_HOST` | `server.host` |
/// | `LABRIG_WS_PORT` | `server.ws_port` |
/// | `LABRIG_MEDIA_PORT` | `server.media_port` |
/// | `LABRIG_SIMULATE` | `server.simulate` |
/// | `LABRIG_VISION_MODEL` | `volume.model` |
/// | `ANTHROPIC_API_KEY` | `volume.api_key`, when the file leaves it empty |
pub fn apply_env_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("LABRIG_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = var("LABRIG_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server.ws_port = port;
    }
    if let Some(v) = var("LABRIG_MEDIA_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server.media_port = port;
    }
    if let Some(v) = var("LABRIG_SIMULATE") {
        cfg.server.simulate = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Some(v) = var("LABRIG_VISION_MODEL") {
        cfg.volume.model = v;
    }
    if cfg.volume.api_key.is_empty()
        && let Some(key) = var("ANTHROPIC_API_KEY")
    {
        cfg.volume.api_key = key.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_path_points_to_labrig_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.labrig/config.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load_from(&dir.path().join("absent.toml")).expect("no error");
        assert_eq!(cfg.server, ServerConfig::default());
        assert_eq!(cfg.server.ws_port, 8765);
        assert_eq!(cfg.server.media_port, 8081);
        assert_eq!(cfg.arm.servo_ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(cfg.automation.volume_dropper, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
ws_port = 9000
simulate = true

[rig]
base_positions = [10.0, 100.0]

[automation]
ml_per_send = 2.5
"#,
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok");
        assert_eq!(cfg.server.ws_port, 9000);
        assert!(cfg.server.simulate);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.rig.base_positions, vec![10.0, 100.0]);
        assert_eq!(cfg.rig.channels, 4);
        assert_eq!(cfg.automation.ml_per_send, 2.5);
        assert_eq!(cfg.thermal.stream_path, "/thermal.mjpeg");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nws_port = ").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse"), "{err}");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("LABRIG_HOST", "127.0.0.1"),
                ("LABRIG_WS_PORT", "9100"),
                ("LABRIG_MEDIA_PORT", "9101"),
                ("LABRIG_SIMULATE", "true"),
                ("LABRIG_VISION_MODEL", "claude-sonnet-4-5"),
                ("ANTHROPIC_API_KEY", " sk-ant-test \n"),
            ]),
        );
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.ws_port, 9100);
        assert_eq!(cfg.server.media_port, 9101);
        assert!(cfg.server.simulate);
        assert_eq!(cfg.volume.model, "claude-sonnet-4-5");
        assert_eq!(cfg.volume.api_key, "sk-ant-test");
    }

    #[test]
    fn invalid_port_is_ignored() {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, env(&[("LABRIG_WS_PORT", "not-a-port")]));
        assert_eq!(cfg.server.ws_port, 8765);
    }

    #[test]
    fn file_api_key_wins_over_environment() {
        let mut cfg = Config::default();
        cfg.volume.api_key = "from-file".into();
        apply_env_overrides(&mut cfg, env(&[("ANTHROPIC_API_KEY", "from-env")]));
        assert_eq!(cfg.volume.api_key, "from-file");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut cfg = Config::default();
        cfg.volume.api_key = "sk-ant-super-secret".into();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("sk-ant-super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
