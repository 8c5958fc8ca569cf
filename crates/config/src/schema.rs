//! Config schema types for environments and the episode runner.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelgymConfig {
    /// JSON file listing known game specs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_catalog: Option<PathBuf>,
    pub env: EnvConfig,
    pub run: RunConfig,
}

/// How environments are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Container image override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_image: Option<String>,
    /// Host directory mounted into the container as the games folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub games_dir: Option<PathBuf>,
    /// Attach to this DevTools `host:port` instead of starting a container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devtools_host: Option<String>,
    /// Game asset server, required with `devtools_host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_host: Option<String>,
    pub compression: bool,
    pub compression_quality: u8,
    pub call_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
    /// Host port range published container ports are drawn from.
    pub port_range: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            custom_image: None,
            games_dir: None,
            devtools_host: None,
            game_host: None,
            compression: false,
            compression_quality: default_compression_quality(),
            call_timeout_secs: default_call_timeout_secs(),
            connect_attempts: default_connect_attempts(),
            connect_interval_ms: default_connect_interval_ms(),
            port_range: default_port_range(),
        }
    }
}

fn default_compression_quality() -> u8 {
    80
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_connect_attempts() -> u32 {
    20
}

fn default_connect_interval_ms() -> u64 {
    1000
}

fn default_port_range() -> String {
    "9000-9999".into()
}

/// Defaults for `pixelgym run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub episodes: u32,
    /// Steps per episode before giving up on termination.
    pub max_steps: u32,
    /// Simulated time per step.
    pub step_ms: u64,
    /// Where final observations are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            episodes: 1,
            max_steps: 500,
            step_ms: 100,
            save_dir: None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: PixelgymConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, PixelgymConfig::default());
        assert_eq!(cfg.env.call_timeout_secs, 120);
        assert_eq!(cfg.env.port_range, "9000-9999");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: PixelgymConfig = toml::from_str(
            r#"
[env]
compression = true
compression_quality = 35
"#,
        )
        .unwrap();
        assert!(cfg.env.compression);
        assert_eq!(cfg.env.compression_quality, 35);
        assert_eq!(cfg.env.connect_attempts, 20);
        assert_eq!(cfg.run.max_steps, 500);
    }

    #[test]
    fn unset_options_are_not_serialized() {
        let out = toml::to_string(&PixelgymConfig::default()).unwrap();
        assert!(!out.contains("devtools_host"));
        assert!(out.contains("port_range = \"9000-9999\""));
    }
}
