use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::PixelgymConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "pixelgym.toml",
    "pixelgym.yaml",
    "pixelgym.yml",
    "pixelgym.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<PixelgymConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./pixelgym.{toml,yaml,yml,json}`
/// 2. `<user config dir>/pixelgym/pixelgym.{toml,yaml,yml,json}`
///
/// Returns `PixelgymConfig::default()` if no config file is found or the one
/// found does not load.
pub fn discover_and_load() -> PixelgymConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    PixelgymConfig::default()
}

/// Load `path` when given, otherwise discover. An explicit path must load.
pub fn load_or_discover(path: Option<&Path>) -> anyhow::Result<PixelgymConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(discover_and_load()),
    }
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/pixelgym/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "pixelgym").map(|d| d.config_dir().to_path_buf())
}

/// Render `config` as pretty TOML.
pub fn to_toml_string(config: &PixelgymConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn config_format(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<PixelgymConfig> {
    match config_format(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    match config_format(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_every_format_alike() {
        let dir = tempfile::tempdir().unwrap();
        let toml = write(
            &dir,
            "pixelgym.toml",
            "[env]\ncompression = true\ncompression_quality = 50\n",
        );
        let yaml = write(
            &dir,
            "pixelgym.yaml",
            "env:\n  compression: true\n  compression_quality: 50\n",
        );
        let json = write(
            &dir,
            "pixelgym.json",
            r#"{"env": {"compression": true, "compression_quality": 50}}"#,
        );

        let expected = load_config(&toml).unwrap();
        assert!(expected.env.compression);
        assert_eq!(load_config(&yaml).unwrap(), expected);
        assert_eq!(load_config(&json).unwrap(), expected);
    }

    #[test]
    fn unresolved_placeholder_survives_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "pixelgym.toml",
            "[env]\ncustom_image = \"${PIXELGYM_TEST_UNSET_IMAGE_VAR}\"\nport_range = \"${PIXELGYM_TEST_UNSET_RANGE:-9100-9200}\"\n",
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.env.custom_image.as_deref(),
            Some("${PIXELGYM_TEST_UNSET_IMAGE_VAR}")
        );
        assert_eq!(cfg.env.port_range, "9100-9200");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "pixelgym.ini", "env=1");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format: .ini"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_or_discover(Some(&missing)).is_err());
    }

    #[test]
    fn toml_rendering_round_trips() {
        let mut cfg = PixelgymConfig::default();
        cfg.env.devtools_host = Some("localhost:9222".into());
        cfg.env.game_host = Some("localhost:8080".into());
        let rendered = to_toml_string(&cfg).unwrap();
        assert_eq!(toml::from_str::<PixelgymConfig>(&rendered).unwrap(), cfg);
    }
}
