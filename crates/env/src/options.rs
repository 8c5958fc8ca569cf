//! Construction-time environment options.

use std::{path::PathBuf, time::Duration};

use crate::{
    error::{EnvError, Result},
    establish::ConnectPolicy,
    provision::{CALL_TIMEOUT, DEFAULT_IMAGE, DEFAULT_PORT_RANGE},
};

pub const DEFAULT_COMPRESSION_QUALITY: u8 = 80;

/// How a new environment is set up.
///
/// By default environments run inside a freshly started container. Setting
/// `devtools_host` attaches to an already running Chrome instead, in which
/// case `game_host` must name the server hosting the game assets.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvOptions {
    /// Container image override.
    pub custom_image: Option<String>,
    /// Host directory mounted into the container as the games folder.
    pub games_dir: Option<PathBuf>,
    /// `host:port` of an existing Chrome DevTools endpoint.
    pub devtools_host: Option<String>,
    /// Host serving the games when `devtools_host` is set.
    pub game_host: Option<String>,
    /// Capture lossy whole-frame observations.
    pub compression: bool,
    /// JPEG quality, 0 to 100, used when `compression` is set.
    pub compression_quality: u8,
    pub call_timeout: Duration,
    pub connect_policy: ConnectPolicy,
    pub port_range: String,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            custom_image: None,
            games_dir: None,
            devtools_host: None,
            game_host: None,
            compression: false,
            compression_quality: DEFAULT_COMPRESSION_QUALITY,
            call_timeout: CALL_TIMEOUT,
            connect_policy: ConnectPolicy::default(),
            port_range: DEFAULT_PORT_RANGE.to_string(),
        }
    }
}

impl EnvOptions {
    /// Attach to an existing Chrome instead of starting a container.
    pub fn external(devtools_host: impl Into<String>, game_host: impl Into<String>) -> Self {
        Self {
            devtools_host: Some(devtools_host.into()),
            game_host: Some(game_host.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_compression(mut self, quality: u8) -> Self {
        self.compression = true;
        self.compression_quality = quality;
        self
    }

    pub fn is_external(&self) -> bool {
        self.devtools_host.is_some()
    }

    pub fn image(&self) -> &str {
        self.custom_image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// JPEG quality when compression is enabled.
    pub fn compression(&self) -> Option<u8> {
        self.compression.then_some(self.compression_quality)
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.devtools_host, &self.game_host) {
            (Some(_), None) => {
                return Err(EnvError::Configuration(
                    "must set game_host with devtools_host".into(),
                ));
            },
            (None, Some(_)) => {
                return Err(EnvError::Configuration(
                    "game_host can only be used with devtools_host".into(),
                ));
            },
            _ => {},
        }
        if self.is_external() && (self.custom_image.is_some() || self.games_dir.is_some()) {
            return Err(EnvError::Configuration(
                "devtools_host cannot be combined with custom_image or games_dir".into(),
            ));
        }
        if self.compression_quality > 100 {
            return Err(EnvError::Configuration(format!(
                "compression_quality must be between 0 and 100, got {}",
                self.compression_quality
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(EnvError::Configuration("call_timeout must be positive".into()));
        }
        if self.connect_policy.attempts == 0 {
            return Err(EnvError::Configuration(
                "connect attempts must be at least 1".into(),
            ));
        }
        parse_port_range(&self.port_range)?;
        Ok(())
    }
}

/// Parse `low-high` into an inclusive port range.
pub fn parse_port_range(range: &str) -> Result<(u16, u16)> {
    let invalid = || EnvError::Configuration(format!("invalid port range: {range:?}"));
    let (low, high) = range.split_once('-').ok_or_else(invalid)?;
    let low: u16 = low.trim().parse().map_err(|_| invalid())?;
    let high: u16 = high.trim().parse().map_err(|_| invalid())?;
    if low == 0 || low > high {
        return Err(invalid());
    }
    Ok((low, high))
}

impl From<&pixelgym_config::schema::EnvConfig> for EnvOptions {
    fn from(cfg: &pixelgym_config::schema::EnvConfig) -> Self {
        Self {
            custom_image: cfg.custom_image.clone(),
            games_dir: cfg.games_dir.clone(),
            devtools_host: cfg.devtools_host.clone(),
            game_host: cfg.game_host.clone(),
            compression: cfg.compression,
            compression_quality: cfg.compression_quality,
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
            connect_policy: ConnectPolicy {
                attempts: cfg.connect_attempts,
                interval: Duration::from_millis(cfg.connect_interval_ms),
            },
            port_range: cfg.port_range.clone(),
        }
    }
}
