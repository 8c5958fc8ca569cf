//! Container runtime capability.
//!
//! All invocations of the runtime CLI go through a [`CliGuard`]. Concurrent
//! invocations of the same client are not safe, so the default guard is
//! shared by every environment in the process.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tokio::sync::Mutex,
    tracing::debug,
};

use crate::error::{EnvError, Result};

/// Serializes runtime CLI invocations.
#[derive(Debug, Clone, Default)]
pub struct CliGuard(Arc<Mutex<()>>);

static GLOBAL_GUARD: LazyLock<CliGuard> = LazyLock::new(CliGuard::default);

impl CliGuard {
    /// The process-wide guard.
    pub fn global() -> Self {
        GLOBAL_GUARD.clone()
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Parameters for starting a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub image: String,
    /// Host directory mounted as the games folder.
    pub games_dir: Option<PathBuf>,
    /// Host port range published for every container port, e.g. `9000-9999`.
    pub port_range: String,
    /// Container ports to publish.
    pub ports: Vec<u16>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Where the games directory is mounted inside the container.
pub const GAMES_MOUNT: &str = "/downloaded_games";

impl RunRequest {
    /// CLI arguments for `docker run`.
    pub fn to_args(&self) -> Result<Vec<String>> {
        let mut args = vec!["run".to_string()];
        for port in &self.ports {
            args.push("-p".into());
            args.push(format!("{}:{port}", self.port_range));
        }
        args.extend([
            "--shm-size=200m".to_string(),
            "-d".to_string(),   // Detached
            "--rm".to_string(), // Auto-remove on stop
            "-i".to_string(),   // Keep stdin open for the liveness listener
        ]);
        if let Some(ref dir) = self.games_dir {
            let dir = dir.display().to_string();
            if dir.contains(':') {
                return Err(EnvError::Configuration(format!(
                    "path contains colons: {dir}"
                )));
            }
            args.push("-v".into());
            args.push(format!("{dir}:{GAMES_MOUNT}"));
        }
        args.push(self.image.clone());
        args.push(format!(
            "--window-size={},{}",
            self.viewport_width, self.viewport_height
        ));
        Ok(args)
    }
}

/// One host binding of a published container port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkSettings {
    /// Container port (`9222/tcp`) to host bindings. `None` for unpublished ports.
    #[serde(rename = "Ports", default)]
    pub ports: HashMap<String, Option<Vec<HostBinding>>>,
}

/// The subset of `docker inspect` output the provisioner needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InspectRecord {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
}

/// Run/inspect/kill capability of a container runtime.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Start a detached container, returning its id.
    async fn run(&self, request: &RunRequest) -> Result<String>;

    async fn inspect(&self, id: &str) -> Result<Vec<InspectRecord>>;

    /// The container's address on `network`, or an empty string if unset.
    async fn network_address(&self, id: &str, network: &str) -> Result<String>;

    async fn kill(&self, id: &str) -> Result<()>;
}

/// [`SandboxRuntime`] backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    cli: String,
    guard: CliGuard,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(CliGuard::global())
    }
}

impl DockerCli {
    pub fn new(guard: CliGuard) -> Self {
        Self {
            cli: "docker".to_string(),
            guard,
        }
    }

    /// Use `cli` instead of `docker`, e.g. a compatible runtime.
    #[must_use]
    pub fn with_cli(mut self, cli: impl Into<String>) -> Self {
        self.cli = cli.into();
        self
    }

    /// Fail unless the CLI can be found on `PATH`.
    pub fn ensure_available(&self) -> Result<()> {
        which::which(&self.cli).map(drop).map_err(|e| {
            EnvError::Provisioning(format!("{} not found in PATH: {e}", self.cli))
        })
    }

    async fn command(&self, args: &[String]) -> Result<Vec<u8>> {
        let _lock = self.guard.lock().await;
        let command = format!("{} {}", self.cli, args.join(" "));
        debug!(command, "invoking container runtime");

        let output = tokio::process::Command::new(&self.cli)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EnvError::Runtime {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {stderr}", output.status)
            };
            return Err(EnvError::Runtime { command, message });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SandboxRuntime for DockerCli {
    async fn run(&self, request: &RunRequest) -> Result<String> {
        let args = request.to_args()?;
        let stdout = self.command(&args).await.map_err(|e| match e {
            EnvError::Runtime { command, message } => EnvError::Runtime {
                command,
                message: format!("{message} (make sure docker is up-to-date)"),
            },
            other => other,
        })?;
        let id = String::from_utf8_lossy(&stdout).trim().to_string();
        if id.is_empty() {
            return Err(EnvError::Provisioning(
                "docker returned empty container ID".into(),
            ));
        }
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<Vec<InspectRecord>> {
        let stdout = self
            .command(&["inspect".to_string(), id.to_string()])
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| EnvError::Discovery(format!("unparseable inspect output: {e}")))
    }

    async fn network_address(&self, id: &str, network: &str) -> Result<String> {
        let stdout = self
            .command(&[
                "inspect".to_string(),
                "--format".to_string(),
                format!("{{{{ .NetworkSettings.Networks.{network}.IPAddress }}}}"),
                id.to_string(),
            ])
            .await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.command(&["kill".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_cli_is_reported() {
        let err = DockerCli::default()
            .with_cli("pixelgym-no-such-runtime")
            .ensure_available()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(err.to_string().contains("pixelgym-no-such-runtime not found in PATH"));
    }

    fn request() -> RunRequest {
        RunRequest {
            image: "games/sandbox:1".into(),
            games_dir: None,
            port_range: "9000-9999".into(),
            ports: vec![9222, 1337],
            viewport_width: 84,
            viewport_height: 84,
        }
    }

    #[test]
    fn run_args_publish_every_port() {
        let args = request().to_args().unwrap();
        assert_eq!(args, vec![
            "run",
            "-p",
            "9000-9999:9222",
            "-p",
            "9000-9999:1337",
            "--shm-size=200m",
            "-d",
            "--rm",
            "-i",
            "games/sandbox:1",
            "--window-size=84,84",
        ]);
    }

    #[test]
    fn run_args_mount_games_dir() {
        let mut req = request();
        req.games_dir = Some(PathBuf::from("/srv/games"));
        let args = req.to_args().unwrap();
        let pos = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[pos + 1], "/srv/games:/downloaded_games");
        // The image and its arguments stay last.
        assert_eq!(args[args.len() - 2], "games/sandbox:1");
    }

    #[test]
    fn run_args_reject_colon_paths() {
        let mut req = request();
        req.games_dir = Some(PathBuf::from("C:/games"));
        let err = req.to_args().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn inspect_output_parses() {
        let raw = r#"[{
            "Id": "abc",
            "NetworkSettings": {
                "Ports": {
                    "9222/tcp": [{"HostIp": "0.0.0.0", "HostPort": "9001"}],
                    "1337/tcp": [{"HostIp": "0.0.0.0", "HostPort": "9002"}],
                    "80/tcp": null
                }
            }
        }]"#;
        let records: Vec<InspectRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records.len(), 1);
        let ports = &records[0].network_settings.ports;
        assert_eq!(ports["9222/tcp"].as_ref().unwrap()[0].host_port, "9001");
        assert!(ports["80/tcp"].is_none());
    }

    #[tokio::test]
    async fn global_guard_is_shared() {
        let a = CliGuard::global();
        let b = CliGuard::global();
        let _held = a.lock().await;
        assert!(b.0.try_lock().is_err());
    }
}
