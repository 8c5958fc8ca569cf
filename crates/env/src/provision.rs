//! Sandbox provisioning: start a browser container, discover its endpoints,
//! open the control session and the crash-safety channel.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::{
    error::{EnvError, Result},
    establish::{ConnectPolicy, connect_devtools},
    liveness::LivenessChannel,
    runtime::{InspectRecord, RunRequest, SandboxRuntime},
    session::{ProtocolSession, SessionConnector},
    spec::EnvSpec,
};

/// Container port serving the DevTools protocol.
pub const DEVTOOLS_PORT: u16 = 9222;
/// Container port of the crash-safety listener.
pub const LIVENESS_PORT: u16 = 1337;
pub const DEFAULT_PORT_RANGE: &str = "9000-9999";
pub const DEFAULT_IMAGE: &str = "unixpickle/muniverse:0.107.0";
/// Upper bound on every provisioning and episode operation.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Occasionally returned by `docker run` on otherwise healthy hosts.
const TRANSIENT_RUN_ERROR: &str = "Error response from daemon: device or resource busy.";
const RUN_ATTEMPTS: u32 = 3;
/// Networks checked, in order, for the container address.
const ADDRESS_NETWORKS: &[&str] = &["bridge", "nat"];
/// Extra time past the provisioning deadline for closing what was opened.
const CLEANUP_GRACE: Duration = Duration::from_secs(10);

/// A running sandbox container.
#[derive(Debug)]
pub struct SandboxHandle {
    container_id: String,
    address: String,
    /// Container port (`9222/tcp`) to the port reachable at `address`.
    ports: HashMap<String, u16>,
    pub(crate) liveness: LivenessChannel,
}

impl SandboxHandle {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn ports(&self) -> &HashMap<String, u16> {
        &self.ports
    }

    pub fn devtools_host(&self) -> Option<String> {
        self.endpoint(DEVTOOLS_PORT)
    }

    fn endpoint(&self, container_port: u16) -> Option<String> {
        self.ports
            .get(&port_key(container_port))
            .map(|p| format!("{}:{p}", self.address))
    }
}

fn port_key(port: u16) -> String {
    format!("{port}/tcp")
}

/// Starts sandboxes through a [`SandboxRuntime`].
pub struct Provisioner {
    runtime: Arc<dyn SandboxRuntime>,
    connector: Arc<dyn SessionConnector>,
    port_range: String,
    connect_policy: ConnectPolicy,
    timeout: Duration,
    /// Whether published ports are reachable on `localhost`. False on hosts
    /// (Windows) where the container must be reached on its own address.
    routes_published_ports: bool,
}

impl Provisioner {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            runtime,
            connector,
            port_range: DEFAULT_PORT_RANGE.to_string(),
            connect_policy: ConnectPolicy::default(),
            timeout: CALL_TIMEOUT,
            routes_published_ports: !cfg!(target_os = "windows"),
        }
    }

    #[must_use]
    pub fn with_port_range(mut self, range: impl Into<String>) -> Self {
        self.port_range = range.into();
        self
    }

    #[must_use]
    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_published_port_routing(mut self, routes: bool) -> Self {
        self.routes_published_ports = routes;
        self
    }

    pub fn runtime(&self) -> Arc<dyn SandboxRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Start a sandbox for `spec` and connect to it.
    ///
    /// On any failure after the container started, the container is killed
    /// and every connection opened so far is closed.
    pub async fn provision(
        &self,
        image: &str,
        games_dir: Option<&Path>,
        spec: &EnvSpec,
    ) -> Result<(SandboxHandle, Box<dyn ProtocolSession>)> {
        let started = Mutex::new(None::<String>);
        let deadline = Instant::now() + self.timeout;

        // Steps inside honour `deadline` themselves and release what they
        // opened; the grace only lets that cleanup finish.
        let result = tokio::time::timeout_at(
            deadline + CLEANUP_GRACE,
            self.provision_inner(image, games_dir, spec, deadline, &started),
        )
        .await
        .unwrap_or_else(|_| Err(self.timed_out()));

        if result.is_err() {
            let id = started.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(id) = id {
                self.kill_quietly(&id).await;
            }
        }

        #[cfg(feature = "metrics")]
        match result {
            Ok(_) => metrics::counter!(crate::metrics::SANDBOXES_STARTED_TOTAL).increment(1),
            Err(_) => metrics::counter!(crate::metrics::PROVISION_FAILURES_TOTAL).increment(1),
        }

        result
    }

    async fn provision_inner(
        &self,
        image: &str,
        games_dir: Option<&Path>,
        spec: &EnvSpec,
        deadline: Instant,
        started: &Mutex<Option<String>>,
    ) -> Result<(SandboxHandle, Box<dyn ProtocolSession>)> {
        let request = RunRequest {
            image: image.to_string(),
            games_dir: games_dir.map(Path::to_path_buf),
            port_range: self.port_range.clone(),
            ports: vec![DEVTOOLS_PORT, LIVENESS_PORT],
            viewport_width: spec.width,
            viewport_height: spec.height,
        };

        let (container_id, published, address) =
            tokio::time::timeout_at(deadline, self.start_container(&request, started))
                .await
                .unwrap_or_else(|_| Err(self.timed_out()))?;
        let ports = if self.routes_published_ports {
            published
        } else {
            // The container's own address is reached on the container ports.
            published
                .keys()
                .filter_map(|k| {
                    let port = k.split('/').next()?.parse().ok()?;
                    Some((k.clone(), port))
                })
                .collect()
        };
        info!(container_id, address, ?ports, "sandbox container started");

        for port in [DEVTOOLS_PORT, LIVENESS_PORT] {
            if !ports.contains_key(&port_key(port)) {
                return Err(EnvError::Discovery(format!(
                    "container port {} is not published",
                    port_key(port)
                )));
            }
        }
        let devtools_port = ports[&port_key(DEVTOOLS_PORT)];
        let liveness_port = ports[&port_key(LIVENESS_PORT)];

        let session = connect_devtools(
            self.connector.as_ref(),
            &format!("{address}:{devtools_port}"),
            self.connect_policy,
            deadline,
        )
        .await
        .map_err(|e| match e {
            EnvError::Timeout(_) => self.timed_out(),
            other => other,
        })?;

        let liveness_addr = format!("{address}:{liveness_port}");
        let liveness = tokio::time::timeout_at(deadline, LivenessChannel::connect(&liveness_addr))
            .await
            .unwrap_or_else(|_| Err(self.timed_out()));
        let liveness = match liveness {
            Ok(channel) => channel,
            Err(e) => {
                warn!(container_id, error = %e, "failed to connect to kill socket");
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "failed to close devtools session");
                }
                return Err(e);
            },
        };

        *started.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!(container_id, "created environment sandbox");

        Ok((
            SandboxHandle {
                container_id,
                address,
                ports,
                liveness,
            },
            session,
        ))
    }

    /// Run the container, then read back its published ports and address.
    async fn start_container(
        &self,
        request: &RunRequest,
        started: &Mutex<Option<String>>,
    ) -> Result<(String, HashMap<String, u16>, String)> {
        info!(image = %request.image, "starting sandbox container");
        let container_id = self.run_with_retry(request).await?;
        *started.lock().unwrap_or_else(|e| e.into_inner()) = Some(container_id.clone());

        debug!(container_id, "getting ports and address");
        let published = bound_ports(&self.runtime.inspect(&container_id).await?)?;
        let address = self.resolve_address(&container_id).await?;
        Ok((container_id, published, address))
    }

    fn timed_out(&self) -> EnvError {
        EnvError::Provisioning(format!("timed out after {}s", self.timeout.as_secs()))
    }

    async fn run_with_retry(&self, request: &RunRequest) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.runtime.run(request).await {
                Ok(id) => return Ok(id),
                Err(e)
                    if attempt < RUN_ATTEMPTS && e.to_string().contains(TRANSIENT_RUN_ERROR) =>
                {
                    warn!(
                        attempt,
                        error = %e,
                        "container run hit transient daemon error, retrying"
                    );
                    attempt += 1;
                },
                Err(e) => {
                    warn!(attempt, error = %e, "container run failed");
                    return Err(EnvError::Provisioning(e.to_string()));
                },
            }
        }
    }

    async fn resolve_address(&self, container_id: &str) -> Result<String> {
        if self.routes_published_ports {
            return Ok("localhost".to_string());
        }
        for network in ADDRESS_NETWORKS {
            let addr = self.runtime.network_address(container_id, network).await?;
            if addr.is_empty() || addr == "<no value>" {
                debug!(container_id, network, "no address on network");
                continue;
            }
            return Ok(addr);
        }
        Err(EnvError::Discovery(
            "unable to find container IP address".into(),
        ))
    }

    async fn kill_quietly(&self, container_id: &str) {
        if let Err(e) = self.runtime.kill(container_id).await {
            warn!(container_id, error = %e, "failed to kill container after provisioning failure");
        }
    }
}

/// Map each published container port to its single host port.
fn bound_ports(records: &[InspectRecord]) -> Result<HashMap<String, u16>> {
    let [record] = records else {
        return Err(EnvError::Discovery(format!(
            "unexpected number of inspect results: {}",
            records.len()
        )));
    };
    let mut mapping = HashMap::new();
    for (container_port, bindings) in &record.network_settings.ports {
        let binding = match bindings.as_deref() {
            Some([binding]) => binding,
            other => {
                return Err(EnvError::Discovery(format!(
                    "unexpected number of host ports for {container_port}: {}",
                    other.map_or(0, <[_]>::len)
                )));
            },
        };
        let host_port = binding.host_port.parse::<u16>().map_err(|e| {
            EnvError::Discovery(format!(
                "invalid host port {:?} for {container_port}: {e}",
                binding.host_port
            ))
        })?;
        mapping.insert(container_port.clone(), host_port);
    }
    Ok(mapping)
}
