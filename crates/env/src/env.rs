//! Episode controller: the reset/step/observe/close state machine.

use std::{future::Future, sync::Arc, time::Duration};

use {
    serde_json::Value,
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::{
    capture::CaptureStrategy,
    cdp::{CdpConnector, REQUEST_TIMEOUT},
    error::{EnvError, Result, ResultExt},
    establish::connect_devtools,
    event::InputEvent,
    observation::Observation,
    options::EnvOptions,
    provision::{Provisioner, SandboxHandle},
    runtime::{DockerCli, SandboxRuntime},
    session::{NavigateMode, ProtocolSession, SessionConnector},
    spec::EnvSpec,
    teardown::Teardown,
};

/// Host the sandboxed browser uses to reach its bundled game server.
const SANDBOX_GAME_HOST: &str = "localhost";

const NOT_FOUND_CHECK: &str =
    "Promise.resolve(!window.muniverse && document.title.startsWith('404'));";
const SCORE_CALL: &str = "window.muniverse.score();";

/// Lifecycle state of an [`Env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    /// Created, never successfully reset.
    Uninitialized,
    /// An episode is running.
    Ready,
    /// The episode ended; observing is allowed, stepping needs a reset.
    Terminated,
    /// Resources released. Every operation fails.
    Closed,
}

/// Result of a single [`Env::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Score gained since the previous step or reset.
    pub reward: f64,
    pub done: bool,
}

struct Sandbox {
    handle: SandboxHandle,
    runtime: Arc<dyn SandboxRuntime>,
}

/// A browser game driven as an episodic environment.
///
/// Methods take `&mut self`; an environment is driven by a single caller.
pub struct Env {
    spec: EnvSpec,
    game_host: String,
    capture: CaptureStrategy,
    call_timeout: Duration,
    session: Option<Box<dyn ProtocolSession>>,
    sandbox: Option<Sandbox>,
    state: EpisodeState,
    has_navigated: bool,
    last_score: f64,
}

impl Env {
    /// Create an environment using the docker CLI and Chrome DevTools.
    pub async fn new(spec: &EnvSpec, options: EnvOptions) -> Result<Self> {
        Self::with_docker(spec, options, DockerCli::default()).await
    }

    async fn with_docker(spec: &EnvSpec, options: EnvOptions, docker: DockerCli) -> Result<Self> {
        if !options.is_external() {
            docker.ensure_available().op("create environment")?;
        }
        let connector = CdpConnector::new(REQUEST_TIMEOUT).op("create environment")?;
        Self::with_backends(spec, options, Arc::new(docker), Arc::new(connector)).await
    }

    /// Create an environment on explicit runtime and protocol backends.
    pub async fn with_backends(
        spec: &EnvSpec,
        options: EnvOptions,
        runtime: Arc<dyn SandboxRuntime>,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<Self> {
        Self::create(spec, options, runtime, connector)
            .await
            .op("create environment")
    }

    async fn create(
        spec: &EnvSpec,
        options: EnvOptions,
        runtime: Arc<dyn SandboxRuntime>,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<Self> {
        options.validate()?;
        let capture = CaptureStrategy::select(spec, options.compression());

        if let (Some(devtools_host), Some(game_host)) =
            (&options.devtools_host, &options.game_host)
        {
            let deadline = Instant::now() + options.call_timeout;
            let session = connect_devtools(
                connector.as_ref(),
                devtools_host,
                options.connect_policy,
                deadline,
            )
            .await?;
            info!(env = %spec.name, devtools_host, game_host, "attached to external chrome");
            return Ok(Self::assemble(
                spec,
                game_host.clone(),
                capture,
                options.call_timeout,
                session,
                None,
            ));
        }

        let provisioner = Provisioner::new(runtime, connector)
            .with_port_range(options.port_range.clone())
            .with_connect_policy(options.connect_policy)
            .with_timeout(options.call_timeout);
        let (handle, session) = provisioner
            .provision(options.image(), options.games_dir.as_deref(), spec)
            .await?;
        info!(env = %spec.name, container_id = handle.container_id(), "environment sandbox ready");
        Ok(Self::assemble(
            spec,
            SANDBOX_GAME_HOST.to_string(),
            capture,
            options.call_timeout,
            session,
            Some(Sandbox {
                handle,
                runtime: provisioner.runtime(),
            }),
        ))
    }

    fn assemble(
        spec: &EnvSpec,
        game_host: String,
        capture: CaptureStrategy,
        call_timeout: Duration,
        session: Box<dyn ProtocolSession>,
        sandbox: Option<Sandbox>,
    ) -> Self {
        Self {
            spec: spec.clone(),
            game_host,
            capture,
            call_timeout,
            session: Some(session),
            sandbox,
            state: EpisodeState::Uninitialized,
            has_navigated: false,
            last_score: 0.0,
        }
    }

    /// A copy of the spec this environment was created with.
    pub fn spec(&self) -> EnvSpec {
        self.spec.clone()
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn needs_reset(&self) -> bool {
        self.state != EpisodeState::Ready
    }

    pub fn capture_strategy(&self) -> CaptureStrategy {
        self.capture
    }

    pub fn sandbox(&self) -> Option<&SandboxHandle> {
        self.sandbox.as_ref().map(|s| &s.handle)
    }

    /// Console output gathered from the page so far.
    pub fn log(&self) -> Vec<String> {
        self.session
            .as_deref()
            .map(ProtocolSession::console_log)
            .unwrap_or_default()
    }

    /// Start a new episode.
    pub async fn reset(&mut self) -> Result<()> {
        let timeout = self.call_timeout;
        let result = bounded(timeout, "reset", self.reset_inner())
            .await
            .op("reset environment");
        record_outcome("reset", &result);
        result
    }

    async fn reset_inner(&mut self) -> Result<()> {
        let url = self.env_url();
        let session = open_session(self.state, &self.session)?;
        if self.state == EpisodeState::Ready {
            // A failed reset leaves the page unusable for stepping.
            self.state = EpisodeState::Terminated;
        }

        if self.has_navigated {
            session.navigate(&url, NavigateMode::Sync).await?;
        } else {
            session.navigate(&url, NavigateMode::Safe).await?;
            self.has_navigated = true;
        }

        let is_404 = as_bool(session.evaluate(NOT_FOUND_CHECK).await?, "404 check")?;
        if is_404 {
            return Err(EnvError::NotFound(self.spec.base_name().to_string()));
        }

        session
            .evaluate(&format!("window.muniverse.init({});", self.spec.options))
            .await?;

        self.last_score = query_score(session).await?;
        self.state = EpisodeState::Ready;
        info!(env = %self.spec.name, score = self.last_score, "episode reset");
        Ok(())
    }

    /// Apply `events` in order, then advance the game by `elapsed`.
    ///
    /// Keys outside the spec's whitelist are dropped. A touch event fails the
    /// call; events before it stay applied.
    pub async fn step(&mut self, elapsed: Duration, events: &[InputEvent]) -> Result<StepOutcome> {
        let timeout = self.call_timeout;
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = bounded(timeout, "step", self.step_inner(elapsed, events))
            .await
            .op("step environment");
        record_outcome("step", &result);

        #[cfg(feature = "metrics")]
        if let Ok(outcome) = &result {
            metrics::histogram!(crate::metrics::STEP_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            if outcome.done {
                metrics::counter!(crate::metrics::EPISODES_TERMINATED_TOTAL).increment(1);
            }
        }
        result
    }

    async fn step_inner(
        &mut self,
        elapsed: Duration,
        events: &[InputEvent],
    ) -> Result<StepOutcome> {
        let session = open_session(self.state, &self.session)?;
        if self.state != EpisodeState::Ready {
            return Err(EnvError::Sequence("environment needs reset"));
        }

        for event in events {
            match event {
                InputEvent::Pointer(pointer) => session.dispatch_pointer(pointer).await?,
                InputEvent::Key(key) if self.spec.allows_key(&key.code) => {
                    session.dispatch_key(key).await?;
                },
                InputEvent::Key(key) => {
                    debug!(code = %key.code, "dropping key outside whitelist");
                },
                InputEvent::Touch(_) => {
                    return Err(EnvError::UnsupportedEvent(event.kind().to_string()));
                },
            }
        }

        let millis = elapsed.as_millis();
        let done = as_bool(
            session
                .evaluate(&format!("window.muniverse.step({millis});"))
                .await?,
            "step",
        )?;
        if done {
            self.state = EpisodeState::Terminated;
        }

        let previous = self.last_score;
        self.last_score = query_score(session).await?;
        let reward = self.last_score - previous;
        debug!(millis, reward, done, "stepped environment");
        Ok(StepOutcome { reward, done })
    }

    /// Capture the current frame.
    pub async fn observe(&self) -> Result<Observation> {
        let result = bounded(self.call_timeout, "observe", self.observe_inner())
            .await
            .op("observe environment");
        record_outcome("observe", &result);
        result
    }

    async fn observe_inner(&self) -> Result<Observation> {
        let session = open_session(self.state, &self.session)?;
        if self.state == EpisodeState::Uninitialized {
            return Err(EnvError::Sequence("environment has not been reset"));
        }
        self.capture.capture(session).await
    }

    /// Release the page session, the container and the crash-safety channel.
    ///
    /// Every release step runs even if an earlier one fails; the first
    /// failure is returned. Closing twice is a [`EnvError::Closed`] error.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == EpisodeState::Closed {
            return Err(EnvError::Closed).op("close environment");
        }
        self.state = EpisodeState::Closed;
        let session = self.session.take();
        let mut sandbox = self.sandbox.take();

        let mut teardown = Teardown::new();
        if let Some(session) = session.as_deref() {
            teardown = teardown.step("close devtools session", session.close());
        }
        if let Some(Sandbox { handle, runtime }) = sandbox.as_mut() {
            let container_id = handle.container_id().to_string();
            let runtime = Arc::clone(runtime);
            teardown = teardown
                .step("kill container", async move { runtime.kill(&container_id).await })
                .step("close kill socket", handle.liveness.close());
        }

        let result = bounded(self.call_timeout, "close", teardown.run())
            .await
            .op("close environment");
        match &result {
            Ok(()) => info!(env = %self.spec.name, "environment closed"),
            Err(e) => warn!(env = %self.spec.name, error = %e, "environment closed with errors"),
        }
        result
    }

    fn env_url(&self) -> String {
        format!("http://{}/{}", self.game_host, self.spec.base_name())
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        if let Some(sandbox) = &self.sandbox {
            warn!(
                container_id = sandbox.handle.container_id(),
                "environment dropped without close, container left running"
            );
        }
    }
}

/// The live session, unless the environment was closed.
fn open_session(
    state: EpisodeState,
    session: &Option<Box<dyn ProtocolSession>>,
) -> Result<&dyn ProtocolSession> {
    match (state, session.as_deref()) {
        (EpisodeState::Closed, _) | (_, None) => Err(EnvError::Closed),
        (_, Some(session)) => Ok(session),
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(EnvError::Timeout(format!(
            "{operation} took longer than {}s",
            timeout.as_secs()
        )))
    })
}

async fn query_score(session: &dyn ProtocolSession) -> Result<f64> {
    let value = session.evaluate(SCORE_CALL).await.op("get score")?;
    value.as_f64().ok_or_else(|| {
        EnvError::Evaluation(format!("score() returned a non-number: {value}")).context("get score")
    })
}

fn as_bool(value: Value, what: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| EnvError::Evaluation(format!("{what} returned a non-boolean: {value}")))
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_outcome<T>(operation: &'static str, result: &Result<T>) {
    #[cfg(feature = "metrics")]
    match result {
        Ok(_) => match operation {
            "reset" => metrics::counter!(crate::metrics::RESETS_TOTAL).increment(1),
            "step" => metrics::counter!(crate::metrics::STEPS_TOTAL).increment(1),
            "observe" => metrics::counter!(crate::metrics::OBSERVATIONS_TOTAL).increment(1),
            _ => {},
        },
        Err(_) => {
            metrics::counter!(crate::metrics::ERRORS_TOTAL, "operation" => operation).increment(1)
        },
    }
}
