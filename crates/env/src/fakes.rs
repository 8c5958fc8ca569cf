//! In-memory sessions, connectors and runtimes that record every call.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, VecDeque},
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    serde_json::{Value, json},
};

use crate::{
    error::{EnvError, Result},
    event::{KeyEvent, PointerEvent},
    runtime::{HostBinding, InspectRecord, NetworkSettings, RunRequest, SandboxRuntime},
    session::{ImageFormat, NavigateMode, ProtocolSession, SessionConnector, TargetInfo},
};

/// A call observed by [`FakeSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String, NavigateMode),
    Evaluate(String),
    Pointer(PointerEvent),
    Key(KeyEvent),
    Screenshot(ImageFormat, Option<u8>),
    Close,
}

#[derive(Default)]
struct SessionState {
    calls: Vec<Call>,
    scores: VecDeque<f64>,
    last_score: f64,
    dones: VecDeque<bool>,
    is_404: bool,
    fail_on: Option<String>,
    canvas: Option<Value>,
    close_fails: bool,
    log: Vec<String>,
    eval_delay: Option<Duration>,
}

/// Scripted in-page adapter behind a [`ProtocolSession`].
pub struct FakeSession {
    state: Arc<Mutex<SessionState>>,
}

/// Test-side view of a [`FakeSession`].
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<SessionState>>,
}

impl FakeSession {
    pub fn new() -> (Self, FakeHandle) {
        let state = Arc::new(Mutex::new(SessionState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeHandle { state },
        )
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    /// Scripts evaluated so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Evaluate(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Dispatched input events, in order.
    pub fn inputs(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Pointer(_) | Call::Key(_)))
            .collect()
    }

    /// Successive values returned by `score()`. The last one repeats.
    pub fn push_scores(&self, scores: &[f64]) {
        self.state.lock().unwrap().scores.extend(scores);
    }

    /// Successive values returned by `step()`. Defaults to `false`.
    pub fn push_dones(&self, dones: &[bool]) {
        self.state.lock().unwrap().dones.extend(dones);
    }

    pub fn set_404(&self, is_404: bool) {
        self.state.lock().unwrap().is_404 = is_404;
    }

    /// Fail every evaluation whose script contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_on = None;
    }

    pub fn set_canvas(&self, png: Vec<u8>) {
        self.set_canvas_value(Value::String(BASE64.encode(png)));
    }

    pub fn set_canvas_value(&self, value: Value) {
        self.state.lock().unwrap().canvas = Some(value);
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().close_fails = true;
    }

    pub fn push_log(&self, line: &str) {
        self.state.lock().unwrap().log.push(line.to_string());
    }

    pub fn set_eval_delay(&self, delay: Duration) {
        self.state.lock().unwrap().eval_delay = Some(delay);
    }
}

#[async_trait]
impl ProtocolSession for FakeSession {
    async fn navigate(&self, url: &str, mode: NavigateMode) -> Result<()> {
        self.record(Call::Navigate(url.to_string(), mode));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.record(Call::Evaluate(script.to_string()));
        let delay = self.state.lock().unwrap().eval_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(needle) = state.fail_on.as_deref().filter(|n| script.contains(n)) {
            return Err(EnvError::Evaluation(format!("scripted failure for {needle}")));
        }
        if script.contains("document.title.startsWith('404')") {
            return Ok(json!(state.is_404));
        }
        if script.contains("window.muniverse.score()") {
            if let Some(score) = state.scores.pop_front() {
                state.last_score = score;
            }
            return Ok(json!(state.last_score));
        }
        if script.contains("window.muniverse.step(") {
            return Ok(json!(state.dones.pop_front().unwrap_or(false)));
        }
        if script.contains("getElementsByTagName('canvas')") {
            return state
                .canvas
                .clone()
                .ok_or_else(|| EnvError::Evaluation("Error: no canvas element".into()));
        }
        Ok(Value::Null)
    }

    async fn dispatch_pointer(&self, event: &PointerEvent) -> Result<()> {
        self.record(Call::Pointer(event.clone()));
        Ok(())
    }

    async fn dispatch_key(&self, event: &KeyEvent) -> Result<()> {
        self.record(Call::Key(event.clone()));
        Ok(())
    }

    async fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>> {
        self.record(Call::Screenshot(format, quality));
        Ok(match format {
            ImageFormat::Png => png_bytes(8, 6),
            ImageFormat::Jpeg => jpeg_bytes(8, 6),
        })
    }

    fn console_log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        if self.state.lock().unwrap().close_fails {
            return Err(EnvError::Cdp("websocket already gone".into()));
        }
        Ok(())
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 20) as u8, (y * 30) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

pub fn page_target(id: &str) -> TargetInfo {
    TargetInfo {
        id: id.to_string(),
        target_type: "page".to_string(),
        url: "about:blank".to_string(),
        web_socket_debugger_url: format!("ws://127.0.0.1:9222/devtools/page/{id}"),
    }
}

/// Scripted target listings. Once the script runs out every listing is empty.
pub struct FakeConnector {
    listings: Mutex<VecDeque<Result<Vec<TargetInfo>>>>,
    list_calls: AtomicUsize,
    hosts: Mutex<Vec<String>>,
    connected: Mutex<Vec<String>>,
    last_session: Mutex<Option<FakeHandle>>,
    hangs: bool,
}

impl FakeConnector {
    pub fn new(listings: Vec<Result<Vec<TargetInfo>>>) -> Self {
        Self {
            listings: Mutex::new(listings.into()),
            list_calls: AtomicUsize::new(0),
            hosts: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            last_session: Mutex::new(None),
            hangs: false,
        }
    }

    /// Target listing never answers.
    pub fn hanging(mut self) -> Self {
        self.hangs = true;
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Hosts passed to `connect`.
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }

    /// Target ids passed to `connect`.
    pub fn connected_targets(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }

    /// Handle on the most recently opened session.
    pub fn session(&self) -> FakeHandle {
        self.last_session
            .lock()
            .unwrap()
            .clone()
            .expect("no session was opened")
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn list_targets(&self, _host: &str) -> Result<Vec<TargetInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.hangs {
            std::future::pending::<()>().await;
        }
        self.listings
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn connect(&self, host: &str, target: &TargetInfo) -> Result<Box<dyn ProtocolSession>> {
        self.hosts.lock().unwrap().push(host.to_string());
        self.connected.lock().unwrap().push(target.id.clone());
        let (session, handle) = FakeSession::new();
        *self.last_session.lock().unwrap() = Some(handle);
        Ok(Box::new(session))
    }
}

pub fn inspect_record(devtools_port: u16, liveness_port: u16) -> InspectRecord {
    let binding = |port: u16| {
        Some(vec![HostBinding {
            host_ip: "0.0.0.0".into(),
            host_port: port.to_string(),
        }])
    };
    InspectRecord {
        id: "c0ffee".into(),
        network_settings: NetworkSettings {
            ports: HashMap::from([
                ("9222/tcp".to_string(), binding(devtools_port)),
                ("1337/tcp".to_string(), binding(liveness_port)),
            ]),
        },
    }
}

/// Scripted container runtime.
pub struct FakeRuntime {
    runs: Mutex<VecDeque<Result<String>>>,
    run_requests: Mutex<Vec<RunRequest>>,
    records: Vec<InspectRecord>,
    networks: HashMap<String, String>,
    kill_fails: bool,
    killed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new(runs: Vec<Result<String>>, records: Vec<InspectRecord>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            run_requests: Mutex::new(Vec::new()),
            records,
            networks: HashMap::new(),
            kill_fails: false,
            killed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_networks(mut self, networks: &[(&str, &str)]) -> Self {
        self.networks = networks
            .iter()
            .map(|(n, a)| (n.to_string(), a.to_string()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_inspect(mut self, records: Vec<InspectRecord>) -> Self {
        self.records = records;
        self
    }

    #[must_use]
    pub fn with_kill_failure(mut self) -> Self {
        self.kill_fails = true;
        self
    }

    pub fn transient() -> EnvError {
        EnvError::Runtime {
            command: "docker run".into(),
            message: "exit status: 125: docker: Error response from daemon: device or resource \
                      busy. (make sure docker is up-to-date)"
                .into(),
        }
    }

    pub fn run_calls(&self) -> usize {
        self.run_requests.lock().unwrap().len()
    }

    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.run_requests.lock().unwrap().clone()
    }

    /// Container ids passed to `kill`, including failed attempts.
    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn run(&self, request: &RunRequest) -> Result<String> {
        self.run_requests.lock().unwrap().push(request.clone());
        self.runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EnvError::Provisioning("no scripted run result".into())))
    }

    async fn inspect(&self, _id: &str) -> Result<Vec<InspectRecord>> {
        Ok(self.records.clone())
    }

    async fn network_address(&self, _id: &str, network: &str) -> Result<String> {
        Ok(self.networks.get(network).cloned().unwrap_or_default())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.killed.lock().unwrap().push(id.to_string());
        if self.kill_fails {
            return Err(EnvError::Runtime {
                command: format!("docker kill {id}"),
                message: format!("exit status: 1: Error: No such container: {id}"),
            });
        }
        Ok(())
    }
}
