//! CDP-backed sessions built on chromiumoxide.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, Page,
        cdp::{
            browser_protocol::{
                input::{
                    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                    DispatchMouseEventType, MouseButton,
                },
                page::{CaptureScreenshotFormat, NavigateParams},
            },
            js_protocol::runtime::{EvaluateParams, EventConsoleApiCalled, EventExceptionThrown},
        },
        handler::HandlerConfig,
        page::ScreenshotParams,
    },
    futures::StreamExt,
    serde::Deserialize,
    tokio::task::JoinHandle,
    tracing::{debug, warn},
};

use crate::{
    error::{EnvError, Result},
    event::{KeyEvent, KeyEventType, PointerButton, PointerEvent, PointerEventType},
    session::{ImageFormat, NavigateMode, ProtocolSession, SessionConnector, TargetInfo},
};

/// Console lines kept per session before the oldest are dropped.
const MAX_LOG_LINES: usize = 1000;

/// Default bound on DevTools HTTP requests and protocol commands.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Connects to Chrome through its DevTools HTTP endpoints.
#[derive(Debug, Clone)]
pub struct CdpConnector {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl CdpConnector {
    /// `request_timeout` bounds each discovery request and each protocol
    /// command on the sessions this connector opens.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EnvError::ProtocolConnect(format!("build http client: {e}")))?;
        Ok(Self {
            http,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[async_trait]
impl SessionConnector for CdpConnector {
    async fn list_targets(&self, host: &str) -> Result<Vec<TargetInfo>> {
        let url = format!("http://{host}/json/list");
        let targets = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EnvError::ProtocolConnect(format!("GET {url}: {e}")))?
            .json::<Vec<TargetInfo>>()
            .await
            .map_err(|e| EnvError::ProtocolConnect(format!("GET {url}: {e}")))?;
        Ok(targets)
    }

    async fn connect(&self, host: &str, target: &TargetInfo) -> Result<Box<dyn ProtocolSession>> {
        let url = format!("http://{host}/json/version");
        let version = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EnvError::ProtocolConnect(format!("GET {url}: {e}")))?
            .json::<VersionInfo>()
            .await
            .map_err(|e| EnvError::ProtocolConnect(format!("GET {url}: {e}")))?;
        let ws_url = rewrite_ws_host(&version.web_socket_debugger_url, host)?;

        debug!(ws_url, target_id = target.id, "attempting websocket connection");

        let config = HandlerConfig {
            request_timeout: self.request_timeout,
            viewport: None,
            ..Default::default()
        };
        let (mut browser, mut handler) = Browser::connect_with_config(&ws_url, config)
            .await
            .map_err(|e| EnvError::ProtocolConnect(format!("connect {ws_url}: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "devtools handler event error");
                }
            }
            debug!("devtools handler exited (connection closed)");
        });

        let page = match attach_page(&mut browser, &target.id).await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e);
            },
        };

        let session = CdpSession::start(browser, page, handler_task).await?;
        Ok(Box::new(session))
    }
}

/// Point a websocket URL reported by Chrome at the host we actually reach it
/// through. Inside a container Chrome reports its internal address.
fn rewrite_ws_host(ws_url: &str, host: &str) -> Result<String> {
    let mut parsed = url::Url::parse(ws_url)
        .map_err(|e| EnvError::ProtocolConnect(format!("invalid websocket URL {ws_url}: {e}")))?;
    let reachable = url::Url::parse(&format!("ws://{host}"))
        .map_err(|e| EnvError::ProtocolConnect(format!("invalid devtools host {host}: {e}")))?;
    parsed
        .set_host(reachable.host_str())
        .map_err(|e| EnvError::ProtocolConnect(format!("invalid devtools host {host}: {e}")))?;
    parsed
        .set_port(reachable.port_or_known_default())
        .map_err(|()| EnvError::ProtocolConnect(format!("invalid devtools port in {host}")))?;
    Ok(parsed.to_string())
}

async fn attach_page(browser: &mut Browser, target_id: &str) -> Result<Page> {
    browser.fetch_targets().await?;
    // Existing targets are attached asynchronously by the handler.
    for _ in 0..20 {
        let pages = browser.pages().await?;
        if let Some(page) = pages
            .into_iter()
            .find(|p| p.target_id().inner() == target_id)
        {
            return Ok(page);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(EnvError::ProtocolConnect(format!(
        "page target {target_id} never attached"
    )))
}

/// A [`ProtocolSession`] on one Chrome page.
pub struct CdpSession {
    page: Page,
    browser: tokio::sync::Mutex<Option<Browser>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl CdpSession {
    async fn start(browser: Browser, page: Page, handler_task: JoinHandle<()>) -> Result<Self> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = vec![handler_task];

        let mut console = page.event_listener::<EventConsoleApiCalled>().await?;
        let console_log = Arc::clone(&log);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let args: Vec<String> = event
                    .args
                    .iter()
                    .map(|arg| match (&arg.value, &arg.description) {
                        (Some(serde_json::Value::String(s)), _) => s.clone(),
                        (Some(v), _) => v.to_string(),
                        (None, Some(d)) => d.clone(),
                        (None, None) => String::new(),
                    })
                    .collect();
                let level = format!("{:?}", event.r#type).to_lowercase();
                push_line(&console_log, format!("console.{level}: {}", args.join(" ")));
            }
        }));

        let mut exceptions = page.event_listener::<EventExceptionThrown>().await?;
        let exception_log = Arc::clone(&log);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let message = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                push_line(&exception_log, format!("exception: {message}"));
            }
        }));

        Ok(Self {
            page,
            browser: tokio::sync::Mutex::new(Some(browser)),
            tasks: Mutex::new(tasks),
            log,
        })
    }
}

fn push_line(log: &Mutex<Vec<String>>, line: String) {
    let mut lines = log.lock().unwrap_or_else(|e| e.into_inner());
    if lines.len() >= MAX_LOG_LINES {
        lines.remove(0);
    }
    lines.push(line);
}

#[async_trait]
impl ProtocolSession for CdpSession {
    async fn navigate(&self, url: &str, mode: NavigateMode) -> Result<()> {
        match mode {
            NavigateMode::Safe => {
                self.page.goto(url).await?;
                self.page.wait_for_navigation().await?;
            },
            NavigateMode::Sync => {
                let resp = self.page.execute(NavigateParams::new(url)).await?;
                if let Some(error) = resp.result.error_text.as_ref() {
                    return Err(EnvError::Cdp(format!("navigate {url}: {error}")));
                }
            },
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(EnvError::Cdp)?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn dispatch_pointer(&self, event: &PointerEvent) -> Result<()> {
        let event_type = match event.event_type {
            PointerEventType::MousePressed => DispatchMouseEventType::MousePressed,
            PointerEventType::MouseReleased => DispatchMouseEventType::MouseReleased,
            PointerEventType::MouseMoved => DispatchMouseEventType::MouseMoved,
        };
        let button = match event.button {
            PointerButton::None => MouseButton::None,
            PointerButton::Left => MouseButton::Left,
            PointerButton::Middle => MouseButton::Middle,
            PointerButton::Right => MouseButton::Right,
        };
        let cmd = DispatchMouseEventParams::builder()
            .r#type(event_type)
            .x(event.x)
            .y(event.y)
            .button(button)
            .click_count(event.click_count)
            .modifiers(event.modifiers)
            .build()
            .map_err(EnvError::Cdp)?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    async fn dispatch_key(&self, event: &KeyEvent) -> Result<()> {
        let event_type = match event.event_type {
            KeyEventType::KeyDown => DispatchKeyEventType::KeyDown,
            KeyEventType::KeyUp => DispatchKeyEventType::KeyUp,
            KeyEventType::RawKeyDown => DispatchKeyEventType::RawKeyDown,
            KeyEventType::Char => DispatchKeyEventType::Char,
        };
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(event_type)
            .code(event.code.clone())
            .key(event.key.clone())
            .modifiers(event.modifiers);
        if let Some(ref text) = event.text {
            builder = builder.text(text.clone());
        }
        if let Some(vk) = event.windows_virtual_key_code {
            builder = builder.windows_virtual_key_code(vk);
        }
        let cmd = builder.build().map_err(EnvError::Cdp)?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    async fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>> {
        let mut params = ScreenshotParams::builder().full_page(false);
        params = match format {
            ImageFormat::Png => params.format(CaptureScreenshotFormat::Png),
            ImageFormat::Jpeg => params.format(CaptureScreenshotFormat::Jpeg),
        };
        if let Some(q) = quality {
            params = params.quality(i64::from(q));
        }
        Ok(self.page.screenshot(params.build()).await?)
    }

    fn console_log(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn close(&self) -> Result<()> {
        // Only the websocket is dropped; an externally supplied Chrome keeps running.
        let browser = self.browser.lock().await.take();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        if browser.is_none() {
            warn!("devtools session closed twice");
        }
        drop(browser);
        Ok(())
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
