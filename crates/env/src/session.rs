//! Control-channel abstractions.
//!
//! The environment talks to the page only through [`ProtocolSession`], and
//! discovers pages only through [`SessionConnector`]. The CDP-backed
//! implementations live in [`crate::cdp`].

use {async_trait::async_trait, serde::Deserialize};

use crate::{
    error::Result,
    event::{KeyEvent, PointerEvent},
};

/// How long a navigation waits before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateMode {
    /// Wait for the page to finish loading.
    Safe,
    /// Return once the navigation has committed.
    Sync,
}

/// Screenshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// An open control channel to one page.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    async fn navigate(&self, url: &str, mode: NavigateMode) -> Result<()>;

    /// Evaluate `script`, awaiting a returned promise, and return its value
    /// (`Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn dispatch_pointer(&self, event: &PointerEvent) -> Result<()>;

    async fn dispatch_key(&self, event: &KeyEvent) -> Result<()>;

    /// Capture the whole frame. `quality` only applies to JPEG.
    async fn screenshot(&self, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>>;

    /// Copy of the console lines buffered so far.
    fn console_log(&self) -> Vec<String>;

    async fn close(&self) -> Result<()>;
}

/// One entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: String,
}

impl TargetInfo {
    /// Whether this target is an interactive page we can attach to.
    pub fn is_attachable_page(&self) -> bool {
        self.target_type == "page" && !self.web_socket_debugger_url.is_empty()
    }
}

/// Discovers and opens control sessions on a DevTools host.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// List the control endpoints exposed by `host` (`host:port`).
    async fn list_targets(&self, host: &str) -> Result<Vec<TargetInfo>>;

    /// Open a session on `target`, reached through `host`.
    async fn connect(&self, host: &str, target: &TargetInfo) -> Result<Box<dyn ProtocolSession>>;
}
