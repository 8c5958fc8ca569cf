//! Environment specifications and spec catalogs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, Result};

/// Describes one playable environment.
///
/// A running environment keeps its own clone, so mutating the caller's copy
/// has no effect on an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvSpec {
    /// Logical name of the environment.
    pub name: String,

    /// Base game whose assets this environment shares, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_of: Option<String>,

    /// Target observation width in pixels.
    pub width: u32,

    /// Target observation height in pixels.
    pub height: u32,

    /// JSON-encoded options handed verbatim to the in-page adapter.
    #[serde(default = "default_options")]
    pub options: String,

    /// Capture the first canvas element instead of the whole frame.
    #[serde(default)]
    pub all_canvas: bool,

    /// Key codes (e.g. `ArrowLeft`) the agent is allowed to send.
    #[serde(default)]
    pub key_whitelist: Vec<String>,
}

fn default_options() -> String {
    "{}".to_string()
}

impl EnvSpec {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            variant_of: None,
            width,
            height,
            options: default_options(),
            all_canvas: false,
            key_whitelist: Vec::new(),
        }
    }

    /// Name of the game whose assets are served for this environment.
    pub fn base_name(&self) -> &str {
        self.variant_of.as_deref().unwrap_or(&self.name)
    }

    pub fn allows_key(&self, code: &str) -> bool {
        self.key_whitelist.iter().any(|c| c == code)
    }

    #[must_use]
    pub fn with_variant_of(mut self, base: impl Into<String>) -> Self {
        self.variant_of = Some(base.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    #[must_use]
    pub fn with_all_canvas(mut self, all_canvas: bool) -> Self {
        self.all_canvas = all_canvas;
        self
    }

    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_whitelist = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// A set of specs loaded from a JSON array.
#[derive(Debug, Clone, Default)]
pub struct SpecCatalog {
    specs: Vec<EnvSpec>,
}

impl SpecCatalog {
    pub fn from_json(raw: &str) -> Result<Self> {
        let specs: Vec<EnvSpec> = serde_json::from_str(raw)
            .map_err(|e| EnvError::Configuration(format!("invalid spec catalog: {e}")))?;
        Ok(Self { specs })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EnvError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Find a spec by its environment name.
    pub fn find(&self, name: &str) -> Option<&EnvSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
