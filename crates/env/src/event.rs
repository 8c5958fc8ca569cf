//! Input events sent to an environment during a step.
//!
//! Events mirror the CDP `Input.dispatch*Event` parameters. Pointer and
//! keyboard events are driven; touch is recognised so it can be rejected
//! explicitly instead of silently ignored.

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, Result};

/// Mouse event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerEventType {
    MousePressed,
    MouseReleased,
    MouseMoved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerButton {
    #[default]
    None,
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerEvent {
    #[serde(rename = "type")]
    pub event_type: PointerEventType,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub button: PointerButton,
    #[serde(default)]
    pub click_count: i64,
    #[serde(default)]
    pub modifiers: i64,
}

impl PointerEvent {
    pub fn moved(x: f64, y: f64) -> Self {
        Self {
            event_type: PointerEventType::MouseMoved,
            x,
            y,
            button: PointerButton::None,
            click_count: 0,
            modifiers: 0,
        }
    }

    /// Left-button press at `(x, y)`.
    pub fn pressed(x: f64, y: f64) -> Self {
        Self {
            event_type: PointerEventType::MousePressed,
            button: PointerButton::Left,
            click_count: 1,
            ..Self::moved(x, y)
        }
    }

    pub fn released(x: f64, y: f64) -> Self {
        Self {
            event_type: PointerEventType::MouseReleased,
            button: PointerButton::Left,
            click_count: 1,
            ..Self::moved(x, y)
        }
    }
}

/// Key event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
    RawKeyDown,
    Char,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    #[serde(rename = "type")]
    pub event_type: KeyEventType,
    /// Physical key code, checked against the spec's whitelist.
    pub code: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub windows_virtual_key_code: Option<i64>,
    #[serde(default)]
    pub modifiers: i64,
}

impl KeyEvent {
    pub fn down(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            event_type: KeyEventType::KeyDown,
            key: key_for_code(&code),
            windows_virtual_key_code: virtual_key_code(&code),
            code,
            text: None,
            modifiers: 0,
        }
    }

    pub fn up(code: impl Into<String>) -> Self {
        Self {
            event_type: KeyEventType::KeyUp,
            ..Self::down(code)
        }
    }
}

/// A touch event. Environments do not drive touch input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub points: Vec<(f64, f64)>,
}

/// Any input an agent may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    Pointer(PointerEvent),
    Key(KeyEvent),
    Touch(TouchEvent),
}

impl InputEvent {
    /// Parse an event from JSON. Unknown kinds are rejected as unsupported.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| EnvError::UnsupportedEvent(format!("malformed event: {e}")))?;
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or("<missing>")
            .to_string();
        serde_json::from_value(value).map_err(|e| match kind.as_str() {
            "pointer" | "key" | "touch" => {
                EnvError::UnsupportedEvent(format!("malformed {kind} event: {e}"))
            },
            _ => EnvError::UnsupportedEvent(kind),
        })
    }

    /// Short name of the event kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pointer(_) => "pointer",
            Self::Key(_) => "key",
            Self::Touch(_) => "touch",
        }
    }
}

impl From<PointerEvent> for InputEvent {
    fn from(event: PointerEvent) -> Self {
        Self::Pointer(event)
    }
}

impl From<KeyEvent> for InputEvent {
    fn from(event: KeyEvent) -> Self {
        Self::Key(event)
    }
}

/// DOM `key` value for the common game control codes.
fn key_for_code(code: &str) -> String {
    match code {
        "Space" => " ".to_string(),
        "Enter" | "Escape" | "Tab" | "Backspace" | "ShiftLeft" | "ShiftRight" => {
            code.trim_end_matches("Left")
                .trim_end_matches("Right")
                .to_string()
        },
        c if c.starts_with("Arrow") => c.to_string(),
        c if c.starts_with("Key") && c.len() == 4 => c[3..].to_lowercase(),
        c if c.starts_with("Digit") && c.len() == 6 => c[5..].to_string(),
        c => c.to_string(),
    }
}

fn virtual_key_code(code: &str) -> Option<i64> {
    let vk = match code {
        "Backspace" => 8,
        "Tab" => 9,
        "Enter" => 13,
        "ShiftLeft" | "ShiftRight" => 16,
        "Escape" => 27,
        "Space" => 32,
        "ArrowLeft" => 37,
        "ArrowUp" => 38,
        "ArrowRight" => 39,
        "ArrowDown" => 40,
        c if c.starts_with("Key") && c.len() == 4 => i64::from(c.as_bytes()[3]),
        c if c.starts_with("Digit") && c.len() == 6 => i64::from(c.as_bytes()[5]),
        _ => return None,
    };
    Some(vk)
}
