//! Wire types for the editor's script-control protocol.
//!
//! Every message is one JSON object per line, discriminated by a `type`
//! field. Both enums are closed: a line whose `type` is not listed here is
//! rejected at decode time instead of surfacing later as a missing field.

use crate::errors::ProbeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const PROTOCOL_VERSION: u32 = 1;

pub const KEY_DOWN: &str = "Down";
pub const KEY_END: &str = "End";
pub const KEY_ENTER: &str = "Enter";
pub const KEY_ESCAPE: &str = "Escape";
pub const KEY_SPACE: &str = "space";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    ScreenContains { text: String },
}

impl Condition {
    pub fn screen_contains(text: impl Into<String>) -> Self {
        Self::ScreenContains { text: text.into() }
    }

    pub fn is_met(&self, screen: &str) -> bool {
        match self {
            Self::ScreenContains { text } => screen.contains(text.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Render,
    #[serde(rename = "key")]
    KeyPress {
        code: String,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        modifiers: BTreeSet<Modifier>,
    },
    TypeText {
        text: String,
    },
    WaitFor {
        condition: Condition,
        timeout_ms: u64,
        poll_interval_ms: u64,
    },
    GetBuffer,
    GetKeybindings,
    ExportTest {
        test_name: String,
    },
    Quit,
}

impl Command {
    pub fn key(code: &str) -> Self {
        Self::KeyPress {
            code: code.to_string(),
            modifiers: BTreeSet::new(),
        }
    }

    pub fn key_with(code: &str, modifiers: &[Modifier]) -> Self {
        Self::KeyPress {
            code: code.to_string(),
            modifiers: modifiers.iter().copied().collect(),
        }
    }

    pub fn type_text(text: impl Into<String>) -> Self {
        Self::TypeText { text: text.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::KeyPress { .. } => "key",
            Self::TypeText { .. } => "type_text",
            Self::WaitFor { .. } => "wait_for",
            Self::GetBuffer => "get_buffer",
            Self::GetKeybindings => "get_keybindings",
            Self::ExportTest { .. } => "export_test",
            Self::Quit => "quit",
        }
    }

    /// Whether `response` is a shape the target may legitimately answer
    /// this command with. `Error` is always acceptable.
    pub fn accepts(&self, response: &Response) -> bool {
        if matches!(response, Response::Error { .. }) {
            return true;
        }
        matches!(
            (self, response),
            (Self::Render, Response::Screen { .. })
                | (Self::KeyPress { .. }, Response::Ok { .. })
                | (Self::TypeText { .. }, Response::Ok { .. })
                | (Self::WaitFor { .. }, Response::Ok { .. })
                | (Self::GetBuffer, Response::Buffer { .. })
                | (Self::GetKeybindings, Response::Keybindings { .. })
                | (Self::ExportTest { .. }, Response::TestCode { .. })
                | (Self::Quit, Response::Ok { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub key: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default)]
        message: String,
    },
    Screen {
        width: u16,
        height: u16,
        content: String,
    },
    Keybindings {
        bindings: Vec<Binding>,
    },
    TestCode {
        code: String,
        length: usize,
    },
    Buffer {
        content: String,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Screen { .. } => "screen",
            Self::Keybindings { .. } => "keybindings",
            Self::TestCode { .. } => "test_code",
            Self::Buffer { .. } => "buffer",
            Self::Error { .. } => "error",
        }
    }

    pub fn screen_content(&self) -> Option<&str> {
        match self {
            Self::Screen { content, .. } => Some(content),
            _ => None,
        }
    }
}

pub fn encode_command(command: &Command) -> Result<String, ProbeError> {
    serde_json::to_string(command)
        .map_err(|e| ProbeError::Protocol(format!("cannot encode {}: {e}", command.name())))
}

pub fn decode_response(line: &str) -> Result<Response, ProbeError> {
    serde_json::from_str::<Response>(line.trim()).map_err(|err| {
        ProbeError::Protocol(format!(
            "undecodable response: {err}; input={}",
            line.chars().take(256).collect::<String>(),
        ))
    })
}
