//! Server-sent event parsing for the database streaming API.
//!
//! The stream looks like:
//!
//! ```text
//! event: put
//! data: {"path":"/","data":"FOOD"}
//!
//! event: keep-alive
//! data: null
//!
//! ```
//!
//! [`SseParser`] turns arbitrary byte chunks into [`SseEvent`]s and
//! [`StreamEvent::from_sse`] interprets those as database events.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{RemoteError, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental line-oriented parser.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; bytes are
/// buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry are not used by the database stream
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

/// A database streaming event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `data` replaces the value at `path` (relative to the subscribed location).
    Put { path: String, data: Value },
    /// Children of `path` are updated with the members of `data`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server will close the stream; the reason is attached.
    Cancel(String),
    /// The credential expired; the stream will be closed.
    AuthRevoked(String),
    /// Event name we do not handle.
    Unknown(String),
}

impl StreamEvent {
    /// Interpret a raw event.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Decode` when a `put`/`patch` body is not the
    /// expected `{"path": ..., "data": ...}` object.
    pub fn from_sse(event: &SseEvent) -> Result<Self> {
        Ok(match event.event.as_str() {
            "put" => {
                let body: PathData = serde_json::from_str(&event.data)?;
                StreamEvent::Put {
                    path: body.path,
                    data: body.data,
                }
            }
            "patch" => {
                let body: PathData = serde_json::from_str(&event.data)?;
                StreamEvent::Patch {
                    path: body.path,
                    data: body.data,
                }
            }
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel(reason(&event.data)),
            "auth_revoked" => StreamEvent::AuthRevoked(reason(&event.data)),
            other => StreamEvent::Unknown(other.to_string()),
        })
    }

    /// The error that ends the stream, if this event ends it.
    pub fn terminal_error(&self) -> Option<RemoteError> {
        match self {
            StreamEvent::Cancel(reason) => Some(RemoteError::Cancelled(reason.clone())),
            StreamEvent::AuthRevoked(reason) => Some(RemoteError::AuthRevoked(reason.clone())),
            _ => None,
        }
    }
}

// cancel/auth_revoked carry a JSON string, or null
fn reason(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) => "no reason given".to_string(),
        _ if data.trim().is_empty() => "no reason given".to_string(),
        _ => data.to_string(),
    }
}
