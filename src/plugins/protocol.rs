//! Wire protocol for plugin IPC.
//!
//! Each direction is a sequence of newline-terminated JSON documents.
//! Requests carry a positive id and expect a response with the matching id;
//! notifications carry id 0 (or none) and expect no reply. The method
//! `stream` is reserved for streaming notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved notification method for streaming events.
pub const STREAM_METHOD: &str = "stream";

/// A call expecting a response with the matching id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Reply to a request: exactly one of `result` or `error` is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// Structured error a plugin attaches to a failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A one-way message; id 0 or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An incoming line, classified by its id.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
}

/// Parses one incoming line. Returns `None` for malformed input; the
/// reader skips such lines.
pub fn classify_line(line: &str) -> Option<Incoming> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
    if id > 0 {
        serde_json::from_value(value).ok().map(Incoming::Response)
    } else {
        serde_json::from_value(value).ok().map(Incoming::Notification)
    }
}
