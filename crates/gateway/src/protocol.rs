// Push Channel Protocol
//
// Frames the server writes to a client's WebSocket. The channel is one-way:
// anything the client sends is read only to detect disconnects.
//
// Protocol flow:
// 1. Client opens the push channel with its session cookie
// 2. Server answers with "hello"
// 3. Server pushes "deviceState" or "error" after every fetch for that session

use chrono::{DateTime, Utc};
use ewerelay_api::{DeviceState, FetchError, FetchErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const PROTOCOL_VERSION: u32 = 1;

/// Push frame - top-level message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushFrame {
    Hello(HelloPayload),
    DeviceState(DeviceStatePayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub protocol: u32,
    /// 0 when the server does not poll in the background
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatePayload {
    pub device: String,
    pub data: Map<String, JsonValue>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: FetchErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl PushFrame {
    pub fn hello(poll_interval_secs: u64) -> Self {
        PushFrame::Hello(HelloPayload {
            protocol: PROTOCOL_VERSION,
            poll_interval_secs,
        })
    }

    pub fn from_result(result: &Result<DeviceState, FetchError>) -> Self {
        match result {
            Ok(state) => PushFrame::DeviceState(DeviceStatePayload {
                device: state.device.clone(),
                data: state.fields.clone(),
                fetched_at: state.fetched_at,
            }),
            Err(err) => PushFrame::Error(ErrorPayload {
                kind: err.kind(),
                message: err.to_string(),
                at: Utc::now(),
            }),
        }
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            PushFrame::Hello(_) => "hello",
            PushFrame::DeviceState(_) => "deviceState",
            PushFrame::Error(_) => "error",
        }
    }
}
