//! Thin client for the eWeLink cloud: OAuth code exchange and device-state reads.

mod device;
mod oauth;

pub use device::DeviceApiClient;
pub use oauth::{OAuthClient, TokenGrant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest region code accepted in a URL template.
const MAX_REGION_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream rejected request (error {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("invalid region code '{0}'")]
    InvalidRegion(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("field '{0}' missing from device state")]
    MissingField(String),
}

/// Coarse classification surfaced to HTTP callers and push clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchErrorKind {
    UpstreamRequestFailed,
    UpstreamDataMalformed,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::UpstreamRequestFailed => "UpstreamRequestFailed",
            FetchErrorKind::UpstreamDataMalformed => "UpstreamDataMalformed",
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Request(_)
            | FetchError::Status { .. }
            | FetchError::Rejected { .. }
            | FetchError::InvalidRegion(_) => FetchErrorKind::UpstreamRequestFailed,
            FetchError::Malformed(_) | FetchError::MissingField(_) => {
                FetchErrorKind::UpstreamDataMalformed
            }
        }
    }
}

/// How the target device is located in the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Read one device directly by its vendor id
    Id(String),
    /// List the account's devices and pick the one with this display name
    Name(String),
}

/// Which parameters to copy out of the device state.
#[derive(Debug, Clone, Default)]
pub struct FieldSelection {
    pub fields: Vec<String>,
    /// Subset of `fields` whose absence fails the fetch
    pub required: Vec<String>,
}

impl FieldSelection {
    pub fn new(fields: Vec<String>, required: Vec<String>) -> Self {
        Self { fields, required }
    }

    /// Copy the selected fields; absent optional fields become `null`.
    pub fn select(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, FetchError> {
        let mut selected = Map::new();
        for field in &self.fields {
            let value = params.get(field).cloned().unwrap_or(Value::Null);
            if value.is_null() && self.required.contains(field) {
                return Err(FetchError::MissingField(field.clone()));
            }
            selected.insert(field.clone(), value);
        }
        Ok(selected)
    }
}

/// A successful device read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Vendor device id, or the configured name when the id is unknown
    pub device: String,
    pub fields: Map<String, Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Anything that can produce the current state of a device for a token.
#[async_trait]
pub trait DeviceStateSource: Send + Sync {
    async fn fetch_device_state(
        &self,
        token: &str,
        region: &str,
        filter: &DeviceFilter,
    ) -> Result<DeviceState, FetchError>;
}

/// Substitute `{region}` into a URL template.
///
/// Region codes end up in the host name, so only short ASCII alphanumerics
/// are accepted.
pub fn region_url(template: &str, region: &str) -> Result<String, FetchError> {
    if region.is_empty()
        || region.len() > MAX_REGION_LEN
        || !region.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(FetchError::InvalidRegion(region.to_string()));
    }
    Ok(template
        .replace("{region}", &region.to_ascii_lowercase())
        .trim_end_matches('/')
        .to_string())
}

/// Reject vendor envelopes of the form `{"error": <non-zero>, "msg": ...}`.
fn check_envelope(doc: &Value) -> Result<(), FetchError> {
    match doc.get("error").and_then(Value::as_i64) {
        Some(0) | None => Ok(()),
        Some(code) => Err(FetchError::Rejected {
            code,
            message: doc
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
    }
}

fn parse_body(text: &str) -> Result<Value, FetchError> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| FetchError::Malformed(format!("invalid JSON: {}", e)))?;
    check_envelope(&doc)?;
    Ok(doc)
}

async fn read_body(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let text = response
        .text()
        .await
        .map_err(|e| FetchError::Request(format!("failed to read body: {}", e)))?;
    parse_body(&text)
}
