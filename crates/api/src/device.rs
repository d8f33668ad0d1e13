use crate::{
    read_body, region_url, DeviceFilter, DeviceState, DeviceStateSource, FetchError,
    FieldSelection,
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

const THING_STATUS_PATH: &str = "/v2/device/thing/status";
const THING_LIST_PATH: &str = "/v2/device/thing";

/// Reads device parameters from the vendor REST API.
pub struct DeviceApiClient {
    client: Client,
    /// Base URL template, may contain `{region}`
    api_base: String,
    selection: FieldSelection,
}

impl DeviceApiClient {
    pub fn new(
        api_base: String,
        selection: FieldSelection,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::from_reqwest(client, api_base, selection))
    }

    pub fn from_reqwest(client: Client, api_base: String, selection: FieldSelection) -> Self {
        Self {
            client,
            api_base,
            selection,
        }
    }

    pub fn selection(&self) -> &FieldSelection {
        &self.selection
    }

    async fn get(&self, url: Url, token: &str) -> Result<Value, FetchError> {
        debug!("GET {}", url.path());
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| FetchError::Request(format!("device request failed: {}", e)))?;
        read_body(response).await
    }

    fn url(&self, region: &str, path: &str) -> Result<Url, FetchError> {
        let base = region_url(&self.api_base, region)?;
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| FetchError::Request(format!("invalid API URL '{}': {}", base, e)))
    }

    async fn fetch_by_id(
        &self,
        token: &str,
        region: &str,
        device_id: &str,
    ) -> Result<(String, Map<String, Value>), FetchError> {
        let mut url = self.url(region, THING_STATUS_PATH)?;
        url.query_pairs_mut()
            .append_pair("type", "1")
            .append_pair("id", device_id)
            .append_pair("params", &self.selection.fields.join("|"));

        let doc = self.get(url, token).await?;
        let params = locate_params(&doc)?;
        Ok((device_id.to_string(), params.clone()))
    }

    async fn fetch_by_name(
        &self,
        token: &str,
        region: &str,
        name: &str,
    ) -> Result<(String, Map<String, Value>), FetchError> {
        let url = self.url(region, THING_LIST_PATH)?;
        let doc = self.get(url, token).await?;

        let things = doc
            .pointer("/data/thingList")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Malformed("response has no data.thingList".to_string()))?;

        let item = things
            .iter()
            .filter_map(|thing| thing.get("itemData"))
            .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
            .ok_or_else(|| FetchError::Malformed(format!("device named '{}' not found", name)))?;

        let device = item
            .get("deviceid")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let params = item
            .get("params")
            .and_then(Value::as_object)
            .ok_or_else(|| FetchError::Malformed(format!("device '{}' has no params", name)))?;
        Ok((device, params.clone()))
    }
}

#[async_trait]
impl DeviceStateSource for DeviceApiClient {
    async fn fetch_device_state(
        &self,
        token: &str,
        region: &str,
        filter: &DeviceFilter,
    ) -> Result<DeviceState, FetchError> {
        let (device, params) = match filter {
            DeviceFilter::Id(id) => self.fetch_by_id(token, region, id).await?,
            DeviceFilter::Name(name) => self.fetch_by_name(token, region, name).await?,
        };
        let fields = self.selection.select(&params)?;
        info!("Fetched {} field(s) from device {}", fields.len(), device);

        Ok(DeviceState {
            device,
            fields,
            fetched_at: chrono::Utc::now(),
        })
    }
}

/// Find the parameter object: `data.params`, then `params`, then the root.
fn locate_params(doc: &Value) -> Result<&Map<String, Value>, FetchError> {
    let root = doc
        .as_object()
        .ok_or_else(|| FetchError::Malformed("expected a JSON object".to_string()))?;

    if let Some(data) = root.get("data") {
        return data
            .get("params")
            .and_then(Value::as_object)
            .ok_or_else(|| FetchError::Malformed("response has no data.params".to_string()));
    }
    if let Some(params) = root.get("params") {
        return params
            .as_object()
            .ok_or_else(|| FetchError::Malformed("params is not an object".to_string()));
    }
    Ok(root)
}
