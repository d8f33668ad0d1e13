use crate::{read_body, region_url, FetchError};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::info;

/// Result of a successful authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Region the vendor assigned to the account, if it said
    pub region: Option<String>,
}

/// Vendor OAuth endpoints for one registered application.
pub struct OAuthClient {
    client: Client,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    authorize_url: String,
    /// Token endpoint template, may contain `{region}`
    token_url: String,
}

impl OAuthClient {
    pub fn new(
        client_id: String,
        client_secret: Option<String>,
        redirect_uri: String,
        authorize_url: String,
        token_url: String,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .http1_only()
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            client_id,
            client_secret,
            redirect_uri,
            authorize_url,
            token_url,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the URL the browser is sent to; `state` is echoed back on callback.
    pub fn authorization_url(&self, state: &str) -> Result<String, FetchError> {
        let mut url = Url::parse(&self.authorize_url).map_err(|e| {
            FetchError::Request(format!(
                "invalid authorize URL '{}': {}",
                self.authorize_url, e
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str, region: &str) -> Result<TokenGrant, FetchError> {
        let url = region_url(&self.token_url, region)?;
        let body = json!({
            "code": code,
            "redirectUrl": self.redirect_uri,
            "grantType": "authorization_code",
            "clientId": self.client_id,
            "clientSecret": self.client_secret.as_deref().unwrap_or_default(),
        });

        info!("Exchanging authorization code (region {})", region);
        let response = self
            .client
            .post(&url)
            .header("X-CK-Appid", &self.client_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Request(format!("token exchange failed: {}", e)))?;

        let doc = read_body(response).await?;
        parse_grant(&doc)
    }
}

/// Accept both `{"accessToken": ..}` and the `{"data": {"accessToken": ..}}` envelope.
fn parse_grant(doc: &Value) -> Result<TokenGrant, FetchError> {
    let payload = match doc.get("data") {
        Some(data) if data.is_object() => data,
        _ => doc,
    };
    let string_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let access_token = string_field(&["accessToken", "access_token"])
        .ok_or_else(|| FetchError::Malformed("missing accessToken in token response".into()))?;

    Ok(TokenGrant {
        access_token,
        refresh_token: string_field(&["refreshToken", "refresh_token"]),
        region: string_field(&["region"]),
    })
}
