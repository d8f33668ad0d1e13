//! ewerelay Configuration
//!
//! Configuration structures with serde defaults, a loader that layers
//! environment overrides on top of an optional YAML file, and a validator.
//! Everything here is read once at process start and never mutated after.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Constants
// ============================================================================

/// Default listen host
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;
/// Default WebSocket path
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Default session cookie name
pub const DEFAULT_SESSION_COOKIE: &str = "ewerelay_sid";
/// Default front-end origin the OAuth flow returns to
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
/// Default vendor authorization page
pub const DEFAULT_AUTHORIZE_URL: &str = "https://c2ccdn.coolkit.cc/oauth/index.html";
/// Default vendor token endpoint; `{region}` is substituted per request
pub const DEFAULT_TOKEN_URL: &str = "https://{region}-apia.coolkit.cc/v2/user/oauth/token";
/// Default vendor REST base; `{region}` is substituted per request
pub const DEFAULT_API_BASE: &str = "https://{region}-apia.coolkit.cc";
/// Default region code
pub const DEFAULT_REGION: &str = "us";
/// Default polling interval (seconds); 0 disables the poller
pub const DEFAULT_POLL_INTERVAL: u64 = 60;
/// Default upstream request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

/// Longest region code accepted; region codes are short host-name labels
pub const MAX_REGION_LEN: usize = 8;
/// Paths served by fixed routes; the push channel cannot share one
pub const RESERVED_PATHS: &[&str] = &[
    "/login",
    "/callback",
    "/logout",
    "/api/status",
    "/api/get-data",
    "/api/data",
    "/health",
];

const ENV_PREFIX: &str = "EWE_";

// ============================================================================
// Helper functions for paths (required for serde defaults)
// ============================================================================

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_ewerelay_dir() -> PathBuf {
    home_dir().join(".ewerelay")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Vendor OAuth client configuration
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Device selection and field extraction
    #[serde(default)]
    pub device: DeviceConfig,
    /// Background polling
    #[serde(default)]
    pub poll: PollConfig,
}

// ============================================================================
// Server Config
// ============================================================================

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// Path the push channel is served on
    #[serde(default = "ServerConfig::default_ws_path")]
    pub ws_path: String,
    /// Where `/callback` and `/logout` redirect the browser
    #[serde(default = "ServerConfig::default_frontend_url")]
    pub frontend_url: String,
    /// Name of the session cookie
    #[serde(default = "ServerConfig::default_session_cookie")]
    pub session_cookie: String,
    /// Mark the session cookie `Secure` (requires HTTPS in front)
    #[serde(default)]
    pub cookie_secure: bool,
}

impl ServerConfig {
    fn default_host() -> String {
        DEFAULT_HOST.to_string()
    }
    fn default_port() -> u16 {
        DEFAULT_PORT
    }
    fn default_ws_path() -> String {
        DEFAULT_WS_PATH.to_string()
    }
    fn default_frontend_url() -> String {
        DEFAULT_FRONTEND_URL.to_string()
    }
    fn default_session_cookie() -> String {
        DEFAULT_SESSION_COOKIE.to_string()
    }

    /// `host:port` string suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            cookie_secure: false,
        }
    }
}

// ============================================================================
// OAuth Config
// ============================================================================

/// Vendor OAuth application credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    /// Client secret (optional in the file, usually supplied via `EWE_CLIENT_SECRET`)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Redirect URI registered with the vendor; must point at `/callback`
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "OAuthConfig::default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "OAuthConfig::default_token_url")]
    pub token_url: String,
    /// Region used when neither the callback nor the token response names one
    #[serde(default = "OAuthConfig::default_region")]
    pub default_region: String,
}

impl OAuthConfig {
    fn default_authorize_url() -> String {
        DEFAULT_AUTHORIZE_URL.to_string()
    }
    fn default_token_url() -> String {
        DEFAULT_TOKEN_URL.to_string()
    }
    fn default_region() -> String {
        DEFAULT_REGION.to_string()
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: String::new(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            default_region: DEFAULT_REGION.to_string(),
        }
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Which device to read and which fields to extract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "DeviceConfig::default_api_base")]
    pub api_base: String,
    /// Vendor device id; takes precedence over `device_name`
    #[serde(default)]
    pub device_id: Option<String>,
    /// Device display name, looked up in the account's thing list
    #[serde(default)]
    pub device_name: Option<String>,
    /// Parameter names copied into each pushed payload
    #[serde(default = "DeviceConfig::default_fields")]
    pub fields: Vec<String>,
    /// Parameters whose absence fails the whole fetch
    #[serde(default = "DeviceConfig::default_required_fields")]
    pub required_fields: Vec<String>,
    #[serde(default = "DeviceConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl DeviceConfig {
    fn default_api_base() -> String {
        DEFAULT_API_BASE.to_string()
    }
    fn default_fields() -> Vec<String> {
        vec![
            "currentTemperature".to_string(),
            "currentHumidity".to_string(),
            "switch".to_string(),
        ]
    }
    fn default_required_fields() -> Vec<String> {
        vec![
            "currentTemperature".to_string(),
            "currentHumidity".to_string(),
        ]
    }
    fn default_request_timeout() -> u64 {
        DEFAULT_REQUEST_TIMEOUT
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            device_id: None,
            device_name: None,
            fields: Self::default_fields(),
            required_fields: Self::default_required_fields(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ============================================================================
// Poll Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between background fetches; 0 disables polling
    #[serde(default = "PollConfig::default_interval")]
    pub interval_secs: u64,
}

impl PollConfig {
    fn default_interval() -> u64 {
        DEFAULT_POLL_INTERVAL
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the file (if any), then apply `EWE_*` environment overrides.
    ///
    /// An explicit path that does not exist is an error; when no path is
    /// given and none of the default locations exist, defaults are used.
    pub fn load(path: Option<&str>) -> Result<Config, RelayError> {
        let mut config = match Self::resolve_config_path(path)? {
            Some(config_path) => Self::load_file(&config_path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a single YAML file
    pub fn load_file(path: &PathBuf) -> Result<Config, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|source| RelayError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = serde_yml::from_str(&content).map_err(|source| RelayError::Yaml {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn resolve_config_path(path: Option<&str>) -> Result<Option<PathBuf>, RelayError> {
        if let Some(p) = path {
            let p = PathBuf::from(p);
            if !p.exists() {
                return Err(RelayError::ConfigNotFound(p));
            }
            return Ok(Some(p));
        }

        let default_paths = [
            default_ewerelay_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ewerelay.yaml"),
            PathBuf::from("./ewerelay.yaml"),
        ];

        Ok(default_paths.into_iter().find(|p| p.exists()))
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), RelayError> {
        if config.oauth.client_id.trim().is_empty() {
            return Err(RelayError::config_invalid(
                "oauth.client_id",
                "Client id cannot be empty",
            ));
        }
        if config.oauth.redirect_uri.trim().is_empty() {
            return Err(RelayError::config_invalid(
                "oauth.redirect_uri",
                "Redirect URI cannot be empty",
            ));
        }

        for (field, value) in [
            ("oauth.authorize_url", &config.oauth.authorize_url),
            ("oauth.token_url", &config.oauth.token_url),
            ("device.api_base", &config.device.api_base),
            ("server.frontend_url", &config.server.frontend_url),
        ] {
            if !is_http_url(value) {
                return Err(RelayError::config_invalid(
                    field,
                    format!("'{}' is not an http(s) URL", value),
                ));
            }
        }

        if !is_valid_region(&config.oauth.default_region) {
            return Err(RelayError::config_invalid(
                "oauth.default_region",
                format!(
                    "'{}' is not a region code (1-{} ASCII letters or digits)",
                    config.oauth.default_region, MAX_REGION_LEN
                ),
            ));
        }

        if !config.server.ws_path.starts_with('/') {
            return Err(RelayError::config_invalid(
                "server.ws_path",
                "WebSocket path must start with '/'",
            ));
        }
        if RESERVED_PATHS.contains(&config.server.ws_path.as_str()) {
            return Err(RelayError::config_invalid(
                "server.ws_path",
                format!("'{}' is already served by another route", config.server.ws_path),
            ));
        }

        if config.device.device_id.is_none() && config.device.device_name.is_none() {
            return Err(RelayError::config_invalid(
                "device",
                "Either device_id or device_name must be set",
            ));
        }

        if config.device.fields.is_empty() {
            return Err(RelayError::config_invalid(
                "device.fields",
                "At least one field must be requested",
            ));
        }

        if let Some(missing) = config
            .device
            .required_fields
            .iter()
            .find(|f| !config.device.fields.contains(f))
        {
            return Err(RelayError::config_invalid(
                "device.required_fields",
                format!("'{}' is required but not listed in device.fields", missing),
            ));
        }

        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Region codes are substituted into vendor host names, so only short
/// alphanumeric labels are accepted.
pub fn is_valid_region(region: &str) -> bool {
    !region.is_empty()
        && region.len() <= MAX_REGION_LEN
        && region.chars().all(|c| c.is_ascii_alphanumeric())
}

impl Config {
    /// Load configuration (file + environment)
    pub fn load(path: &Option<String>) -> Result<Self, RelayError> {
        ConfigLoader::load(path.as_deref())
    }

    /// Apply `EWE_*` overrides using the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(v) = var("CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = var("CLIENT_SECRET") {
            self.oauth.client_secret = Some(v);
        }
        if let Some(v) = var("REDIRECT_URI") {
            self.oauth.redirect_uri = v;
        }
        if let Some(v) = var("AUTHORIZE_URL") {
            self.oauth.authorize_url = v;
        }
        if let Some(v) = var("TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = var("REGION") {
            self.oauth.default_region = v;
        }
        if let Some(v) = var("FRONTEND_URL") {
            self.server.frontend_url = v;
        }
        if let Some(v) = var("API_BASE") {
            self.device.api_base = v;
        }
        if let Some(v) = var("DEVICE_ID") {
            self.device.device_id = Some(v);
        }
        if let Some(v) = var("DEVICE_NAME") {
            self.device.device_name = Some(v);
        }
        if let Some(v) = var("POLL_INTERVAL") {
            self.poll.interval_secs = v.trim().parse().map_err(|_| {
                RelayError::env_override(
                    format!("{}POLL_INTERVAL", ENV_PREFIX),
                    format!("'{}' is not a number of seconds", v),
                )
            })?;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> Result<(), RelayError> {
        let content = serde_yml::to_string(self).map_err(|source| RelayError::Yaml {
            path: path.clone(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| RelayError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            server: ServerConfig::default(),
            oauth: OAuthConfig {
                client_id: "your-ewelink-app-id".to_string(),
                client_secret: None,
                redirect_uri: format!("http://{}:{}/callback", DEFAULT_HOST, DEFAULT_PORT),
                ..OAuthConfig::default()
            },
            device: DeviceConfig {
                device_name: Some("Living Room THR316".to_string()),
                ..DeviceConfig::default()
            },
            poll: PollConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.poll.interval_secs, 60);
        assert_eq!(config.device.fields.len(), 3);
        assert_eq!(config.oauth.default_region, "us");
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::sample();
        config
            .apply_env_overrides(lookup(&[
                ("EWE_CLIENT_ID", "app-123"),
                ("EWE_REGION", "as"),
                ("EWE_POLL_INTERVAL", "15"),
                ("EWE_DEVICE_ID", "1000abcd"),
            ]))
            .unwrap();

        assert_eq!(config.oauth.client_id, "app-123");
        assert_eq!(config.oauth.default_region, "as");
        assert_eq!(config.poll.interval_secs, 15);
        assert_eq!(config.device.device_id.as_deref(), Some("1000abcd"));
    }

    #[test]
    fn test_env_override_rejects_bad_interval() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(lookup(&[("EWE_POLL_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("EWE_POLL_INTERVAL"));
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(ConfigValidator::validate(&Config::sample()).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_client_id() {
        let mut config = Config::sample();
        config.oauth.client_id = "  ".to_string();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("oauth.client_id"));
    }

    #[test]
    fn test_validate_rejects_non_http_token_url() {
        let mut config = Config::sample();
        config.oauth.token_url = "ftp://example.com/token".to_string();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("oauth.token_url"));
    }

    #[test]
    fn test_validate_requires_device_selector() {
        let mut config = Config::sample();
        config.device.device_name = None;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_validate_required_fields_subset() {
        let mut config = Config::sample();
        config.device.required_fields = vec!["voltage".to_string()];
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("voltage"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ewerelay.yaml");
        Config::sample().save(&path).unwrap();

        let loaded = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(loaded.oauth.client_id, "your-ewelink-app-id");
        assert_eq!(
            loaded.device.device_name.as_deref(),
            Some("Living Room THR316")
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ewerelay.yaml");
        std::fs::write(&path, "oauth:\n  client_id: abc\npoll:\n  interval_secs: 5\n").unwrap();

        let loaded = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(loaded.oauth.client_id, "abc");
        assert_eq!(loaded.poll.interval_secs, 5);
        assert_eq!(loaded.server.port, DEFAULT_PORT);
        assert_eq!(loaded.oauth.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let err = ConfigLoader::load(Some("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().starts_with("Config not found"));
    }

    #[test]
    fn test_malformed_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "oauth: [not, a, map").unwrap();

        let err = ConfigLoader::load_file(&path).unwrap_err();
        assert!(matches!(err, RelayError::Yaml { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_validate_rejects_bad_region_override() {
        let mut config = Config::sample();
        config
            .apply_env_overrides(lookup(&[("EWE_REGION", "us-east")]))
            .unwrap();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(err.field(), Some("oauth.default_region"));

        config.oauth.default_region = "eu".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_region_codes() {
        assert!(is_valid_region("us"));
        assert!(is_valid_region("cn"));
        assert!(!is_valid_region(""));
        assert!(!is_valid_region("us.evil"));
        assert!(!is_valid_region("abcdefghi"));
    }

    #[test]
    fn test_validate_rejects_ws_path_on_fixed_route() {
        let mut config = Config::sample();
        for path in ["/login", "/health", "/api/data"] {
            config.server.ws_path = path.to_string();
            let err = ConfigValidator::validate(&config).unwrap_err();
            assert_eq!(err.field(), Some("server.ws_path"), "{}", path);
        }

        config.server.ws_path = "/push".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
