pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    Config, ConfigLoader, ConfigValidator, DeviceConfig, OAuthConfig, PollConfig, ServerConfig,
};
pub use error::RelayError;
