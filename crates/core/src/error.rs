//! Startup errors: everything that can go wrong before the relay serves.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Config invalid [{field}]: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("Environment override {var} rejected: {reason}")]
    EnvOverride { var: String, reason: String },
}

impl RelayError {
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn env_override(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Field path for validation failures, e.g. `oauth.client_id`.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ConfigInvalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_field() {
        let err = RelayError::config_invalid("oauth.client_id", "cannot be empty");
        assert_eq!(
            err.to_string(),
            "Config invalid [oauth.client_id]: cannot be empty"
        );
        assert_eq!(err.field(), Some("oauth.client_id"));
    }

    #[test]
    fn test_io_error_keeps_source_and_path() {
        let err = RelayError::Io {
            path: PathBuf::from("/etc/ewerelay.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/etc/ewerelay.yaml"));
        assert!(err.source().is_some());
        assert_eq!(err.field(), None);
    }
}
