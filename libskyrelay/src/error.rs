//! Error types for Skyrelay

use thiserror::Error;

use crate::types::ActionKind;

pub type Result<T> = std::result::Result<T, SkyrelayError>;

/// Result of a single call against the remote social service
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum SkyrelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Progress store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Feed or list retrieval failed. Nothing has been written yet, so the
    /// run can simply be retried on the next schedule.
    #[error("Source fetch failed ({operation}): {source}")]
    SourceFetch {
        operation: String,
        #[source]
        source: PlatformError,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SkyrelayError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SkyrelayError::InvalidInput(_) => 3,
            SkyrelayError::Config(_) => 3,
            SkyrelayError::Platform(PlatformError::Authentication(_)) => 2,
            SkyrelayError::SourceFetch {
                source: PlatformError::Authentication(_),
                ..
            } => 2,
            SkyrelayError::Platform(_) => 1,
            SkyrelayError::SourceFetch { .. } => 1,
            SkyrelayError::Store(_) => 1,
        }
    }

    pub(crate) fn source_fetch(operation: impl Into<String>, source: PlatformError) -> Self {
        SkyrelayError::SourceFetch {
            operation: operation.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file exists but cannot be interpreted
    #[error("Store file is corrupt at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    /// Another run holds the store lock
    #[error("Store is locked by another run: {0}")]
    Locked(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The service rejected the request as malformed
    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl PlatformError {
    /// Network failures and rate limiting may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_) | PlatformError::RateLimit(_))
    }
}

/// A failed write against a single planned item.
///
/// Never propagates past the executor; it is stored on the item's
/// [`ActionRecord`](crate::types::ActionRecord) and counted in the summary.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{action} failed: {error}")]
pub struct ActionError {
    pub action: ActionKind,
    pub error: PlatformError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SkyrelayError::InvalidInput("bad flag".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = SkyrelayError::Config(ConfigError::MissingField("source.uri".to_string()));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = SkyrelayError::Platform(PlatformError::Authentication("bad password".into()));
        assert_eq!(error.exit_code(), 2);

        let fetch = SkyrelayError::source_fetch(
            "getFeed",
            PlatformError::Authentication("expired".into()),
        );
        assert_eq!(fetch.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_source_fetch_failure() {
        let error = SkyrelayError::source_fetch("getFeed", PlatformError::Network("timeout".into()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_store_error() {
        let error = SkyrelayError::Store(StoreError::Locked("/tmp/reposted.txt".into()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_source_fetch_formatting() {
        let error = SkyrelayError::source_fetch(
            "getFeed",
            PlatformError::RateLimit("slow down".to_string()),
        );
        assert_eq!(
            error.to_string(),
            "Source fetch failed (getFeed): Rate limit exceeded: slow down"
        );
    }

    #[test]
    fn test_config_error_formatting() {
        let error = SkyrelayError::Config(ConfigError::invalid("plan.global_cap", "must be > 0"));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid value for plan.global_cap: must be > 0"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("reset".into()).is_transient());
        assert!(PlatformError::RateLimit("429".into()).is_transient());
        assert!(!PlatformError::Validation("bad cid".into()).is_transient());
        assert!(!PlatformError::Authentication("401".into()).is_transient());
        assert!(!PlatformError::Request("500".into()).is_transient());
    }

    #[test]
    fn test_action_error_formatting() {
        let error = ActionError {
            action: ActionKind::Repost,
            error: PlatformError::Validation("InvalidRequest".into()),
        };
        assert_eq!(
            error.to_string(),
            "repost failed: Request validation failed: InvalidRequest"
        );
    }

    #[test]
    fn test_error_conversion_from_store_error() {
        let store_error = StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        let error: SkyrelayError = store_error.into();
        assert!(matches!(error, SkyrelayError::Store(_)));
    }
}
