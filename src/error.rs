//! Error types for mailpress.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures of the article pipeline and its collaborators.
///
/// Every collaborator error is classified into one of these variants before
/// it reaches the retry logic, so `is_transient()` alone decides whether a
/// call is repeated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Nothing usable to build from: {0}")]
    IncompleteInput(String),

    #[error("Transient failure talking to {service}: {reason}")]
    TransientNetwork {
        service: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication rejected by {service} (HTTP {status}): {message}")]
    Auth {
        service: String,
        status: u16,
        message: String,
    },

    #[error("CMS rejected the request (HTTP {status}): {message}")]
    Publish { status: u16, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine-readable code, used by callers to pick a UI reaction
    /// (e.g. prompting for re-authentication on `auth_error`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::IncompleteInput(_) => "incomplete_input",
            Self::TransientNetwork { .. } => "transient_network",
            Self::Auth { .. } => "auth_error",
            Self::Publish { .. } => "publish_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the retry policy may repeat the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientNetwork { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Timeout of an outbound call; always transient.
    pub fn timeout(service: impl Into<String>, after: Duration) -> Self {
        Self::TransientNetwork {
            service: service.into(),
            reason: format!("timed out after {after:?}"),
            retry_after: None,
        }
    }

    /// Classify an HTTP status returned by a remote service.
    ///
    /// 408, 429 and 5xx are transient; 401/403 are auth failures; any other
    /// non-success status is a permanent rejection carrying `message`.
    pub fn from_status(
        service: &str,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        match status {
            401 | 403 => Self::Auth {
                service: service.to_string(),
                status,
                message: message.into(),
            },
            408 | 429 | 500..=599 => Self::TransientNetwork {
                service: service.to_string(),
                reason: format!("HTTP {status}: {}", message.into()),
                retry_after,
            },
            _ => Self::Publish {
                status,
                message: message.into(),
            },
        }
    }
}

/// Export and import errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed {format} document: {reason}")]
    Malformed { format: String, reason: String },
}

/// Errors reading raw mail files.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Could not parse message {0}")]
    Unparsable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
