//! Error taxonomy shared by every cloudlink component.
//!
//! Validation and authentication failures are detected locally and never
//! reach the network. Provider and transport failures carry the operation
//! that produced them so callers can tell which call and which resource
//! failed without parsing messages.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = CloudError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CloudError {
    /// Malformed or missing input, caught before any I/O.
    #[error("validation error: {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Cipher tamper, or an invalid/expired OAuth credential.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Missing credential or remote resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API rejected the request.
    #[error("{context}provider returned {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        context: String,
    },

    /// HTTP 429 from the remote API.
    #[error("{context}rate limited: {message}")]
    RateLimited {
        message: String,
        reset_at: Option<DateTime<Utc>>,
        context: String,
    },

    /// DNS, connect, timeout or connection-reset failure below HTTP.
    #[error("{context}transport error: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// Polling or build deadline exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Phase-tagged failure inside the build pipeline.
    #[error("build failed during {phase}: {message}")]
    Build { phase: String, message: String },

    /// Persistence failure in the bundled credential store.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CloudError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CloudError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        CloudError::Provider {
            status,
            message: message.into(),
            context: String::new(),
        }
    }

    pub fn transport(source: reqwest::Error) -> Self {
        CloudError::Transport {
            context: String::new(),
            source,
        }
    }

    /// HTTP status embedded in the error, if any. `RateLimited` reports 429.
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Provider { status, .. } => Some(*status),
            CloudError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// 401 or 403 from the provider, or a local authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CloudError::Authentication(_)) || matches!(self.status(), Some(401 | 403))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_)) || self.status() == Some(404)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// 5xx from the provider.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self.status(), Some(s) if s >= 500)
    }

    /// Prefixes operation context onto provider and transport errors.
    ///
    /// Other variants pass through unchanged so local failures keep their
    /// original message.
    pub fn context(self, operation: impl AsRef<str>) -> Self {
        let prefix = |existing: String| format!("{}: {}", operation.as_ref(), existing);
        match self {
            CloudError::Provider {
                status,
                message,
                context,
            } => CloudError::Provider {
                status,
                message,
                context: prefix(context),
            },
            CloudError::RateLimited {
                message,
                reset_at,
                context,
            } => CloudError::RateLimited {
                message,
                reset_at,
                context: prefix(context),
            },
            CloudError::Transport { context, source } => CloudError::Transport {
                context: prefix(context),
                source,
            },
            other => other,
        }
    }
}

impl From<rusqlite::Error> for CloudError {
    fn from(e: rusqlite::Error) -> Self {
        CloudError::Storage(e.to_string())
    }
}

/// Adds operation context to a `Result<T, CloudError>`.
pub trait ResultExt<T> {
    fn op_context(self, operation: impl AsRef<str>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op_context(self, operation: impl AsRef<str>) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(CloudError::provider(401, "bad token").is_auth_failure());
        assert!(CloudError::provider(403, "forbidden").is_auth_failure());
        assert!(CloudError::provider(404, "gone").is_not_found());
        assert!(CloudError::provider(502, "bad gateway").is_upstream_failure());
        assert!(!CloudError::provider(400, "bad request").is_upstream_failure());

        let limited = CloudError::RateLimited {
            message: "slow down".to_string(),
            reset_at: None,
            context: String::new(),
        };
        assert_eq!(limited.status(), Some(429));
        assert!(limited.is_rate_limited());
    }

    #[test]
    fn test_context_is_prefixed() {
        let err = CloudError::provider(500, "boom")
            .context("create_database(db-1)")
            .context("vercel");
        assert_eq!(err.status(), Some(500));
        let message = err.to_string();
        assert!(message.starts_with("vercel: create_database(db-1): "));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_context_leaves_local_errors_alone() {
        let err = CloudError::validation("name", "must not be empty").context("create_project");
        assert_eq!(err.to_string(), "validation error: name: must not be empty");
    }
}
