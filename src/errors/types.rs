//! # Error Types
//!
//! Error taxonomy for the data source layer using `thiserror`.
//!
//! Configuration problems (missing rows, undecryptable secrets, unknown source
//! types) are user-actionable and never retried. Backend outages are retried
//! once by the provider before they surface. Security rejections are final.

use crate::domain::SourceType;
use crate::services::secret_cipher::DecryptError;

/// Custom result type for sourceplane operations
pub type Result<T> = std::result::Result<T, SourceplaneError>;

/// Main error type for sourceplane
#[derive(thiserror::Error, Debug)]
pub enum SourceplaneError {
    /// Missing or invalid data source configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        workspace_id: Option<String>,
    },

    /// A stored secret could not be decrypted with any known key
    #[error(
        "Configuration error: secret for workspace '{workspace_id}' (data source {data_source_id}) could not be decrypted: {reason}"
    )]
    SecretDecryption {
        workspace_id: String,
        data_source_id: String,
        #[source]
        reason: DecryptError,
    },

    /// Connect/query timeout or transport failure against a backend
    #[error("Backend unavailable ({source_type}) for workspace '{workspace_id}': {message}")]
    BackendUnavailable {
        source_type: SourceType,
        workspace_id: String,
        message: String,
    },

    /// Statement rejected by the SQL denylist
    #[error("Security error: {message}")]
    Security {
        message: String,
        workspace_id: Option<String>,
    },

    /// Configuration store errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SourceplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into(), workspace_id: None }
    }

    /// Create a configuration error scoped to a workspace
    pub fn config_for<S: Into<String>, W: Into<String>>(message: S, workspace_id: W) -> Self {
        Self::Configuration { message: message.into(), workspace_id: Some(workspace_id.into()) }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable<W: Into<String>, M: Into<String>>(
        source_type: SourceType,
        workspace_id: W,
        message: M,
    ) -> Self {
        Self::BackendUnavailable {
            source_type,
            workspace_id: workspace_id.into(),
            message: message.into(),
        }
    }

    /// Create a security error
    pub fn security<S: Into<String>>(message: S, workspace_id: Option<&str>) -> Self {
        Self::Security { message: message.into(), workspace_id: workspace_id.map(str::to_string) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Whether the caller should present this as a configuration problem
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::SecretDecryption { .. })
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration { .. } => 422,
            Self::SecretDecryption { .. } => 422,
            Self::BackendUnavailable { .. } => 503,
            Self::Security { .. } => 403,
            Self::Database { .. } => 500,
            Self::Serialization { .. } => 400,
            Self::Validation { .. } => 400,
            Self::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

impl From<sqlx::Error> for SourceplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for SourceplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for SourceplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
