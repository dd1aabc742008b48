//! Error types for the Atlas provider.
//!
//! Two layers: [`ApiError`] classifies failures of the remote Atlas API, and
//! [`ProviderError`] is what every provider lifecycle operation returns.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors returned by the Atlas API client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API answered 401.
    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    /// The API answered 403.
    #[error("forbidden (403): {0}")]
    Forbidden(String),

    /// The API answered 404.
    #[error("not found (404): {0}")]
    NotFound(String),

    /// Any other error response, carrying the structured Atlas error code if present.
    #[error("request failed ({status}){}: {detail}", code_suffix(.error_code))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable `errorCode` field.
        error_code: Option<String>,
        /// Human-readable `detail` field.
        detail: String,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be decoded.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default()
}

impl ApiError {
    /// Whether the API reported the entity as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the API rejected the credentials for this call.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// The structured `errorCode`, if the API sent one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Api { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for an error response with an `errorCode`.
    pub fn with_code(status: u16, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Api {
            status,
            error_code: Some(code.into()),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("failed to connect to the Atlas API".to_string())
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Errors that can occur in a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remote API call failed.
    #[error("{context}: {source}")]
    Api {
        /// Which operation failed and on which entity.
        context: String,
        /// The underlying API error.
        #[source]
        source: ApiError,
    },

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Wrap an [`ApiError`] with the operation and entity that failed.
    pub fn api(context: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            context: context.into(),
            source,
        }
    }

    /// The API error underneath, if this error came from a remote call.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::PermissionDenied(msg)
            | Self::DeadlineExceeded(msg)
            | Self::Cancelled(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Api { context, source } => format!("{}: {}", context, source),
        }
    }

    /// Render this error as a single error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.to_string())
    }
}
