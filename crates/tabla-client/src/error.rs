use thiserror::Error;

use crate::config::ConfigError;
use crate::geo::GeoError;

/// Coarse classification used by retry decisions and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failures and 5xx responses. Retried.
    Network,
    /// 401 responses. One token refresh, then one retry.
    Authentication,
    /// 4xx responses other than 401. Never retried.
    Validation,
    /// Platform permission refused (geolocation). Never retried.
    Permission,
    /// Anything else, including undecodable responses.
    Unknown,
}

/// Errors produced by the remote API client.
///
/// The type is `Clone` because a single failed load is shared by every
/// coalesced caller waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Map a non-success HTTP status and its extracted message to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized(message),
            400..=499 => Self::Rejected { status, message },
            _ => Self::Server { status, message },
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::Rejected { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Server { .. } => ErrorKind::Network,
            Self::Unauthorized(_) => ErrorKind::Authentication,
            Self::Rejected { .. } => ErrorKind::Validation,
            Self::Decode(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the generic retry policy may retry this error.
    ///
    /// 401 is handled separately (refresh then a single retry).
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Unauthorized(msg) | Self::Rejected { message: msg, .. } if !msg.is_empty() => {
                msg.clone()
            }
            Self::Unauthorized(_) => "Your session has expired. Please sign in again.".to_string(),
            Self::Rejected { status, .. } => format!("The request was rejected (HTTP {status})."),
            Self::Server { .. } => {
                "The server encountered an error. Please try again later.".to_string()
            }
            Self::Decode(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors from the durable key/value storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot determine home directory")]
    NoHomeDirectory,

    #[error("Invalid value stored under '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl StorageError {
    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Umbrella error for the client layer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Geolocation(#[from] GeoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Auth context used before initialization")]
    NotInitialized,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("A mutation for '{resource_id}' is already in flight")]
    MutationInFlight { resource_id: String },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(e) => e.kind(),
            Self::Geolocation(GeoError::PermissionDenied) => ErrorKind::Permission,
            Self::NotAuthenticated => ErrorKind::Authentication,
            Self::MutationInFlight { .. } => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            Self::NotAuthenticated => "Please sign in to continue.".to_string(),
            Self::MutationInFlight { .. } => {
                "Please wait for the previous action to finish.".to_string()
            }
            Self::Geolocation(e) => e.to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
