//! Error types for the tracker

use std::fmt;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// The position capability or the server refused us. Tracking cannot start.
    PermissionDenied(String),
    /// A REST or socket call failed. Nothing was changed locally.
    NetworkTransient(String),
    /// The operation is not allowed in the current trip state.
    InvalidState(String),
    /// A single checkpoint could not be stored.
    PersistenceFailure(String),
    NotFound(String),
    Config(String),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            TrackerError::NetworkTransient(msg) => write!(f, "Network error: {}", msg),
            TrackerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            TrackerError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
            TrackerError::NotFound(msg) => write!(f, "Not found: {}", msg),
            TrackerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<reqwest::Error> for TrackerError {
    fn from(error: reqwest::Error) -> Self {
        TrackerError::NetworkTransient(error.to_string())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(error: std::io::Error) -> Self {
        TrackerError::NetworkTransient(error.to_string())
    }
}
