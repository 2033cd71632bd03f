use std::fmt;

use const_format::concatcp;

pub mod database;
mod gpx_util;
mod data_manager;
mod token;

pub use data_manager::*;
pub use gpx_util::trip_to_gpx;
pub use token::{generate_token, hash_token};

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "database.db");

#[derive(Debug, Clone, PartialEq)]
pub enum DataManagerError {
    Database(String),
    /// The record does not exist or belongs to another user.
    NotFound(String),
    /// The user already has an active trip.
    Conflict(String),
    /// The record exists but is not in a state that allows the operation.
    InvalidState(String),
    Export(String),
}

impl fmt::Display for DataManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataManagerError::Database(msg) => write!(f, "Database error: {}", msg),
            DataManagerError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DataManagerError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            DataManagerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            DataManagerError::Export(msg) => write!(f, "Export error: {}", msg),
        }
    }
}

impl std::error::Error for DataManagerError {}
