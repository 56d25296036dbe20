//! Error types for WaBlast

use thiserror::Error;

/// Main error type for WaBlast
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WaBlast
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
