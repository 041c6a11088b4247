// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum EdgarError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error {status} for {url}")]
    Http {
        status: reqwest::StatusCode, // e.g., 404 Not Found, 403 Forbidden
        url: String,
    },

    #[error("Request to {url} did not complete: {reason}")]
    Unreachable { url: String, reason: String },
}

/// Content that came back from EDGAR but did not have the expected shape.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: expected 5 fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: invalid filing date '{raw}'")]
    InvalidDate { line: usize, raw: String },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("detail page {url}: {what} not found")]
    MissingElement { url: String, what: &'static str },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt checkpoint entry '{entry}' in {file}")]
    CorruptCheckpoint { file: String, entry: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("EDGAR interaction failed: {0}")]
    Edgar(#[from] EdgarError), // Automatically convert Edgar errors

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
