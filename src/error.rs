//! Error types for the code intelligence service.
//!
//! Structured error enums via thiserror, one per concern. Per-file errors
//! are caught inside the indexing loop and recorded on the file row; only
//! startup and store-level failures propagate to the runtime.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Repository '{name}' not found")]
    RepositoryNotFound { name: String },

    #[error("Repository '{name}' is not present in the configuration file")]
    RepositoryNotConfigured { name: String },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("{0}")]
    General(String),
}

/// Errors specific to extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to initialize {language} parser: {reason}")]
    ParserInit { language: String, reason: String },

    #[error("Parser produced no tree for '{path}'")]
    ParseFailed { path: PathBuf },
}

/// Errors specific to the state, graph, and vector stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Entity {id} not found")]
    EntityNotFound { id: String },

    #[error("Pending reference {id} not found")]
    ReferenceNotFound { id: String },

    #[error("Vector snapshot at '{path}' could not be {operation}: {reason}")]
    VectorSnapshot {
        path: PathBuf,
        operation: &'static str,
        reason: String,
    },
}

/// Errors from the embedding provider.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Embedding provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("Provider returned a vector of {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Errors from the instance lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to write lock file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;
