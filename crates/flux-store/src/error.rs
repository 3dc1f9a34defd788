use thiserror::Error;

/// Errors that can occur within the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No row with the given id exists.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// Another job already uses this name.
    #[error("job name already exists: {0}")]
    NameTaken(String),

    /// The stored step log could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
