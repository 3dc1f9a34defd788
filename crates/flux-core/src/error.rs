use thiserror::Error;

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FluxError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            FluxError::Config(_) => "CONFIG_ERROR",
            FluxError::InvalidToken(_) => "INVALID_TOKEN",
            FluxError::TokenExpired => "TOKEN_EXPIRED",
            FluxError::Serialization(_) => "SERIALIZATION_ERROR",
            FluxError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, FluxError>;
