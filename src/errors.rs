use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("AUTH_FAILED: {0}")]
    Auth(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CONFLICT: {0}")]
    Conflict(String),
    #[error("FORMAT_INVALID: {0}")]
    Format(String),
    #[error("NETWORK_FAILURE: {0}")]
    Network(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not-found",
            Self::Conflict(_) => "conflict",
            Self::Format(_) => "format",
            Self::Network(_) => "network",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(value: base64::DecodeError) -> Self {
        Self::Format(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
