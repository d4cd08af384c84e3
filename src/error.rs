use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("session not found for account {0}")]
    SessionNotFound(String),

    #[error("session not ready (status: {0})")]
    SessionNotReady(String),

    #[error("pairing failed: {0}")]
    PairingFailed(String),

    #[error("connector error: {0}")]
    Connector(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("chatbot not found: {0}")]
    ConfigNotFound(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "session_not_found",
            Error::SessionNotReady(_) => "session_not_ready",
            Error::PairingFailed(_) => "pairing_failed",
            Error::Connector(_) => "connector_error",
            Error::Validation(_) => "validation_error",
            Error::Persistence(_) => "persistence_error",
            Error::ConfigNotFound(_) => "config_not_found",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Connector(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
