#![forbid(unsafe_code)]

use std::path::PathBuf;
use sw_core::TransitionError;
use sw_core::ids::IncrementIdError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Parse { path: PathBuf, message: String },
    NotFound(String),
    AlreadyExists(String),
    InvalidTransition(TransitionError),
    InvalidInput(&'static str),
    InvalidId(IncrementIdError),
    ConfirmationRequired,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::Parse { path, message } => {
                write!(f, "parse error in {}: {message}", path.display())
            }
            Self::NotFound(id) => write!(f, "increment not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "increment already exists: {id}"),
            Self::InvalidTransition(err) => write!(f, "{err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::InvalidId(err) => write!(f, "invalid id: {err}"),
            Self::ConfirmationRequired => {
                write!(f, "destructive operation requires explicit confirmation")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::InvalidTransition(err) => Some(err),
            Self::InvalidId(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<TransitionError> for StoreError {
    fn from(value: TransitionError) -> Self {
        Self::InvalidTransition(value)
    }
}

impl From<IncrementIdError> for StoreError {
    fn from(value: IncrementIdError) -> Self {
        Self::InvalidId(value)
    }
}
