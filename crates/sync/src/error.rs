#![forbid(unsafe_code)]

use sw_core::retry::RemoteError;
use sw_storage::StoreError;

#[derive(Debug)]
pub enum SyncError {
    Store(StoreError),
    Remote(RemoteError),
    Canceled,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store: {err}"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Canceled => write!(f, "sync canceled"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Remote(err) => Some(err),
            Self::Canceled => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}
