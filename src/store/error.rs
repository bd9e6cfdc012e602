use std::{io, sync::Arc};

/// The closed set of ways a store operation can fail.
///
/// Errors are cheap to clone because a single failed listing is handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("no emoji named :{0}:")]
    NotFound(String),
    #[error(":{name}: is an alias for :{target}:, which could not be followed")]
    IsAlias { name: String, target: String },
    #[error(":{0}: already exists")]
    NameConflict(String),
    #[error("emoji quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("credentials expired: {0}")]
    AuthExpired(String),
    #[error("invalid emoji content: {0}")]
    InvalidContent(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("{0} not supported by this store")]
    Unsupported(&'static str),
    #[error("I/O error: {from}")]
    IoError {
        source: Arc<io::Error>,
        from: String,
    },
}

impl StoreError {
    pub(crate) fn io_error(source: io::Error, from: impl Into<String>) -> Self {
        StoreError::IoError {
            source: Arc::new(source),
            from: from.into(),
        }
    }
}
