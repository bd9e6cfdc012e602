use rustix::io::Errno;

use crate::store::StoreError;

/// Failures surfaced to filesystem callers.
///
/// Every variant has a fixed errno (see [`Error::errno`]); failures that come
/// from a store are wrapped in [`Error::Backend`] and classified by their
/// [`StoreError`] kind.
#[derive(Debug, thiserror::Error, thiserror_ext::ContextInto)]
pub enum Error {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("{name} matches more than one emoji ({})", candidates.join(", "))]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} is not supported")]
    NotSupported(&'static str),
    #[error("{0} is a directory")]
    IsADirectory(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is not a valid emoji file name")]
    InvalidName(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid emoji content: {0}")]
    InvalidContent(String),
    #[error("{0} would be larger than an emoji may be")]
    TooLarge(String),
    #[error("{0} is read-only")]
    ReadOnly(String),
    #[error("{0} is not a symbolic link")]
    NotASymlink(String),
    #[error("bad file handle")]
    BadHandle,
    #[error("no attribute {0}")]
    NoAttribute(String),
    #[error("{from}")]
    Backend { source: StoreError, from: String },
}

impl Error {
    pub fn errno(&self) -> Errno {
        match self {
            Error::NotFound(_) | Error::AmbiguousName { .. } => Errno::NOENT,
            Error::AlreadyExists(_) => Errno::EXIST,
            Error::NotSupported(_) => Errno::OPNOTSUPP,
            Error::IsADirectory(_) => Errno::ISDIR,
            Error::NotADirectory(_) => Errno::NOTDIR,
            Error::InvalidName(_) | Error::InvalidPath(_) | Error::NotASymlink(_) => Errno::INVAL,
            Error::InvalidContent(_) => Errno::IO,
            Error::TooLarge(_) => Errno::FBIG,
            Error::ReadOnly(_) => Errno::ACCESS,
            Error::BadHandle => Errno::BADF,
            Error::NoAttribute(_) => Errno::NODATA,
            Error::Backend { source, .. } => match source {
                StoreError::NotFound(_) | StoreError::IsAlias { .. } => Errno::NOENT,
                StoreError::NameConflict(_) => Errno::EXIST,
                StoreError::QuotaExceeded(_) => Errno::PERM,
                StoreError::Unsupported(_) => Errno::OPNOTSUPP,
                StoreError::IoError { source, .. } => {
                    Errno::from_io_error(source).unwrap_or(Errno::IO)
                }
                StoreError::AuthExpired(_)
                | StoreError::BackendUnavailable(_)
                | StoreError::InvalidContent(_) => Errno::IO,
            },
        }
    }
}
