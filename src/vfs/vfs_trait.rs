use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};

use super::{Error, Metadata, OpenFlags};

/// The filesystem callback contract.
///
/// A transport (FUSE, a shell, a test) drives the emoji namespace through
/// this trait. Paths are absolute virtual paths of the form
/// `/<platform>/<store>/<file>`.
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Lists a directory as `(file name, metadata)` pairs.
    ///
    /// Listing a store directory for the first time can take as long as the
    /// backing store needs to enumerate its emoji.
    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<(String, Metadata)>, Error>;

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error>;

    /// Opens the file at `path` using the `flags` provided.
    ///
    /// Opening for reading fetches the whole emoji. Opening for writing only
    /// succeeds for names that don't exist yet; the content is uploaded when
    /// the handle is closed.
    async fn open(&self, path: &Utf8Path, flags: OpenFlags) -> Result<Handle, Error>;

    /// Reads `len` bytes from the file represented by the given `handle`,
    /// starting at `offset` bytes from the start of the file.
    ///
    /// If there are less than `len` bytes in the file starting at `offset`,
    /// returns a shorter buffer containing the remaining bytes. If
    /// attempting to read from a file starting at or past the `EOF`, returns
    /// [`None`].
    async fn read(
        &self,
        handle: &Handle,
        offset: usize,
        len: usize,
    ) -> Result<Option<Vec<u8>>, Error>;

    async fn write(&self, handle: &Handle, offset: usize, data: &[u8]) -> Result<(), Error>;
    async fn truncate(&self, handle: &Handle, len: usize) -> Result<(), Error>;
    async fn stat_fd(&self, handle: &Handle) -> Result<Metadata, Error>;

    /// Releases a handle. For a write handle this is where the emoji is
    /// actually created, so errors from the store surface here.
    async fn close(&self, handle: Handle) -> Result<(), Error>;

    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error>;
    async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error>;
    async fn mkdir(&self, path: &Utf8Path) -> Result<(), Error>;
    async fn remove_dir(&self, path: &Utf8Path) -> Result<(), Error>;

    async fn readlink(&self, path: &Utf8Path) -> Result<Utf8PathBuf, Error>;

    /// Creates an alias at `path` pointing at `target`.
    async fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> Result<(), Error>;

    async fn list_xattr(&self, path: &Utf8Path) -> Result<Vec<String>, Error>;
    async fn get_xattr(&self, path: &Utf8Path, name: &str) -> Result<Vec<u8>, Error>;
}

/// An open file within an [`EmojiFs`](super::EmojiFs).
///
/// Handles are never reused within one process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    handle_ty: HandleType,
    id: u64,
}

impl Handle {
    pub(super) fn new(handle_ty: HandleType, id: u64) -> Self {
        Handle { handle_ty, id }
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.handle_ty {
            HandleType::Read => write!(f, "read_{}", self.id),
            HandleType::Write => write!(f, "write_{}", self.id),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleType {
    Read,
    Write,
}
