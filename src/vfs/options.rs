use std::time::SystemTime;

use bitflags::bitflags;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
    /// An alias entry.
    Symlink,
}

/// The attributes the filesystem reports for a path or an open handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    /// Permission bits only, without the file type.
    pub permissions: u32,
    /// [`None`] when the store has not told us the size yet.
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
}

impl Metadata {
    pub fn directory(permissions: u32) -> Self {
        Metadata {
            kind: FileKind::Directory,
            permissions,
            size: None,
            mtime: None,
            ctime: None,
        }
    }

    pub fn file(permissions: u32, size: Option<u64>) -> Self {
        Metadata {
            kind: FileKind::File,
            permissions,
            size,
            mtime: None,
            ctime: None,
        }
    }

    pub fn symlink(permissions: u32) -> Self {
        Metadata {
            kind: FileKind::Symlink,
            permissions,
            size: None,
            mtime: None,
            ctime: None,
        }
    }

    #[must_use]
    pub fn with_times(mut self, mtime: Option<SystemTime>, ctime: Option<SystemTime>) -> Self {
        self.mtime = mtime;
        self.ctime = ctime;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// `st_mode`, file type bits included.
    pub fn mode(&self) -> u32 {
        let file_type = match self.kind {
            FileKind::Directory => 0o040_000,
            FileKind::File => 0o100_000,
            FileKind::Symlink => 0o120_000,
        };

        file_type | self.permissions
    }
}

/// The simplified lowest-common-denominator of file-opening types that the VFS
/// needs to support.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const READ = 0x00000001;
        const WRITE = 0x00000002;
        const APPEND = 0x00000004;
        const CREATE = 0x00000008;
        const TRUNCATE = 0x00000010;
        const EXCLUDE = 0x00000020;
    }
}

impl OpenFlags {
    /// Whether opening with these flags would create or modify content.
    pub fn is_write(self) -> bool {
        self.intersects(
            OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        )
    }
}
