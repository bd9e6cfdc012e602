//! The emoji namespace as a virtual filesystem.
//!
//! Every store of every platform is mounted at `/<platform>/<store>`, and its
//! emoji appear as image files inside. Nothing here knows how a store talks
//! to its platform; that sits behind [`EmojiStore`](crate::store::EmojiStore).
//!
//! # The [`Vfs`] Trait
//! This is the contract a transport drives: a FUSE binding, the built-in shell
//! or a test. The documentation looks a bit hairy due to `#[async_trait]`, but
//! it is just a set of path- and handle-based filesystem callbacks returning
//! an [`Error`] that maps onto an errno.
//!
//! # Layers
//! [`EmojiFs`] implements [`Vfs`] on top of:
//! - a [`Namespace`] that routes paths to stores, honoring the [`RenameMap`],
//! - a [`DirectoryCache`] per store that lists it at most once at a time and
//!   keeps the listing up to date with the writes made through it,
//! - [`names`], which matches the file names callers use against canonical
//!   emoji names.

mod cache;
mod emoji_fs;
mod error;
pub mod names;
mod namespace;
mod options;
mod path;
mod rename;
mod vfs_trait;

#[cfg(test)]
#[path = "./emoji_fs_test.rs"]
mod emoji_fs_test;

pub use cache::{DirectoryCache, Listing, Mutation, Snapshot};
pub use emoji_fs::{EmojiFs, MAX_EMOJI_SIZE, XATTR_CREATED_BY, XATTR_URL};
pub use error::{Error, IntoBackend};
pub use namespace::{Location, Namespace, NamespaceBuilder, StoreMount};
pub use options::*;
pub use path::{FileName, VirtualPath};
pub use rename::RenameMap;
pub use vfs_trait::*;
