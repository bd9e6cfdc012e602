//! Backend emoji stores.
//!
//! A store is one authenticated emoji collection on one platform: a Slack
//! workspace, a Discord guild, or a directory on local disk. The filesystem
//! layer in [`crate::vfs`] only ever talks to stores through the
//! [`EmojiStore`] capability trait, so adding a platform means implementing
//! that trait and registering the result with a
//! [`NamespaceBuilder`](crate::vfs::NamespaceBuilder). Nothing in the core
//! branches on which platform a store belongs to.
//!
//! Two implementations ship with the crate:
//!
//! - [`LocalDirStore`] serves a directory of image files, with symlinks
//!   standing in for aliases.
//! - [`MemoryStore`] keeps everything in memory, which is handy as a scratch
//!   area and for exercising the filesystem layer.

mod emoji_store;
mod entry;
mod error;
mod local_dir;
mod memory;
mod platform;

#[cfg(test)]
pub(crate) mod testing;

pub use emoji_store::{EmojiStore, StoreCapabilities};
pub use entry::{EmojiEntry, MediaType};
pub use error::StoreError;
pub use local_dir::LocalDirStore;
pub use memory::MemoryStore;
pub use platform::{Platform, PlatformParseError};
