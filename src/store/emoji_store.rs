use async_trait::async_trait;
use bitflags::bitflags;

use super::{EmojiEntry, MediaType, StoreError};

bitflags! {
    /// What a store is able to do beyond listing and fetching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StoreCapabilities: u8 {
        /// Emoji can be created and deleted.
        const WRITE = 0b0000_0001;
        /// New aliases can be created with [`EmojiStore::create_alias`].
        const ALIAS = 0b0000_0010;
    }
}

/// One emoji collection on one platform.
///
/// Implementations own their authentication state and any retry policy
/// (token refresh, rate limiting). The filesystem layer never retries on a
/// store's behalf.
///
/// There is no way to replace the content of an existing emoji. Callers
/// delete and then create.
#[async_trait]
pub trait EmojiStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::WRITE
    }

    /// Enumerates every emoji in the store.
    ///
    /// This can take tens of seconds on large workspaces. Entries whose size
    /// would need an extra request per emoji may leave `size` unset.
    async fn list(&self) -> Result<Vec<EmojiEntry>, StoreError>;

    /// Fetches the bytes of the named emoji, following aliases.
    ///
    /// Returns [`StoreError::IsAlias`] when `name` only points at something
    /// the store cannot produce bytes for, and [`StoreError::NotFound`] when
    /// there is no such emoji at all.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    async fn create(
        &self,
        name: &str,
        content: Vec<u8>,
        media_type: MediaType,
    ) -> Result<EmojiEntry, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Makes `name` another name for the existing emoji `target`.
    async fn create_alias(&self, _name: &str, _target: &str) -> Result<EmojiEntry, StoreError> {
        Err(StoreError::Unsupported("aliases"))
    }
}
