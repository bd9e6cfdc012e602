use std::{collections::BTreeMap, time::SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{Level, event, instrument};

use super::{EmojiEntry, EmojiStore, MediaType, StoreCapabilities, StoreError};

#[derive(Debug, Clone)]
struct StoredEmoji {
    entry: EmojiEntry,
    content: Vec<u8>,
}

/// An emoji store that lives entirely in memory.
///
/// Aliases are resolved one hop deep, the same way the chat platforms
/// resolve them.
#[derive(Debug)]
pub struct MemoryStore {
    label: String,
    capabilities: StoreCapabilities,
    emoji: Mutex<BTreeMap<String, StoredEmoji>>,
}

impl MemoryStore {
    pub fn new(label: impl Into<String>) -> Self {
        MemoryStore {
            label: label.into(),
            capabilities: StoreCapabilities::WRITE | StoreCapabilities::ALIAS,
            emoji: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds an emoji with the given content, replacing anything of the same
    /// name.
    #[must_use]
    pub fn with_emoji(self, name: &str, media_type: MediaType, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let entry = EmojiEntry::new(name, media_type, self.source_for(name, Some(media_type)))
            .with_size(content.len() as u64);

        self.emoji
            .lock()
            .insert(name.to_owned(), StoredEmoji { entry, content });
        self
    }

    #[must_use]
    pub fn with_alias(self, name: &str, target: &str) -> Self {
        let entry = EmojiEntry::alias(name, target, format!("alias:{target}"));

        self.emoji.lock().insert(
            name.to_owned(),
            StoredEmoji {
                entry,
                content: Vec::new(),
            },
        );
        self
    }

    /// Records who uploaded `name`. Does nothing if there is no such emoji.
    #[must_use]
    pub fn uploaded_by(self, name: &str, user: &str) -> Self {
        if let Some(stored) = self.emoji.lock().get_mut(name) {
            stored.entry.created_by = Some(user.to_owned());
        }
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.capabilities = StoreCapabilities::empty();
        self
    }

    fn source_for(&self, name: &str, media_type: Option<MediaType>) -> String {
        match media_type {
            Some(media_type) => format!("memory://{}/{name}.{}", self.label, media_type.extension()),
            None => format!("memory://{}/{name}", self.label),
        }
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.capabilities.contains(StoreCapabilities::WRITE) {
            Ok(())
        } else {
            Err(StoreError::Unsupported("writes"))
        }
    }
}

#[async_trait]
impl EmojiStore for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn list(&self) -> Result<Vec<EmojiEntry>, StoreError> {
        Ok(self
            .emoji
            .lock()
            .values()
            .map(|stored| stored.entry.clone())
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let emoji = self.emoji.lock();
        let stored = emoji
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?;

        let Some(target) = &stored.entry.alias_for else {
            return Ok(stored.content.clone());
        };

        match emoji.get(target) {
            Some(target_emoji) if !target_emoji.entry.is_alias() => {
                Ok(target_emoji.content.clone())
            }
            _ => Err(StoreError::IsAlias {
                name: name.to_owned(),
                target: target.clone(),
            }),
        }
    }

    #[instrument(skip(self, content), fields(label = %self.label, size = content.len()))]
    async fn create(
        &self,
        name: &str,
        content: Vec<u8>,
        media_type: MediaType,
    ) -> Result<EmojiEntry, StoreError> {
        self.ensure_writable()?;

        if content.is_empty() {
            return Err(StoreError::InvalidContent("emoji image is empty".into()));
        }

        let mut emoji = self.emoji.lock();
        if emoji.contains_key(name) {
            return Err(StoreError::NameConflict(name.to_owned()));
        }

        let entry = EmojiEntry::new(name, media_type, self.source_for(name, Some(media_type)))
            .with_size(content.len() as u64)
            .with_created(SystemTime::now());
        emoji.insert(
            name.to_owned(),
            StoredEmoji {
                entry: entry.clone(),
                content,
            },
        );

        event!(Level::DEBUG, "created emoji");
        Ok(entry)
    }

    #[instrument(skip(self), fields(label = %self.label))]
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;

        self.emoji
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    #[instrument(skip(self), fields(label = %self.label))]
    async fn create_alias(&self, name: &str, target: &str) -> Result<EmojiEntry, StoreError> {
        self.ensure_writable()?;

        let mut emoji = self.emoji.lock();
        if emoji.contains_key(name) {
            return Err(StoreError::NameConflict(name.to_owned()));
        }
        match emoji.get(target) {
            None => return Err(StoreError::NotFound(target.to_owned())),
            Some(stored) if stored.entry.is_alias() => {
                return Err(StoreError::IsAlias {
                    name: target.to_owned(),
                    target: stored.entry.alias_for.clone().unwrap_or_default(),
                });
            }
            Some(_) => {}
        }

        let entry = EmojiEntry::alias(name, target, format!("alias:{target}"))
            .with_created(SystemTime::now());
        emoji.insert(
            name.to_owned(),
            StoredEmoji {
                entry: entry.clone(),
                content: Vec::new(),
            },
        );

        Ok(entry)
    }
}
