use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{EmojiEntry, EmojiStore, MediaType, MemoryStore, StoreCapabilities, StoreError};

/// Wraps a [`MemoryStore`] so tests can count and hold up listings.
pub(crate) struct GatedStore {
    inner: MemoryStore,
    list_calls: AtomicUsize,
    fail_next_list: AtomicBool,
    gate: watch::Sender<bool>,
    create_gate: watch::Sender<bool>,
}

impl GatedStore {
    /// Starts with the gate open.
    pub(crate) fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(GatedStore {
            inner,
            list_calls: AtomicUsize::new(0),
            fail_next_list: AtomicBool::new(false),
            gate: watch::channel(true).0,
            create_gate: watch::channel(true).0,
        })
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// While closed, `list` blocks after counting the call.
    pub(crate) fn set_gate(&self, open: bool) {
        self.gate.send_replace(open);
    }

    /// While closed, `create` blocks before reaching the inner store.
    pub(crate) fn set_create_gate(&self, open: bool) {
        self.create_gate.send_replace(open);
    }

    pub(crate) fn fail_next_list(&self) {
        self.fail_next_list.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmojiStore for GatedStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn list(&self) -> Result<Vec<EmojiEntry>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| StoreError::BackendUnavailable("gate dropped".into()))?;

        if self.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(StoreError::BackendUnavailable("injected failure".into()));
        }

        self.inner.list().await
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.fetch(name).await
    }

    async fn create(
        &self,
        name: &str,
        content: Vec<u8>,
        media_type: MediaType,
    ) -> Result<EmojiEntry, StoreError> {
        let mut gate = self.create_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| StoreError::BackendUnavailable("gate dropped".into()))?;

        self.inner.create(name, content, media_type).await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete(name).await
    }

    async fn create_alias(&self, name: &str, target: &str) -> Result<EmojiEntry, StoreError> {
        self.inner.create_alias(name, target).await
    }
}
