//! The per-store directory cache.
//!
//! Listing a store is slow (seconds to tens of seconds for large workspaces),
//! so each store's listing is fetched lazily and shared. The cache moves
//! through four states:
//!
//! ```text
//!            list() ok                    write
//!   Empty ─────────────▶ Loading ─────▶ Ready ─────▶ Invalidated
//!     ▲     first access    │                            │
//!     └─────────────────────┘                            │ next access:
//!          list() failed         Loading ◀───────────────┘ background list()
//! ```
//!
//! While a cold load is running every caller waits on the same `list()`
//! call. Once a snapshot exists, callers are never made to wait again: an
//! invalidated snapshot is served as-is while one background refresh
//! replaces it.

use std::{
    collections::BTreeMap,
    mem,
    sync::Arc,
    time::{Instant, SystemTime},
};

use parking_lot::Mutex;
use thiserror_ext::AsReport;
use tokio::sync::watch;
use tracing::{Level, event};

use crate::{
    metrics::{CACHE_HITS, CACHE_MISSES, STORE_LIST_DURATION, STORE_LIST_ERRORS},
    store::{EmojiEntry, EmojiStore, StoreError},
};

/// One store's emoji, keyed by canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    entries: BTreeMap<String, EmojiEntry>,
}

impl Listing {
    pub fn get(&self, name: &str) -> Option<&EmojiEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmojiEntry> {
        self.entries.values()
    }

    /// Oldest and newest creation time among the entries that have one.
    pub fn created_range(&self) -> Option<(SystemTime, SystemTime)> {
        self.iter()
            .filter_map(|entry| entry.created)
            .fold(None, |range, created| match range {
                None => Some((created, created)),
                Some((oldest, newest)) => Some((oldest.min(created), newest.max(created))),
            })
    }

    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Insert(entry) => {
                self.entries.insert(entry.name.clone(), entry.clone());
            }
            Mutation::Remove(name) => {
                self.entries.remove(name);
            }
            Mutation::Size { name, size } => {
                if let Some(entry) = self.entries.get_mut(name) {
                    entry.size = Some(*size);
                }
            }
        }
    }
}

impl FromIterator<EmojiEntry> for Listing {
    fn from_iter<T: IntoIterator<Item = EmojiEntry>>(iter: T) -> Self {
        Listing {
            entries: iter
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }
}

pub type Snapshot = Arc<Listing>;

/// A change made through the filesystem that the cached listing should
/// reflect before the store is asked again.
#[derive(Debug, Clone)]
pub enum Mutation {
    Insert(EmojiEntry),
    Remove(String),
    /// A size learned by fetching the emoji.
    Size { name: String, size: u64 },
}

impl Mutation {
    /// Size updates are facts the store already agrees with, so they don't
    /// call for a refresh.
    fn invalidates(&self) -> bool {
        !matches!(self, Mutation::Size { .. })
    }
}

type LoadResult = Result<Snapshot, StoreError>;

enum CacheState {
    Empty,
    Loading {
        done: watch::Receiver<Option<LoadResult>>,
        stale: Option<Snapshot>,
    },
    Ready(Snapshot),
    Invalidated(Snapshot),
}

struct Inner {
    state: CacheState,
    /// Mutations recorded while a load is in flight, replayed onto its result.
    pending: Vec<Mutation>,
    /// Bumped whenever a load starts or the cache is reset, so a load that
    /// was overtaken doesn't install its result.
    generation: u64,
    /// A background refresh failure not yet reported to any caller.
    failed_refresh: Option<StoreError>,
}

impl Inner {
    fn begin_load(&mut self, stale: Option<Snapshot>) -> (u64, watch::Sender<Option<LoadResult>>) {
        let (tx, rx) = watch::channel(None);

        self.generation += 1;
        self.pending.clear();
        self.state = CacheState::Loading { done: rx, stale };

        (self.generation, tx)
    }
}

enum Step {
    Lead(u64, watch::Sender<Option<LoadResult>>),
    Wait(watch::Receiver<Option<LoadResult>>),
}

/// Single-flight listing cache for one store.
pub struct DirectoryCache {
    store: Arc<dyn EmojiStore>,
    label: String,
    inner: Mutex<Inner>,
}

impl DirectoryCache {
    pub fn new(store: Arc<dyn EmojiStore>, label: impl Into<String>) -> Arc<Self> {
        Arc::new(DirectoryCache {
            store,
            label: label.into(),
            inner: Mutex::new(Inner {
                state: CacheState::Empty,
                pending: Vec::new(),
                generation: 0,
                failed_refresh: None,
            }),
        })
    }

    /// Returns the store's listing, fetching it if nothing is cached yet.
    ///
    /// Concurrent callers on a cold cache share a single `list()` call and
    /// all observe its outcome, error included. If the caller driving that
    /// call is dropped, one of the waiters takes over.
    ///
    /// A stale listing is served while it is refreshed in the background. If
    /// that refresh fails, the next caller gets its error once, and the one
    /// after that gets the stale listing and another refresh.
    pub async fn listing(self: &Arc<Self>) -> Result<Snapshot, StoreError> {
        loop {
            let step = {
                let mut inner = self.inner.lock();
                if let Some(err) = inner.failed_refresh.take() {
                    return Err(err);
                }

                match &inner.state {
                    CacheState::Ready(snapshot)
                    | CacheState::Loading {
                        stale: Some(snapshot),
                        ..
                    } => {
                        metrics::counter!(CACHE_HITS, "store" => self.label.clone()).increment(1);
                        return Ok(snapshot.clone());
                    }
                    CacheState::Invalidated(snapshot) => {
                        let snapshot = snapshot.clone();
                        let (generation, tx) = inner.begin_load(Some(snapshot.clone()));
                        drop(inner);

                        metrics::counter!(CACHE_HITS, "store" => self.label.clone()).increment(1);
                        event!(Level::DEBUG, store = %self.label, "refreshing listing in background");

                        let this = Arc::clone(self);
                        tokio::spawn(async move {
                            let _ = this.load(generation, tx).await;
                        });

                        return Ok(snapshot);
                    }
                    CacheState::Loading { done, stale: None } => Step::Wait(done.clone()),
                    CacheState::Empty => {
                        metrics::counter!(CACHE_MISSES, "store" => self.label.clone())
                            .increment(1);
                        let (generation, tx) = inner.begin_load(None);
                        Step::Lead(generation, tx)
                    }
                }
            };

            match step {
                Step::Lead(generation, tx) => return self.load(generation, tx).await,
                Step::Wait(mut done) => {
                    let result = match done.wait_for(Option::is_some).await {
                        Ok(result) => (*result).clone(),
                        Err(_) => None,
                    };
                    if let Some(result) = result {
                        return result;
                    }
                    // The leader was dropped before finishing; go around and
                    // pick up whatever state it left behind.
                }
            }
        }
    }

    async fn load(
        &self,
        generation: u64,
        tx: watch::Sender<Option<LoadResult>>,
    ) -> Result<Snapshot, StoreError> {
        let mut guard = LoadGuard {
            cache: self,
            generation,
            armed: true,
        };

        event!(Level::INFO, store = %self.label, "listing store");
        let started = Instant::now();
        let result = self.store.list().await;
        metrics::histogram!(STORE_LIST_DURATION, "store" => self.label.clone())
            .record(started.elapsed().as_secs_f64());

        guard.armed = false;
        let outcome = {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation;

            match result {
                Ok(entries) => {
                    let mut listing: Listing = entries.into_iter().collect();
                    let pending = if current {
                        mem::take(&mut inner.pending)
                    } else {
                        Vec::new()
                    };
                    for mutation in &pending {
                        listing.apply(mutation);
                    }
                    event!(
                        Level::INFO,
                        store = %self.label,
                        entries = listing.entries.len(),
                        replayed = pending.len(),
                        "listed store"
                    );

                    let snapshot = Arc::new(listing);
                    if current {
                        inner.state = if pending.iter().any(Mutation::invalidates) {
                            CacheState::Invalidated(snapshot.clone())
                        } else {
                            CacheState::Ready(snapshot.clone())
                        };
                    }
                    Ok(snapshot)
                }
                Err(err) => {
                    metrics::counter!(STORE_LIST_ERRORS, "store" => self.label.clone())
                        .increment(1);
                    event!(
                        Level::WARN,
                        store = %self.label,
                        error = %err.as_report(),
                        "listing store failed"
                    );

                    if current {
                        inner.pending.clear();
                        let previous = mem::replace(&mut inner.state, CacheState::Empty);
                        if let CacheState::Loading {
                            stale: Some(stale), ..
                        } = previous
                        {
                            inner.state = CacheState::Invalidated(stale);
                            inner.failed_refresh = Some(err.clone());
                        }
                    }
                    Err(err)
                }
            }
        };

        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    /// Applies a change to the cached listing without asking the store, and
    /// marks the listing for refresh.
    pub fn record(&self, mutation: Mutation) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let next = match &mut inner.state {
            CacheState::Empty => None,
            CacheState::Loading { stale, .. } => {
                if let Some(stale) = stale {
                    Arc::make_mut(stale).apply(&mutation);
                }
                inner.pending.push(mutation);
                None
            }
            CacheState::Ready(snapshot) => {
                Arc::make_mut(snapshot).apply(&mutation);
                mutation.invalidates().then(|| snapshot.clone())
            }
            CacheState::Invalidated(snapshot) => {
                Arc::make_mut(snapshot).apply(&mutation);
                None
            }
        };

        if let Some(snapshot) = next {
            inner.state = CacheState::Invalidated(snapshot);
        }
    }

    /// The cached listing, if there is one, without triggering a fetch.
    pub fn peek(&self) -> Option<Snapshot> {
        match &self.inner.lock().state {
            CacheState::Ready(snapshot)
            | CacheState::Invalidated(snapshot)
            | CacheState::Loading {
                stale: Some(snapshot),
                ..
            } => Some(snapshot.clone()),
            CacheState::Empty | CacheState::Loading { stale: None, .. } => None,
        }
    }

    /// Drops the cached listing so the next access fetches from scratch.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();

        inner.generation += 1;
        inner.pending.clear();
        inner.failed_refresh = None;
        inner.state = CacheState::Empty;
    }
}

/// Resets a load that never finished, e.g. because the caller driving it
/// was dropped mid-`list()`.
struct LoadGuard<'a> {
    cache: &'a DirectoryCache,
    generation: u64,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut inner = self.cache.inner.lock();
        if inner.generation != self.generation {
            return;
        }

        let stale = match &inner.state {
            CacheState::Loading { stale, .. } => stale.clone(),
            _ => return,
        };
        inner.state = match stale {
            Some(snapshot) => CacheState::Invalidated(snapshot),
            None => CacheState::Empty,
        };
        event!(Level::DEBUG, store = %self.cache.label, "abandoned listing");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::{MediaType, MemoryStore, testing::GatedStore};

    const GIF: &[u8] = b"GIF89a";

    fn gated() -> (Arc<GatedStore>, Arc<DirectoryCache>) {
        let store = GatedStore::new(
            MemoryStore::new("test")
                .with_emoji("parrot", MediaType::Gif, GIF)
                .with_emoji("blob", MediaType::Png, b"\x89PNG\r\n\x1a\n".as_slice()),
        );
        let cache = DirectoryCache::new(store.clone(), "test");
        (store, cache)
    }

    fn names(listing: &Listing) -> Vec<String> {
        listing.iter().map(|entry| entry.name.clone()).collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (store, cache) = gated();
        store.set_gate(false);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.listing().await })
            })
            .collect();
        settle().await;
        store.set_gate(true);

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        assert_eq!(store.list_calls(), 1);
        assert!(results.iter().all(|listing| names(listing) == ["blob", "parrot"]));
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_retried() {
        let (store, cache) = gated();
        store.set_gate(false);
        store.fail_next_list();

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.listing().await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.listing().await }
        });
        settle().await;
        store.set_gate(true);

        assert!(matches!(
            first.await.unwrap(),
            Err(StoreError::BackendUnavailable(_))
        ));
        assert!(matches!(
            second.await.unwrap(),
            Err(StoreError::BackendUnavailable(_))
        ));
        assert_eq!(store.list_calls(), 1);

        let listing = cache.listing().await.unwrap();
        assert_eq!(names(&listing), ["blob", "parrot"]);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_over() {
        let (store, cache) = gated();
        store.set_gate(false);

        let leader = tokio::spawn({
            let cache = cache.clone();
            async move { cache.listing().await }
        });
        settle().await;
        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.listing().await }
        });
        settle().await;

        leader.abort();
        let _ = leader.await;
        settle().await;
        store.set_gate(true);

        let listing = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(names(&listing), ["blob", "parrot"]);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_record_serves_snapshot_and_refreshes_once() {
        let (store, cache) = gated();
        cache.listing().await.unwrap();

        let entry = store
            .create("fresh", GIF.to_vec(), MediaType::Gif)
            .await
            .unwrap();
        store.set_gate(false);
        cache.record(Mutation::Insert(entry));
        cache.record(Mutation::Remove("blob".into()));

        let listing = cache.listing().await.unwrap();
        assert_eq!(names(&listing), ["fresh", "parrot"]);
        let listing = cache.listing().await.unwrap();
        assert_eq!(names(&listing), ["fresh", "parrot"]);

        settle().await;
        assert_eq!(store.list_calls(), 2);

        store.set_gate(true);
        settle().await;
        assert_eq!(names(&cache.peek().unwrap()), ["blob", "fresh", "parrot"]);
    }

    #[tokio::test]
    async fn test_mutations_during_load_are_replayed() {
        let (store, cache) = gated();
        store.set_gate(false);

        let load = tokio::spawn({
            let cache = cache.clone();
            async move { cache.listing().await }
        });
        settle().await;

        cache.record(Mutation::Remove("parrot".into()));
        store.set_gate(true);

        let listing = load.await.unwrap().unwrap();
        assert_eq!(names(&listing), ["blob"]);
        assert_eq!(names(&cache.peek().unwrap()), ["blob"]);
    }

    #[tokio::test]
    async fn test_size_update_keeps_ready() {
        let (store, cache) = gated();
        cache.listing().await.unwrap();

        cache.record(Mutation::Size {
            name: "parrot".into(),
            size: 42,
        });
        let listing = cache.listing().await.unwrap();

        assert_eq!(listing.get("parrot").unwrap().size, Some(42));
        settle().await;
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_reported_once() {
        let (store, cache) = gated();
        cache.listing().await.unwrap();
        cache.record(Mutation::Remove("blob".into()));
        store.fail_next_list();

        let listing = cache.listing().await.unwrap();
        assert_eq!(names(&listing), ["parrot"]);
        settle().await;

        assert!(matches!(
            cache.listing().await,
            Err(StoreError::BackendUnavailable(_))
        ));
        assert_eq!(names(&cache.peek().unwrap()), ["parrot"]);

        let listing = cache.listing().await.unwrap();
        assert_eq!(names(&listing), ["parrot"]);
        settle().await;
        assert_eq!(store.list_calls(), 3);
        assert_eq!(names(&cache.peek().unwrap()), ["blob", "parrot"]);
    }

    #[tokio::test]
    async fn test_invalidate_refetches() {
        let (store, cache) = gated();
        cache.listing().await.unwrap();

        cache.invalidate();
        assert!(cache.peek().is_none());
        cache.listing().await.unwrap();

        assert_eq!(store.list_calls(), 2);
    }
}
