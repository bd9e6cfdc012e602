use std::{collections::BTreeMap, sync::Arc};

use camino::Utf8Path;
use derive_more::Debug;
use tracing::{Level, event};

use super::{
    Error, RenameMap,
    cache::DirectoryCache,
    path::{FileName, VirtualPath},
};
use crate::store::{EmojiStore, Platform, StoreCapabilities};

/// One store as it appears in the namespace.
#[derive(Debug)]
pub struct StoreMount {
    pub platform: Platform,
    pub store_id: String,
    /// The directory name under `/<platform>`.
    pub display_name: String,
    #[debug(skip)]
    pub store: Arc<dyn EmojiStore>,
    #[debug(skip)]
    pub cache: Arc<DirectoryCache>,
}

impl StoreMount {
    pub fn capabilities(&self) -> StoreCapabilities {
        self.store.capabilities()
    }

    pub fn is_writable(&self) -> bool {
        self.capabilities().contains(StoreCapabilities::WRITE)
    }

    /// `<platform>/<store id>`, for logs and metrics.
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.store_id)
    }

    /// The absolute virtual path of the store directory.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.platform, self.display_name)
    }
}

/// Where a virtual path lands.
#[derive(Debug, Clone)]
pub enum Location {
    Root,
    Platform(Platform),
    Store(Arc<StoreMount>),
    Entry {
        mount: Arc<StoreMount>,
        file: FileName,
    },
}

/// The fixed `/<platform>/<store>` hierarchy.
///
/// Built once from the discovered stores and never changed afterwards, so it
/// can be shared without locking.
#[derive(Debug)]
pub struct Namespace {
    platforms: BTreeMap<Platform, BTreeMap<String, Arc<StoreMount>>>,
    renames: RenameMap,
}

impl Namespace {
    pub fn builder(renames: RenameMap) -> NamespaceBuilder {
        NamespaceBuilder::new(renames)
    }

    pub fn resolve(&self, path: &Utf8Path) -> Result<Location, Error> {
        let not_found = || Error::NotFound(path.to_string());

        match VirtualPath::parse(path)? {
            VirtualPath::Root => Ok(Location::Root),
            VirtualPath::Platform(platform) => {
                if self.platforms.contains_key(&platform) {
                    Ok(Location::Platform(platform))
                } else {
                    Err(not_found())
                }
            }
            VirtualPath::Store { platform, store } => self
                .mount(&platform, &store)
                .map(|mount| Location::Store(mount.clone()))
                .ok_or_else(not_found),
            VirtualPath::Entry {
                platform,
                store,
                file,
            } => self
                .mount(&platform, &store)
                .map(|mount| Location::Entry {
                    mount: mount.clone(),
                    file,
                })
                .ok_or_else(not_found),
        }
    }

    /// Looks a store up by the directory name it is mounted under.
    pub fn mount(&self, platform: &Platform, display_name: &str) -> Option<&Arc<StoreMount>> {
        self.platforms.get(platform)?.get(display_name)
    }

    /// Looks a store up by its true id.
    pub fn mount_by_id(&self, platform: &Platform, store_id: &str) -> Option<&Arc<StoreMount>> {
        self.mount(platform, &self.renames.display_name(platform, store_id))
            .filter(|mount| mount.store_id == store_id)
    }

    /// Platforms with at least one store, in name order.
    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.keys()
    }

    /// The stores of one platform, in display-name order.
    pub fn stores(&self, platform: &Platform) -> impl Iterator<Item = &Arc<StoreMount>> {
        self.platforms
            .get(platform)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    pub fn mounts(&self) -> impl Iterator<Item = &Arc<StoreMount>> {
        self.platforms.values().flat_map(BTreeMap::values)
    }
}

/// Collects discovered stores into a [`Namespace`].
pub struct NamespaceBuilder {
    renames: RenameMap,
    stores: Vec<(Platform, String, Arc<dyn EmojiStore>)>,
}

impl NamespaceBuilder {
    pub fn new(renames: RenameMap) -> Self {
        Self {
            renames,
            stores: Vec::new(),
        }
    }

    /// Registers a store under `platform`.
    #[must_use]
    pub fn store(
        mut self,
        platform: Platform,
        store_id: impl Into<String>,
        store: Arc<dyn EmojiStore>,
    ) -> Self {
        self.stores.push((platform, store_id.into(), store));
        self
    }

    /// Builds the namespace.
    ///
    /// Each store is mounted under its display name. A display name that a
    /// rename reserves for a different store, or that an earlier store
    /// already took, leaves the later store unmounted with a warning.
    pub fn build(self) -> Namespace {
        let mut platforms: BTreeMap<Platform, BTreeMap<String, Arc<StoreMount>>> = BTreeMap::new();

        for (platform, store_id, store) in self.stores {
            let display_name = self.renames.display_name(&platform, &store_id);

            if let Some(owner) = self.renames.store_id(&platform, &display_name) {
                if owner != store_id {
                    event!(
                        Level::WARN,
                        %platform,
                        %store_id,
                        %display_name,
                        owner,
                        "display name is reserved for another store, not mounting"
                    );
                    continue;
                }
            }

            let stores = platforms.entry(platform.clone()).or_default();
            if let Some(existing) = stores.get(&display_name) {
                event!(
                    Level::WARN,
                    %platform,
                    %store_id,
                    %display_name,
                    existing = %existing.store_id,
                    "display name already mounted, not mounting"
                );
                continue;
            }

            event!(Level::INFO, %platform, %store_id, %display_name, "mounted store");
            let cache = DirectoryCache::new(store.clone(), format!("{platform}/{store_id}"));
            stores.insert(
                display_name.clone(),
                Arc::new(StoreMount {
                    platform,
                    store_id,
                    display_name,
                    store,
                    cache,
                }),
            );
        }

        Namespace {
            platforms,
            renames: self.renames,
        }
    }
}
