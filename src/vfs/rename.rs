use std::collections::BTreeMap;

use tracing::{Level, event};

use crate::store::Platform;

/// Operator-chosen display names for stores, per platform.
///
/// Maps a store's true id (e.g. a long workspace domain) to the directory
/// name it is mounted under, and back. Fixed once built.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    to_display: BTreeMap<Platform, BTreeMap<String, String>>,
    to_store: BTreeMap<Platform, BTreeMap<String, String>>,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rename. A display name already claimed by another store on the
    /// same platform is ignored with a warning; the first rename wins.
    #[must_use]
    pub fn rename(
        mut self,
        platform: Platform,
        store_id: impl Into<String>,
        display_name: impl AsRef<str>,
    ) -> Self {
        let store_id = store_id.into();
        let display_name = sanitize(display_name.as_ref());

        let to_store = self.to_store.entry(platform.clone()).or_default();
        if let Some(existing) = to_store.get(&display_name) {
            if *existing != store_id {
                event!(
                    Level::WARN,
                    %platform,
                    %store_id,
                    %display_name,
                    %existing,
                    "display name already taken, ignoring rename"
                );
            }
            return self;
        }

        let to_display = self.to_display.entry(platform).or_default();
        if to_display.contains_key(&store_id) {
            event!(
                Level::WARN,
                %store_id,
                %display_name,
                "store renamed twice, keeping first"
            );
            return self;
        }

        to_store.insert(display_name.clone(), store_id.clone());
        to_display.insert(store_id, display_name);
        self
    }

    /// The directory name a store is listed under.
    pub fn display_name(&self, platform: &Platform, store_id: &str) -> String {
        self.to_display
            .get(platform)
            .and_then(|renames| renames.get(store_id))
            .cloned()
            .unwrap_or_else(|| sanitize(store_id))
    }

    /// The store id behind a renamed display name.
    ///
    /// Only explicit renames are reversed; an unrenamed store's display name
    /// is its (sanitized) id and isn't recorded here.
    pub fn store_id(&self, platform: &Platform, display_name: &str) -> Option<&str> {
        self.to_store
            .get(platform)
            .and_then(|renames| renames.get(display_name))
            .map(String::as_str)
    }
}

/// Makes a store id or display name usable as a single path component.
fn sanitize(name: &str) -> String {
    let name = name.replace('/', "_");

    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}
