use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use figment::{
    Figment, Provider,
    providers::{Env, Format, Toml},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tracing::{Level, event};

use crate::{
    store::{LocalDirStore, Platform},
    vfs::{Namespace, RenameMap},
};

pub const DEFAULT_CONFIG_FILE: &str = "emojifs.toml";
pub const ENV_PREFIX: &str = "EMOJIFS_";

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct MountConfig {
    /// Where the filesystem is mounted on the host. Host paths under it are
    /// accepted wherever a virtual path is.
    #[schemars(with = "Option<String>")]
    pub mountpoint: Option<Utf8PathBuf>,
}

#[serde_inline_default]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct LocalConfig {
    #[serde_inline_default(false)]
    /// Refuse creates and deletes in every local store.
    pub read_only: bool,

    #[serde(default)]
    #[schemars(with = "BTreeMap<String, String>")]
    /// Local stores, as store id to image directory.
    pub stores: BTreeMap<String, Utf8PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            read_only: false,
            stores: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub emojifs: MountConfig,

    #[serde(default)]
    /// Display names for stores, per platform, as store id to display name.
    pub renames: BTreeMap<Platform, BTreeMap<String, String>>,

    #[serde(default)]
    pub local: LocalConfig,
}

impl Config {
    /// Loads `path`, or `emojifs.toml` in the working directory if it exists,
    /// with `EMOJIFS_` environment variables layered on top.
    pub fn load(path: Option<&Utf8Path>) -> Result<Config> {
        let file = match path {
            Some(path) => Toml::file_exact(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        Self::from_providers(file, Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_providers(file: impl Provider, env: impl Provider) -> Result<Config> {
        let config: Config = Figment::new().merge(file).merge(env).extract()?;

        Ok(config)
    }

    pub fn rename_map(&self) -> RenameMap {
        self.renames
            .iter()
            .flat_map(|(platform, renames)| {
                renames
                    .iter()
                    .map(move |(store_id, display_name)| (platform, store_id, display_name))
            })
            .fold(RenameMap::new(), |map, (platform, store_id, display_name)| {
                map.rename(platform.clone(), store_id.as_str(), display_name)
            })
    }

    /// Builds the namespace of every store this configuration describes.
    pub fn namespace(&self) -> Result<Namespace> {
        let mut builder = Namespace::builder(self.rename_map());

        for (store_id, path) in &self.local.stores {
            let store = LocalDirStore::new(path.clone())
                .with_context(|| format!("failed to open local store {store_id} at {path}"))?
                .read_only(self.local.read_only);

            event!(Level::DEBUG, %store_id, %path, "opened local store");
            builder = builder.store(Platform::LOCAL, store_id.as_str(), Arc::new(store));
        }

        Ok(builder.build())
    }
}
