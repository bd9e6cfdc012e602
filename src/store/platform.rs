use std::{borrow::Cow, str::FromStr};

use derive_more::Display;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The chat service a store belongs to, e.g. `slack` or `discord`.
///
/// Platform names become the first path component under the mount, so they
/// can be any non-empty string without a `/`. New platforms don't need a new
/// variant here; the constants are only the ones the crate knows about.
#[derive(
    Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct Platform(Cow<'static, str>);

impl Platform {
    pub const SLACK: Platform = Platform(Cow::Borrowed("slack"));
    pub const DISCORD: Platform = Platform(Cow::Borrowed("discord"));
    pub const LOCAL: Platform = Platform(Cow::Borrowed("local"));

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformParseError {
    #[error("platform name is empty")]
    Empty,
    #[error("platform name {0:?} is not a single path component")]
    NotAComponent(String),
}

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Platform {
    type Error = PlatformParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(PlatformParseError::Empty);
        }
        if value.contains('/') || value == "." || value == ".." {
            return Err(PlatformParseError::NotAComponent(value));
        }

        Ok(Platform(Cow::Owned(value)))
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.0.into_owned()
    }
}

impl AsRef<str> for Platform {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
