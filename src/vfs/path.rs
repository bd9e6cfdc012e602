use std::fmt::{Display, Formatter};

use camino::{Utf8Component, Utf8Path};

use super::Error;
use crate::store::{MediaType, Platform};

/// A file name as the caller wrote it, split into base and extension.
///
/// The extension is whatever follows the last dot, so `parrot.gif` has
/// extension `gif` and `thing.txt` has extension `txt`. A name that starts
/// with its only dot (`.gif`) has no extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    raw: String,
    base: String,
    extension: Option<String>,
}

impl FileName {
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('.') {
            Some((base, extension)) if !base.is_empty() && !extension.is_empty() => FileName {
                raw: raw.to_owned(),
                base: base.to_owned(),
                extension: Some(extension.to_owned()),
            },
            _ => FileName {
                raw: raw.to_owned(),
                base: raw.to_owned(),
                extension: None,
            },
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// The media type named by the extension, if it names one.
    pub fn media_type(&self) -> Option<MediaType> {
        self.extension().and_then(MediaType::from_extension)
    }
}

/// A parsed path inside the emoji namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualPath {
    Root,
    Platform(Platform),
    Store {
        platform: Platform,
        store: String,
    },
    Entry {
        platform: Platform,
        store: String,
        file: FileName,
    },
}

impl VirtualPath {
    /// Parses an absolute path, resolving `.` and `..` lexically.
    ///
    /// Nothing exists deeper than `/<platform>/<store>/<file>`, so longer
    /// paths are [`Error::NotFound`].
    pub fn parse(path: &Utf8Path) -> Result<Self, Error> {
        if !path.is_absolute() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let mut segments: Vec<&str> = Vec::new();
        for component in path.components() {
            match component {
                Utf8Component::RootDir | Utf8Component::CurDir => {}
                Utf8Component::ParentDir => {
                    segments.pop();
                }
                Utf8Component::Normal(segment) => segments.push(segment),
                Utf8Component::Prefix(_) => return Err(Error::InvalidPath(path.to_string())),
            }
        }

        let not_found = || Error::NotFound(path.to_string());
        let platform = |segment: &str| segment.parse::<Platform>().map_err(|_| not_found());

        match segments.as_slice() {
            [] => Ok(VirtualPath::Root),
            [p] => Ok(VirtualPath::Platform(platform(*p)?)),
            [p, store] => Ok(VirtualPath::Store {
                platform: platform(*p)?,
                store: (*store).to_owned(),
            }),
            [p, store, file] => Ok(VirtualPath::Entry {
                platform: platform(*p)?,
                store: (*store).to_owned(),
                file: FileName::parse(file),
            }),
            _ => Err(not_found()),
        }
    }
}

impl Display for VirtualPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VirtualPath::Root => write!(f, "/"),
            VirtualPath::Platform(platform) => write!(f, "/{platform}"),
            VirtualPath::Store { platform, store } => write!(f, "/{platform}/{store}"),
            VirtualPath::Entry {
                platform,
                store,
                file,
            } => write!(f, "/{platform}/{store}/{}", file.raw),
        }
    }
}
