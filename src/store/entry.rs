use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The image formats chat platforms accept for custom emoji.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Gif,
    Png,
    Jpeg,
}

impl MediaType {
    /// The extension used when rendering an entry of this type as a file.
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Gif => "gif",
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
        }
    }

    /// Parses a file extension, ignoring ASCII case. Both `jpg` and `jpeg`
    /// are accepted for JPEG.
    pub fn from_extension(extension: &str) -> Option<Self> {
        if extension.eq_ignore_ascii_case("gif") {
            Some(MediaType::Gif)
        } else if extension.eq_ignore_ascii_case("png") {
            Some(MediaType::Png)
        } else if extension.eq_ignore_ascii_case("jpg") || extension.eq_ignore_ascii_case("jpeg")
        {
            Some(MediaType::Jpeg)
        } else {
            None
        }
    }

    /// Parses the subtype of an `image/*` MIME type, e.g. `png` or `jpeg`.
    fn from_image_subtype(subtype: &str) -> Option<Self> {
        Self::from_extension(subtype)
    }

    /// Infers the media type from the locator a platform serves an emoji
    /// from.
    ///
    /// Two shapes are understood: `http(s)` URLs whose path ends in a known
    /// extension, and `data:image/<subtype>;...` URLs. Anything else (such as
    /// Slack's `alias:` pseudo-URLs) yields [`None`].
    pub fn from_locator(locator: &str) -> Option<Self> {
        if let Some(rest) = locator.strip_prefix("data:image/") {
            let subtype = rest.split([';', ',']).next()?;
            return Self::from_image_subtype(subtype);
        }

        if !(locator.starts_with("http://") || locator.starts_with("https://")) {
            return None;
        }

        let path = locator.split(['?', '#']).next()?;
        let last_segment = path.rsplit('/').next()?;
        let (_, extension) = last_segment.rsplit_once('.')?;

        Self::from_extension(extension)
    }

    /// Identifies image content by its magic bytes.
    pub fn sniff(content: &[u8]) -> Option<Self> {
        const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
        const JPEG_SIGNATURE: &[u8] = b"\xff\xd8\xff";

        if content.starts_with(b"GIF87a") || content.starts_with(b"GIF89a") {
            Some(MediaType::Gif)
        } else if content.starts_with(PNG_SIGNATURE) {
            Some(MediaType::Png)
        } else if content.starts_with(JPEG_SIGNATURE) {
            Some(MediaType::Jpeg)
        } else {
            None
        }
    }
}

/// One custom emoji as a store knows it.
///
/// `name` is canonical within its store and unique within one listing, but
/// nothing is assumed about uniqueness across stores or platforms. An entry
/// with `alias_for` set points at another entry's bytes instead of owning its
/// own; for those, `media_type` and `size` are usually unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiEntry {
    pub name: String,
    pub media_type: Option<MediaType>,
    /// URL or opaque reference the store fetches the bytes from.
    pub source: String,
    pub size: Option<u64>,
    pub alias_for: Option<String>,
    pub created: Option<SystemTime>,
    pub created_by: Option<String>,
}

impl EmojiEntry {
    pub fn new(name: impl Into<String>, media_type: MediaType, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: Some(media_type),
            source: source.into(),
            size: None,
            alias_for: None,
            created: None,
            created_by: None,
        }
    }

    pub fn alias(
        name: impl Into<String>,
        target: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            source: source.into(),
            size: None,
            alias_for: Some(target.into()),
            created: None,
            created_by: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: SystemTime) -> Self {
        self.created = Some(created);
        self
    }

    pub fn is_alias(&self) -> bool {
        self.alias_for.is_some()
    }
}
