//! Mapping between the file names callers see and canonical emoji names.
//!
//! An emoji's identity is its canonical name; the extension is only added
//! when rendering it as a file, based on its media type. Lookups accept the
//! rendered name as well as the bare name, so `parrot` and `parrot.gif` both
//! reach the emoji `parrot`.

use super::{Error, cache::Listing, path::FileName};
use crate::store::{EmojiEntry, MediaType};

/// The media type an entry renders with. Aliases borrow their target's.
pub fn media_type_of(entry: &EmojiEntry, listing: &Listing) -> Option<MediaType> {
    entry.media_type.or_else(|| {
        entry
            .alias_for
            .as_deref()
            .and_then(|target| listing.get(target))
            .and_then(|target| target.media_type)
    })
}

/// The file name an entry is listed under.
///
/// No two entries of a listing render alike: a name that already ends in its
/// extension gets it doubled when its base entry renders to that name.
pub fn render(entry: &EmojiEntry, listing: &Listing) -> String {
    let name = &entry.name;
    let own_extension = name.rsplit_once('.');
    let own_media_type =
        own_extension.and_then(|(_, extension)| MediaType::from_extension(extension));

    match media_type_of(entry, listing) {
        Some(media_type) if own_media_type != Some(media_type) => {
            return format!("{name}.{}", media_type.extension());
        }
        _ => {}
    }

    match own_extension {
        Some((base, extension))
            if listing
                .get(base)
                .is_some_and(|base| render(base, listing) == *name) =>
        {
            format!("{name}.{extension}")
        }
        _ => name.clone(),
    }
}

/// Finds the entry a file name refers to.
///
/// Returns `Ok(None)` when nothing matches and [`Error::AmbiguousName`] when a
/// bare name could mean more than one entry. Nothing is picked by priority
/// between equally good candidates.
pub fn resolve<'a>(file: &FileName, listing: &'a Listing) -> Result<Option<&'a EmojiEntry>, Error> {
    let raw = file.raw();

    let rendered: Vec<_> = listing
        .iter()
        .filter(|entry| render(entry, listing) == raw)
        .collect();
    if let Some(entry) = single(raw, rendered)? {
        return Ok(Some(entry));
    }

    if let Some(entry) = listing.get(raw) {
        return Ok(Some(entry));
    }

    if file.media_type().is_some() {
        return Ok(listing.get(file.base()));
    }

    let variants: Vec<_> = listing
        .iter()
        .filter(|entry| {
            render(entry, listing)
                .strip_prefix(raw)
                .and_then(|rest| rest.strip_prefix('.'))
                .and_then(MediaType::from_extension)
                .is_some()
        })
        .collect();
    single(raw, variants)
}

fn single<'a>(
    raw: &str,
    candidates: Vec<&'a EmojiEntry>,
) -> Result<Option<&'a EmojiEntry>, Error> {
    match candidates.as_slice() {
        [] => Ok(None),
        [entry] => Ok(Some(*entry)),
        _ => Err(Error::AmbiguousName {
            name: raw.to_owned(),
            candidates: candidates
                .iter()
                .map(|entry| entry.name.clone())
                .collect(),
        }),
    }
}
