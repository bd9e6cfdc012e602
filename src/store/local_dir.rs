use std::{collections::BTreeMap, io, io::Write, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_fs_ext::DirExtUtf8;
use cap_std::{
    ambient_authority,
    fs::OpenOptions,
    fs_utf8::{Dir, DirEntry, File},
};
use tracing::{Level, event, instrument};

use super::{EmojiEntry, EmojiStore, MediaType, StoreCapabilities, StoreError};

/// An emoji store backed by a directory of image files.
///
/// Each regular file whose extension names a known image type is one emoji,
/// named by its file stem. When two files share a stem (`parrot.gif` and
/// `parrot.png`) the first in sorted order keeps the stem and the rest are
/// named by their full file name. Symbolic links are aliases for the file
/// they point at, and hidden files are ignored.
pub struct LocalDirStore {
    root_path: Utf8PathBuf,
    root_dir: Arc<Dir>,
    read_only: bool,
}

#[derive(Debug, Clone)]
enum FileKind {
    Image(MediaType),
    Link(Utf8PathBuf),
}

#[derive(Debug, Clone)]
struct LocalFile {
    file_name: String,
    kind: FileKind,
    size: u64,
    created: Option<SystemTime>,
}

/// Emoji name to file, as the directory looked when it was scanned.
#[derive(Debug, Default)]
struct Scan {
    by_name: BTreeMap<String, LocalFile>,
    by_file_name: BTreeMap<String, String>,
}

impl Scan {
    fn read(dir: &Dir) -> Result<Self, StoreError> {
        let mut files = Vec::new();

        for entry in dir
            .entries()
            .map_err(|e| StoreError::io_error(e, "couldn't get directory entries"))?
        {
            let entry =
                entry.map_err(|e| StoreError::io_error(e, "couldn't get directory entry"))?;
            if let Some(file) = LocalFile::from_entry(dir, &entry)? {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        let mut scan = Scan::default();
        for file in files {
            let stem = match file.file_name.rsplit_once('.') {
                Some((stem, extension))
                    if !stem.is_empty() && MediaType::from_extension(extension).is_some() =>
                {
                    stem.to_owned()
                }
                _ => file.file_name.clone(),
            };
            let name = if scan.by_name.contains_key(&stem) {
                file.file_name.clone()
            } else {
                stem
            };

            scan.by_file_name
                .insert(file.file_name.clone(), name.clone());
            scan.by_name.insert(name, file);
        }

        Ok(scan)
    }

    fn get(&self, name: &str) -> Result<&LocalFile, StoreError> {
        self.by_name
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }

    /// The emoji name a symlink's contents refer to, if it stays inside the
    /// store directory.
    fn link_target(&self, contents: &Utf8Path) -> Option<&String> {
        let mut components = contents.components();
        let only = components.next()?;
        if components.next().is_some() {
            return None;
        }

        self.by_file_name.get(only.as_str())
    }

    fn entry(&self, root_path: &Utf8Path, name: &str, file: &LocalFile) -> EmojiEntry {
        let source = format!("file://{root_path}/{}", file.file_name);

        let entry = match &file.kind {
            FileKind::Image(media_type) => {
                EmojiEntry::new(name, *media_type, source).with_size(file.size)
            }
            FileKind::Link(contents) => {
                let target = self
                    .link_target(contents)
                    .cloned()
                    .unwrap_or_else(|| contents.file_stem().unwrap_or(contents.as_str()).into());
                EmojiEntry::alias(name, target, source)
            }
        };

        match file.created {
            Some(created) => entry.with_created(created),
            None => entry,
        }
    }
}

impl LocalFile {
    fn from_entry(dir: &Dir, entry: &DirEntry) -> Result<Option<Self>, StoreError> {
        let file_name = entry
            .file_name()
            .map_err(|e| StoreError::io_error(e, "couldn't get file name"))?;
        if file_name.starts_with('.') {
            return Ok(None);
        }

        let file_type = entry
            .file_type()
            .map_err(|e| StoreError::io_error(e, format!("couldn't get file type of {file_name}")))?;
        let metadata = dir
            .symlink_metadata(&file_name)
            .map_err(|e| StoreError::io_error(e, format!("couldn't get metadata of {file_name}")))?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(|time| time.into_std());

        let kind = if file_type.is_symlink() {
            let contents = dir
                .read_link_contents(&file_name)
                .map_err(|e| StoreError::io_error(e, format!("couldn't read symlink {file_name}")))?;
            FileKind::Link(contents)
        } else if file_type.is_file() {
            let media_type = file_name
                .rsplit_once('.')
                .and_then(|(_, extension)| MediaType::from_extension(extension));
            match media_type {
                Some(media_type) => FileKind::Image(media_type),
                None => {
                    event!(Level::TRACE, %file_name, "skipping file with unknown type");
                    return Ok(None);
                }
            }
        } else {
            return Ok(None);
        };

        Ok(Some(LocalFile {
            file_name,
            kind,
            size: metadata.len(),
            created,
        }))
    }
}

fn map_io_error(err: io::Error, name: &str, from: String) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(name.to_owned()),
        io::ErrorKind::AlreadyExists => StoreError::NameConflict(name.to_owned()),
        _ => StoreError::io_error(err, from),
    }
}

async fn run_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        }

        panic!("task failed: {e}");
    })
}

impl LocalDirStore {
    pub fn new(root_path: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root_path = root_path.into();
        let root_dir = Arc::new(
            Dir::open_ambient_dir(&root_path, ambient_authority())
                .map_err(|e| StoreError::io_error(e, format!("failed to open {root_path}")))?,
        );

        Ok(Self {
            root_path,
            root_dir,
            read_only: false,
        })
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            Err(StoreError::Unsupported("writes"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EmojiStore for LocalDirStore {
    fn capabilities(&self) -> StoreCapabilities {
        if self.read_only {
            StoreCapabilities::empty()
        } else {
            StoreCapabilities::WRITE | StoreCapabilities::ALIAS
        }
    }

    #[instrument(skip(self), fields(root = %self.root_path))]
    async fn list(&self) -> Result<Vec<EmojiEntry>, StoreError> {
        let root_dir = self.root_dir.clone();
        let root_path = self.root_path.clone();

        run_blocking(move || {
            let scan = Scan::read(&root_dir)?;
            Ok(scan
                .by_name
                .iter()
                .map(|(name, file)| scan.entry(&root_path, name, file))
                .collect())
        })
        .await
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let root_dir = self.root_dir.clone();
        let name = name.to_owned();

        run_blocking(move || {
            let scan = Scan::read(&root_dir)?;
            let file = scan.get(&name)?;

            let file_name = match &file.kind {
                FileKind::Image(_) => &file.file_name,
                FileKind::Link(contents) => {
                    let target = scan.link_target(contents).and_then(|target| {
                        scan.by_name
                            .get(target)
                            .filter(|file| matches!(file.kind, FileKind::Image(_)))
                    });
                    match target {
                        Some(target) => &target.file_name,
                        None => {
                            return Err(StoreError::IsAlias {
                                name: name.clone(),
                                target: contents.to_string(),
                            });
                        }
                    }
                }
            };

            root_dir
                .read(file_name)
                .map_err(|e| map_io_error(e, &name, format!("failed to read {file_name}")))
        })
        .await
    }

    #[instrument(skip(self, content), fields(root = %self.root_path, size = content.len()))]
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
        if name.is_empty() || name.starts_with('.') || name.contains('/') {
            return Err(StoreError::InvalidContent(format!(
                "{name:?} is not a valid emoji name"
            )));
        }

        let root_dir = self.root_dir.clone();
        let root_path = self.root_path.clone();
        let name = name.to_owned();

        run_blocking(move || {
            if Scan::read(&root_dir)?.by_name.contains_key(&name) {
                return Err(StoreError::NameConflict(name));
            }

            let file_name = format!("{name}.{}", media_type.extension());
            let file = root_dir
                .open_with(&file_name, OpenOptions::new().write(true).create_new(true))
                .map_err(|e| map_io_error(e, &name, format!("failed to create {file_name}")))?;
            fill_or_remove(&root_dir, &file_name, file, |file| {
                file.write_all(&content).and_then(|()| file.sync_all())
            })
            .map_err(|e| StoreError::io_error(e, format!("failed to write {file_name}")))?;

            event!(Level::DEBUG, %file_name, "wrote emoji");

            Ok(EmojiEntry::new(
                name,
                media_type,
                format!("file://{root_path}/{file_name}"),
            )
            .with_size(content.len() as u64)
            .with_created(SystemTime::now()))
        })
        .await
    }

    #[instrument(skip(self), fields(root = %self.root_path))]
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;

        let root_dir = self.root_dir.clone();
        let name = name.to_owned();

        run_blocking(move || {
            let scan = Scan::read(&root_dir)?;
            let file_name = &scan.get(&name)?.file_name;

            root_dir
                .remove_file(file_name)
                .map_err(|e| map_io_error(e, &name, format!("failed to remove {file_name}")))
        })
        .await
    }

    #[instrument(skip(self), fields(root = %self.root_path))]
    async fn create_alias(&self, name: &str, target: &str) -> Result<EmojiEntry, StoreError> {
        self.ensure_writable()?;

        let root_dir = self.root_dir.clone();
        let root_path = self.root_path.clone();
        let name = name.to_owned();
        let target = target.to_owned();

        run_blocking(move || {
            let scan = Scan::read(&root_dir)?;
            if scan.by_name.contains_key(&name) {
                return Err(StoreError::NameConflict(name));
            }

            let target_file = scan.get(&target)?;
            let FileKind::Image(media_type) = target_file.kind else {
                return Err(StoreError::IsAlias {
                    name: target.clone(),
                    target: target_file.file_name.clone(),
                });
            };

            let link_name = format!("{name}.{}", media_type.extension());
            root_dir
                .symlink(&target_file.file_name, &link_name)
                .map_err(|e| map_io_error(e, &name, format!("failed to link {link_name}")))?;

            Ok(EmojiEntry::alias(
                name,
                target,
                format!("file://{root_path}/{link_name}"),
            )
            .with_created(SystemTime::now()))
        })
        .await
    }
}

/// Fills a newly created file, removing it again if that fails so a partial
/// image is never listed.
fn fill_or_remove(
    dir: &Dir,
    file_name: &str,
    mut file: File,
    fill: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let filled = fill(&mut file);
    drop(file);

    if filled.is_err() {
        if let Err(e) = dir.remove_file(file_name) {
            event!(Level::WARN, %file_name, error = %e, "failed to remove partial file");
        }
    }
    filled
}
