use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tracing::{Level, event, instrument};
use whirlwind::ShardMap;

use super::{
    Error, Handle, HandleType, IntoBackend, Metadata, OpenFlags, Vfs,
    cache::{Mutation, Snapshot},
    names,
    namespace::{Location, Namespace, StoreMount},
    path::FileName,
};
use crate::{
    metrics::{STORE_CREATES, STORE_DELETES, STORE_FETCHES},
    store::{EmojiEntry, MediaType, StoreCapabilities},
};

const DIR_PERMISSIONS: u32 = 0o555;
const WRITABLE_DIR_PERMISSIONS: u32 = 0o755;
const ENTRY_PERMISSIONS: u32 = 0o444;
const PENDING_PERMISSIONS: u32 = 0o600;

/// The largest file a write buffer may grow to.
pub const MAX_EMOJI_SIZE: usize = 8 << 20;

pub const XATTR_URL: &str = "user.url";
pub const XATTR_CREATED_BY: &str = "user.created_by";

/// An emoji that is being written. Nothing reaches the store until close.
struct WriteBuffer {
    path: String,
    mount: Arc<StoreMount>,
    name: String,
    media_type: Option<MediaType>,
    pending_key: String,
    append: bool,
    content: Vec<u8>,
}

enum OpenFile {
    Read {
        content: Vec<u8>,
        metadata: Metadata,
    },
    Write(Mutex<WriteBuffer>),
}

/// The emoji namespace as a filesystem.
///
/// Paths are routed through the [`Namespace`], names resolved against each
/// store's cached listing, and reads, writes and deletes turned into store
/// calls. Writes are buffered in memory and become a single `create()` on
/// close; nothing is ever overwritten in place.
pub struct EmojiFs {
    namespace: Namespace,
    next_handle: AtomicU64,
    open_files: ShardMap<Handle, Arc<OpenFile>, ahash::RandomState>,
    /// Emoji being written, by store and name, so a second writer can't race
    /// the first one to `create()`.
    pending: Mutex<ahash::HashMap<String, Handle>>,
}

/// Releases a pending name when dropped.
struct Reservation<'a> {
    pending: &'a Mutex<ahash::HashMap<String, Handle>>,
    key: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

fn pending_key(mount: &StoreMount, name: &str) -> String {
    format!("{}/{}/{name}", mount.platform, mount.store_id)
}

fn entry_path(mount: &StoreMount, file: &FileName) -> String {
    format!("{}/{}", mount.path(), file.raw())
}

fn store_dir_metadata(mount: &StoreMount) -> Metadata {
    let permissions = if mount.is_writable() {
        WRITABLE_DIR_PERMISSIONS
    } else {
        DIR_PERMISSIONS
    };
    let (ctime, mtime) = mount
        .cache
        .peek()
        .and_then(|listing| listing.created_range())
        .map_or((None, None), |(oldest, newest)| (Some(oldest), Some(newest)));

    Metadata::directory(permissions).with_times(mtime, ctime)
}

fn entry_metadata(entry: &EmojiEntry) -> Metadata {
    let metadata = if entry.is_alias() {
        Metadata::symlink(ENTRY_PERMISSIONS)
    } else {
        Metadata::file(ENTRY_PERMISSIONS, entry.size)
    };

    metadata.with_times(entry.created, entry.created)
}

/// The canonical name and media type a new file should be created with.
fn creation_name(file: &FileName) -> Result<(String, Option<MediaType>), Error> {
    match (file.extension(), file.media_type()) {
        (None, _) => Ok((file.raw().to_owned(), None)),
        (Some(_), Some(media_type)) => Ok((file.base().to_owned(), Some(media_type))),
        (Some(_), None) => Err(Error::InvalidName(file.raw().to_owned())),
    }
}

impl EmojiFs {
    pub fn new(namespace: Namespace) -> Self {
        EmojiFs {
            namespace,
            next_handle: AtomicU64::new(1),
            open_files: ShardMap::with_hasher(ahash::RandomState::default()),
            pending: Mutex::new(ahash::HashMap::default()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Forgets every cached listing, so each store is listed afresh on its
    /// next access.
    pub fn invalidate_all(&self) {
        for mount in self.namespace.mounts() {
            mount.cache.invalidate();
        }
        event!(Level::INFO, "invalidated all store listings");
    }

    fn allocate_handle(&self, handle_ty: HandleType) -> Handle {
        Handle::new(handle_ty, self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    async fn open_file(&self, handle: &Handle) -> Result<Arc<OpenFile>, Error> {
        self.open_files
            .get(handle)
            .await
            .map(|file| file.value().clone())
            .ok_or(Error::BadHandle)
    }

    async fn listing(&self, mount: &StoreMount) -> Result<Snapshot, Error> {
        mount
            .cache
            .listing()
            .await
            .into_backend(format!("failed to list {}", mount.path()))
    }

    /// Resolves a file in a store, failing if it doesn't exist.
    async fn entry(&self, mount: &StoreMount, file: &FileName) -> Result<EmojiEntry, Error> {
        let listing = self.listing(mount).await?;

        names::resolve(file, &listing)?
            .cloned()
            .ok_or_else(|| Error::NotFound(entry_path(mount, file)))
    }

    /// The buffer of an in-progress write to `file`, if there is one.
    async fn pending_write(&self, mount: &StoreMount, file: &FileName) -> Option<Arc<OpenFile>> {
        let (name, _) = creation_name(file).ok()?;
        let handle = *self.pending.lock().get(&pending_key(mount, &name))?;

        self.open_files
            .get(&handle)
            .await
            .map(|file| file.value().clone())
    }

    async fn open_read(&self, mount: Arc<StoreMount>, file: FileName) -> Result<Handle, Error> {
        let entry = self.entry(&mount, &file).await?;

        metrics::counter!(STORE_FETCHES, "store" => mount.label()).increment(1);
        let content = mount
            .store
            .fetch(&entry.name)
            .await
            .into_backend(format!("failed to fetch {}", entry_path(&mount, &file)))?;

        let size = content.len() as u64;
        if !entry.is_alias() && entry.size != Some(size) {
            mount.cache.record(Mutation::Size {
                name: entry.name.clone(),
                size,
            });
        }

        let metadata = Metadata::file(ENTRY_PERMISSIONS, Some(size))
            .with_times(entry.created, entry.created);
        let handle = self.allocate_handle(HandleType::Read);
        self.open_files
            .insert(handle, Arc::new(OpenFile::Read { content, metadata }))
            .await;

        Ok(handle)
    }

    async fn open_write(
        &self,
        mount: Arc<StoreMount>,
        file: FileName,
        flags: OpenFlags,
    ) -> Result<Handle, Error> {
        let path = entry_path(&mount, &file);
        if !mount.is_writable() {
            return Err(Error::ReadOnly(path));
        }

        let (name, media_type) = creation_name(&file)?;
        let listing = self.listing(&mount).await?;
        let existing = names::resolve(&file, &listing)?.or_else(|| listing.get(&name));
        if existing.is_some() {
            return Err(Error::AlreadyExists(path));
        }
        if !flags.contains(OpenFlags::CREATE) {
            return Err(Error::NotFound(path));
        }

        let handle = self.allocate_handle(HandleType::Write);
        let key = pending_key(&mount, &name);
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) {
                return Err(Error::AlreadyExists(path));
            }
            pending.insert(key.clone(), handle);
        }

        let buffer = WriteBuffer {
            path: path.clone(),
            mount,
            name,
            media_type,
            pending_key: key,
            append: flags.contains(OpenFlags::APPEND),
            content: Vec::new(),
        };
        self.open_files
            .insert(handle, Arc::new(OpenFile::Write(Mutex::new(buffer))))
            .await;

        event!(Level::DEBUG, %handle, %path, "started write");
        Ok(handle)
    }

    /// Uploads a closed write buffer. Its name stays reserved until the
    /// upload has finished or been dropped.
    async fn finish_write(&self, buffer: &Mutex<WriteBuffer>) -> Result<(), Error> {
        let (path, mount, name, media_type, content, pending_key) = {
            let mut buffer = buffer.lock();
            (
                mem::take(&mut buffer.path),
                buffer.mount.clone(),
                mem::take(&mut buffer.name),
                buffer.media_type,
                mem::take(&mut buffer.content),
                mem::take(&mut buffer.pending_key),
            )
        };

        let _reservation = Reservation {
            pending: &self.pending,
            key: pending_key,
        };
        self.upload(&mount, &path, &name, media_type, content).await
    }

    async fn upload(
        &self,
        mount: &StoreMount,
        path: &str,
        name: &str,
        media_type: Option<MediaType>,
        content: Vec<u8>,
    ) -> Result<(), Error> {
        if content.is_empty() {
            return Err(Error::InvalidContent(format!("{path} is empty")));
        }
        let Some(media_type) = media_type.or_else(|| MediaType::sniff(&content)) else {
            return Err(Error::InvalidContent(format!(
                "{path} is not a GIF, PNG or JPEG image"
            )));
        };

        metrics::counter!(STORE_CREATES, "store" => mount.label()).increment(1);
        let entry = mount
            .store
            .create(name, content, media_type)
            .await
            .into_backend(format!("failed to create {path}"))?;

        event!(Level::INFO, %path, size = entry.size, "created emoji");
        mount.cache.record(Mutation::Insert(entry));

        Ok(())
    }

    fn xattrs(entry: &EmojiEntry) -> Vec<(&'static str, &str)> {
        let mut xattrs = vec![(XATTR_URL, entry.source.as_str())];
        if let Some(created_by) = &entry.created_by {
            xattrs.push((XATTR_CREATED_BY, created_by.as_str()));
        }
        xattrs
    }
}

#[async_trait]
impl Vfs for EmojiFs {
    #[instrument(skip(self))]
    async fn read_dir(&self, path: &Utf8Path) -> Result<Vec<(String, Metadata)>, Error> {
        match self.namespace.resolve(path)? {
            Location::Root => Ok(self
                .namespace
                .platforms()
                .map(|platform| (platform.to_string(), Metadata::directory(DIR_PERMISSIONS)))
                .collect()),
            Location::Platform(platform) => Ok(self
                .namespace
                .stores(&platform)
                .map(|mount| (mount.display_name.clone(), store_dir_metadata(mount)))
                .collect()),
            Location::Store(mount) => {
                let listing = self.listing(&mount).await?;

                Ok(listing
                    .iter()
                    .map(|entry| (names::render(entry, &listing), entry_metadata(entry)))
                    .collect())
            }
            Location::Entry { .. } => Err(Error::NotADirectory(path.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error> {
        match self.namespace.resolve(path)? {
            Location::Root | Location::Platform(_) => Ok(Metadata::directory(DIR_PERMISSIONS)),
            Location::Store(mount) => Ok(store_dir_metadata(&mount)),
            Location::Entry { mount, file } => {
                if let Some(open_file) = self.pending_write(&mount, &file).await {
                    if let OpenFile::Write(buffer) = open_file.as_ref() {
                        let size = buffer.lock().content.len() as u64;
                        return Ok(Metadata::file(PENDING_PERMISSIONS, Some(size)));
                    }
                }

                let entry = self.entry(&mount, &file).await?;
                Ok(entry_metadata(&entry))
            }
        }
    }

    #[instrument(skip(self))]
    async fn open(&self, path: &Utf8Path, flags: OpenFlags) -> Result<Handle, Error> {
        let (mount, file) = match self.namespace.resolve(path)? {
            Location::Entry { mount, file } => (mount, file),
            _ => return Err(Error::IsADirectory(path.to_string())),
        };

        if flags.is_write() {
            self.open_write(mount, file, flags).await
        } else {
            self.open_read(mount, file).await
        }
    }

    async fn read(
        &self,
        handle: &Handle,
        offset: usize,
        len: usize,
    ) -> Result<Option<Vec<u8>>, Error> {
        fn slice(content: &[u8], offset: usize, len: usize) -> Option<Vec<u8>> {
            if offset >= content.len() && len != 0 {
                return None;
            }

            let start = offset.min(content.len());
            let end = offset.saturating_add(len).min(content.len());
            Some(content[start..end].to_vec())
        }

        match self.open_file(handle).await?.as_ref() {
            OpenFile::Read { content, .. } => Ok(slice(content, offset, len)),
            OpenFile::Write(buffer) => Ok(slice(&buffer.lock().content, offset, len)),
        }
    }

    async fn write(&self, handle: &Handle, offset: usize, data: &[u8]) -> Result<(), Error> {
        let open_file = self.open_file(handle).await?;
        let OpenFile::Write(buffer) = open_file.as_ref() else {
            return Err(Error::BadHandle);
        };

        let mut buffer = buffer.lock();
        let offset = if buffer.append {
            buffer.content.len()
        } else {
            offset
        };
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= MAX_EMOJI_SIZE)
            .ok_or_else(|| Error::TooLarge(buffer.path.clone()))?;
        if buffer.content.len() < end {
            buffer.content.resize(end, 0);
        }
        buffer.content[offset..end].copy_from_slice(data);

        Ok(())
    }

    async fn truncate(&self, handle: &Handle, len: usize) -> Result<(), Error> {
        let open_file = self.open_file(handle).await?;
        let OpenFile::Write(buffer) = open_file.as_ref() else {
            return Err(Error::BadHandle);
        };

        let mut buffer = buffer.lock();
        if len > MAX_EMOJI_SIZE {
            return Err(Error::TooLarge(buffer.path.clone()));
        }
        buffer.content.resize(len, 0);
        Ok(())
    }

    async fn stat_fd(&self, handle: &Handle) -> Result<Metadata, Error> {
        match self.open_file(handle).await?.as_ref() {
            OpenFile::Read { metadata, .. } => Ok(*metadata),
            OpenFile::Write(buffer) => Ok(Metadata::file(
                PENDING_PERMISSIONS,
                Some(buffer.lock().content.len() as u64),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn close(&self, handle: Handle) -> Result<(), Error> {
        let open_file = self.open_files.remove(&handle).await.ok_or(Error::BadHandle)?;

        match open_file.as_ref() {
            OpenFile::Read { .. } => Ok(()),
            OpenFile::Write(buffer) => self.finish_write(buffer).await,
        }
    }

    #[instrument(skip(self))]
    async fn remove_file(&self, path: &Utf8Path) -> Result<(), Error> {
        let (mount, file) = match self.namespace.resolve(path)? {
            Location::Entry { mount, file } => (mount, file),
            _ => return Err(Error::IsADirectory(path.to_string())),
        };
        if !mount.is_writable() {
            return Err(Error::ReadOnly(path.to_string()));
        }

        let entry = self.entry(&mount, &file).await?;

        metrics::counter!(STORE_DELETES, "store" => mount.label()).increment(1);
        mount
            .store
            .delete(&entry.name)
            .await
            .into_backend(format!("failed to delete {path}"))?;

        event!(Level::INFO, name = %entry.name, "deleted emoji");
        mount.cache.record(Mutation::Remove(entry.name));

        Ok(())
    }

    async fn rename(&self, _from: &Utf8Path, _to: &Utf8Path) -> Result<(), Error> {
        Err(Error::NotSupported("rename"))
    }

    async fn mkdir(&self, path: &Utf8Path) -> Result<(), Error> {
        match self.stat(path).await {
            Ok(_) => Err(Error::AlreadyExists(path.to_string())),
            Err(Error::NotFound(_)) => Err(Error::NotSupported("mkdir")),
            Err(err) => Err(err),
        }
    }

    async fn remove_dir(&self, path: &Utf8Path) -> Result<(), Error> {
        match self.namespace.resolve(path)? {
            Location::Entry { .. } => Err(Error::NotADirectory(path.to_string())),
            _ => Err(Error::NotSupported("rmdir")),
        }
    }

    #[instrument(skip(self))]
    async fn readlink(&self, path: &Utf8Path) -> Result<Utf8PathBuf, Error> {
        let Location::Entry { mount, file } = self.namespace.resolve(path)? else {
            return Err(Error::NotASymlink(path.to_string()));
        };

        let listing = self.listing(&mount).await?;
        let entry = names::resolve(&file, &listing)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let Some(target) = &entry.alias_for else {
            return Err(Error::NotASymlink(path.to_string()));
        };

        Ok(match listing.get(target) {
            Some(target) => Utf8PathBuf::from(names::render(target, &listing)),
            None => Utf8PathBuf::from(target),
        })
    }

    #[instrument(skip(self))]
    async fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> Result<(), Error> {
        let Location::Entry { mount, file } = self.namespace.resolve(path)? else {
            return Err(Error::AlreadyExists(path.to_string()));
        };

        let target = if target.is_absolute() {
            target.to_owned()
        } else {
            Utf8PathBuf::from(mount.path()).join(target)
        };
        let Location::Entry {
            mount: target_mount,
            file: target_file,
        } = self.namespace.resolve(&target)?
        else {
            return Err(Error::NotSupported("links to directories"));
        };
        if !Arc::ptr_eq(&mount, &target_mount) {
            return Err(Error::NotSupported("links across stores"));
        }

        if !mount.is_writable() {
            return Err(Error::ReadOnly(path.to_string()));
        }
        if !mount.capabilities().contains(StoreCapabilities::ALIAS) {
            return Err(Error::NotSupported("aliases in this store"));
        }

        let (name, _) = creation_name(&file)?;
        let listing = self.listing(&mount).await?;
        if names::resolve(&file, &listing)?.is_some() || listing.get(&name).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let target_entry = names::resolve(&target_file, &listing)?
            .ok_or_else(|| Error::NotFound(target.to_string()))?;

        let entry = mount
            .store
            .create_alias(&name, &target_entry.name)
            .await
            .into_backend(format!("failed to link {path}"))?;

        event!(Level::INFO, %name, target = %target_entry.name, "created alias");
        mount.cache.record(Mutation::Insert(entry));

        Ok(())
    }

    async fn list_xattr(&self, path: &Utf8Path) -> Result<Vec<String>, Error> {
        match self.namespace.resolve(path)? {
            Location::Entry { mount, file } => {
                let entry = self.entry(&mount, &file).await?;
                Ok(Self::xattrs(&entry)
                    .into_iter()
                    .map(|(name, _)| name.to_owned())
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn get_xattr(&self, path: &Utf8Path, name: &str) -> Result<Vec<u8>, Error> {
        let Location::Entry { mount, file } = self.namespace.resolve(path)? else {
            return Err(Error::NoAttribute(name.to_owned()));
        };

        let entry = self.entry(&mount, &file).await?;
        Self::xattrs(&entry)
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_bytes().to_vec())
            .ok_or_else(|| Error::NoAttribute(name.to_owned()))
    }
}
