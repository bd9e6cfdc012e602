//! Shell commands that drive a [`Vfs`] directly, without a kernel mount.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use path_absolutize::Absolutize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{Level, event};

use crate::vfs::{Error, FileKind, Metadata, OpenFlags, Vfs};

const READ_CHUNK: usize = 64 * 1024;

/// Runs commands against a filesystem, printing their output to `out`.
pub struct Shell<'a, W> {
    vfs: &'a dyn Vfs,
    out: W,
    mountpoint: Option<Utf8PathBuf>,
}

impl<'a, W: AsyncWrite + Unpin> Shell<'a, W> {
    pub fn new(vfs: &'a dyn Vfs, out: W) -> Self {
        Shell {
            vfs,
            out,
            mountpoint: None,
        }
    }

    /// Accept host paths under `mountpoint` wherever a virtual path is.
    #[must_use]
    pub fn with_mountpoint(mut self, mountpoint: Option<Utf8PathBuf>) -> Self {
        self.mountpoint = mountpoint;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Maps a command argument onto a virtual path.
    ///
    /// Host paths under the mountpoint, relative ones included, are rebased
    /// onto `/`. Anything else must already be an absolute virtual path.
    pub fn virtual_path(&self, arg: &str) -> Result<Utf8PathBuf, Error> {
        let path = Utf8Path::new(arg);

        if let Some(mountpoint) = &self.mountpoint {
            let host = path
                .as_std_path()
                .absolutize()
                .map_err(|_| Error::InvalidPath(arg.to_owned()))?;
            if let Ok(rest) = host.strip_prefix(mountpoint) {
                let rest = Utf8Path::from_path(rest).ok_or_else(|| Error::InvalidPath(arg.to_owned()))?;
                return Ok(Utf8Path::new("/").join(rest));
            }
        }

        if path.is_absolute() {
            Ok(path.to_owned())
        } else {
            Err(Error::InvalidPath(arg.to_owned()))
        }
    }

    async fn read_file(&self, path: &Utf8Path) -> Result<Vec<u8>, Error> {
        let handle = self.vfs.open(path, OpenFlags::READ).await?;

        let mut content = Vec::new();
        let result = async {
            while let Some(chunk) = self.vfs.read(&handle, content.len(), READ_CHUNK).await? {
                if chunk.is_empty() {
                    break;
                }
                content.extend(chunk);
            }
            Ok::<_, Error>(())
        }
        .await;
        self.vfs.close(handle).await?;

        result.map(|()| content)
    }

    async fn write_file(&self, path: &Utf8Path, content: &[u8]) -> Result<(), Error> {
        let handle = self
            .vfs
            .open(path, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUDE)
            .await?;

        let written = self.vfs.write(&handle, 0, content).await;
        let closed = self.vfs.close(handle).await;

        written.and(closed)
    }

    /// The destination of a copy: `dst` itself, or `dst/<file name>` when
    /// `dst` is a directory.
    async fn destination(&self, dst: &Utf8Path, file_name: Option<&str>) -> Result<Utf8PathBuf> {
        match self.vfs.stat(dst).await {
            Ok(metadata) if metadata.is_dir() => {
                let file_name = file_name.with_context(|| format!("no file name to copy into {dst}"))?;
                Ok(dst.join(file_name))
            }
            _ => Ok(dst.to_owned()),
        }
    }

    async fn println(&mut self, line: impl AsRef<str>) -> Result<()> {
        self.out.write_all(line.as_ref().as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        Ok(())
    }

    async fn ls(&mut self, path: &Utf8Path, long: bool) -> Result<()> {
        let metadata = self.vfs.stat(path).await?;
        let is_dir = metadata.is_dir();
        let entries = if is_dir {
            self.vfs.read_dir(path).await?
        } else {
            vec![(path.file_name().unwrap_or(path.as_str()).to_owned(), metadata)]
        };

        for (name, metadata) in entries {
            if !long {
                self.println(name).await?;
                continue;
            }

            let mut line = format!("{} {name}", long_format(&metadata));
            if metadata.kind == FileKind::Symlink {
                let link = if is_dir { path.join(&name) } else { path.to_owned() };
                if let Ok(target) = self.vfs.readlink(&link).await {
                    line.push_str(&format!(" -> {target}"));
                }
            }
            self.println(line).await?;
        }

        Ok(())
    }

    async fn stat(&mut self, path: &Utf8Path) -> Result<()> {
        let metadata = self.vfs.stat(path).await?;

        self.println(format!("  File: {path}")).await?;
        self.println(format!(
            "  Size: {}\tType: {}",
            metadata.size.map_or_else(|| "unknown".to_owned(), |size| size.to_string()),
            match metadata.kind {
                FileKind::Directory => "directory",
                FileKind::File => "regular file",
                FileKind::Symlink => "symbolic link",
            }
        ))
        .await?;
        self.println(format!("  Mode: {:o}", metadata.mode())).await?;
        self.println(format!("Modify: {}", timestamp(metadata.mtime))).await?;
        self.println(format!("Change: {}", timestamp(metadata.ctime))).await?;

        Ok(())
    }

    async fn cat(&mut self, path: &Utf8Path) -> Result<()> {
        let content = self.read_file(path).await?;
        self.out.write_all(&content).await?;
        self.out.flush().await?;

        Ok(())
    }

    async fn cp(&mut self, src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
        let content = self.read_file(src).await?;
        let dst = self.destination(dst, src.file_name()).await?;

        self.write_file(&dst, &content).await?;
        event!(Level::INFO, %src, %dst, size = content.len(), "copied emoji");

        Ok(())
    }

    async fn put(&mut self, host_file: &Utf8Path, dst: &Utf8Path) -> Result<()> {
        let content = tokio::fs::read(host_file)
            .await
            .with_context(|| format!("failed to read {host_file}"))?;
        let dst = self.destination(dst, host_file.file_name()).await?;

        self.write_file(&dst, &content).await?;
        event!(Level::INFO, %host_file, %dst, size = content.len(), "uploaded emoji");

        Ok(())
    }

    async fn xattr(&mut self, path: &Utf8Path) -> Result<()> {
        for name in self.vfs.list_xattr(path).await? {
            let value = self.vfs.get_xattr(path, &name).await?;
            self.println(format!("{name}: {}", String::from_utf8_lossy(&value)))
                .await?;
        }

        Ok(())
    }
}

fn long_format(metadata: &Metadata) -> String {
    let kind = match metadata.kind {
        FileKind::Directory => 'd',
        FileKind::File => '-',
        FileKind::Symlink => 'l',
    };
    let permissions: String = (0..9)
        .rev()
        .map(|bit| {
            if metadata.permissions & (1 << bit) == 0 {
                '-'
            } else {
                ['x', 'w', 'r'][bit % 3]
            }
        })
        .collect();
    let size = metadata
        .size
        .map_or_else(|| "?".to_owned(), |size| size.to_string());

    format!("{kind}{permissions} {size:>8}")
}

fn timestamp(time: Option<SystemTime>) -> String {
    time.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or_else(|| "unknown".to_owned(), |since| since.as_secs().to_string())
}

#[derive(Args, Debug)]
pub struct Ls {
    /// Show kind, permissions and size
    #[arg(short, long)]
    long: bool,

    #[arg(default_value = "/")]
    path: String,
}

#[derive(Args, Debug)]
pub struct PathArg {
    path: String,
}

#[derive(Args, Debug)]
pub struct Copy {
    src: String,
    dst: String,
}

#[derive(Args, Debug)]
pub struct Remove {
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<String>,
}

#[derive(Args, Debug)]
pub struct Link {
    /// The emoji the alias points at, relative to the link's store
    target: String,
    link: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a directory
    Ls(Ls),
    /// Show an entry's metadata
    Stat(PathArg),
    /// Write an emoji's image to stdout
    Cat(PathArg),
    /// Copy an emoji, possibly into another store
    Cp(Copy),
    /// Upload an image file from the host
    Put(Copy),
    /// Delete emoji
    Rm(Remove),
    /// Create an alias
    Ln(Link),
    /// Show an entry's extended attributes
    Xattr(PathArg),
}

impl Command {
    pub async fn run<W: AsyncWrite + Unpin>(&self, shell: &mut Shell<'_, W>) -> Result<()> {
        match self {
            Command::Ls(Ls { long, path }) => {
                let path = shell.virtual_path(path)?;
                shell.ls(&path, *long).await
            }
            Command::Stat(PathArg { path }) => {
                let path = shell.virtual_path(path)?;
                shell.stat(&path).await
            }
            Command::Cat(PathArg { path }) => {
                let path = shell.virtual_path(path)?;
                shell.cat(&path).await
            }
            Command::Cp(Copy { src, dst }) => {
                let src = shell.virtual_path(src)?;
                let dst = shell.virtual_path(dst)?;
                shell.cp(&src, &dst).await
            }
            Command::Put(Copy { src, dst }) => {
                let dst = shell.virtual_path(dst)?;
                shell.put(Utf8Path::new(src), &dst).await
            }
            Command::Rm(Remove { paths }) => {
                for path in paths {
                    let path = shell.virtual_path(path)?;
                    shell
                        .vfs
                        .remove_file(&path)
                        .await
                        .with_context(|| format!("failed to remove {path}"))?;
                }
                Ok(())
            }
            Command::Ln(Link { target, link }) => {
                let link = shell.virtual_path(link)?;
                shell.vfs.symlink(&link, Utf8Path::new(target)).await?;
                Ok(())
            }
            Command::Xattr(PathArg { path }) => {
                let path = shell.virtual_path(path)?;
                shell.xattr(&path).await
            }
        }
    }
}
