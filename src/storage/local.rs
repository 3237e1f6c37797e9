//! Local filesystem storage
//!
//! Serves `file://` paths directly and `hdfs://` paths through a gateway
//! mount (NFS or FUSE) that exposes the HDFS namespace as a local tree.

use super::{join_path, FileStatus, InputStream, OutputStream, StorageClient, PARTIAL_SUFFIX};
use crate::error::{IngestError, IoResultExt, Result};
use std::fs::{self, File, Metadata};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;

/// Storage client over the local filesystem
pub struct LocalStorage {
    host_uri: String,
    mount: Option<PathBuf>,
}

impl LocalStorage {
    /// Client that maps storage paths one to one onto local paths
    pub fn new(host_uri: impl Into<String>) -> Self {
        Self {
            host_uri: host_uri.into(),
            mount: None,
        }
    }

    /// Client that maps storage paths below a local mount point
    pub fn rooted(host_uri: impl Into<String>, mount: impl Into<PathBuf>) -> Self {
        Self {
            host_uri: host_uri.into(),
            mount: Some(mount.into()),
        }
    }

    fn local_path(&self, path: &str) -> PathBuf {
        match &self.mount {
            Some(mount) => mount.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    fn stat(&self, path: &str) -> Result<Option<FileStatus>> {
        let local = self.local_path(path);
        match fs::metadata(&local) {
            Ok(meta) => Ok(Some(to_status(path, &meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::io(local, e)),
        }
    }
}

impl StorageClient for LocalStorage {
    fn host_uri(&self) -> &str {
        &self.host_uri
    }

    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>> {
        let status = self
            .stat(path)?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        if !status.is_dir {
            return Ok(vec![status]);
        }

        let local = self.local_path(path);
        let mut children = Vec::new();
        for item in fs::read_dir(&local).with_path(&local)? {
            let item = item.with_path(&local)?;
            let name = item.file_name().to_string_lossy().into_owned();
            let child = join_path(path, &name);
            match fs::metadata(item.path()) {
                Ok(meta) => children.push(to_status(&child, &meta)),
                // Dangling symlinks and entries removed mid-listing
                Err(e) => tracing::warn!("Skipping '{}': {}", child, e),
            }
        }
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn status(&mut self, path: &str) -> Result<Option<FileStatus>> {
        self.stat(path)
    }

    fn open(&mut self, path: &str, buffer_size: usize) -> Result<Box<dyn InputStream + '_>> {
        let local = self.local_path(path);
        let file = File::open(&local).with_path(&local)?;
        Ok(Box::new(LocalInput {
            reader: BufReader::with_capacity(buffer_size, file),
        }))
    }

    fn create(
        &mut self,
        path: &str,
        permission: u16,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>> {
        let local = self.local_path(path);
        let parent = local
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&parent).with_path(&parent)?;

        // Bytes land in a hidden sibling and are renamed into place on commit
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&parent)
            .with_path(&parent)?;
        apply_mode(staging.path(), permission)?;

        Ok(Box::new(LocalOutput {
            writer: Some(BufWriter::with_capacity(buffer_size, staging)),
            path: local,
        }))
    }

    fn mkdirs(&mut self, path: &str, permission: u16) -> Result<()> {
        let local = self.local_path(path);
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(u32::from(permission));
        }
        builder.create(&local).with_path(&local)?;
        apply_mode(&local, permission)
    }

    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()> {
        let local = self.local_path(path);
        chown_by_name(&local, owner, group)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct LocalInput {
    reader: BufReader<File>,
}

impl Read for LocalInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl InputStream for LocalInput {
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct LocalOutput {
    writer: Option<BufWriter<NamedTempFile>>,
    path: PathBuf,
}

impl Write for LocalOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("output already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl OutputStream for LocalOutput {
    fn commit(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let staged = writer
            .into_inner()
            .map_err(|e| IngestError::io(&self.path, e.into_error()))?;
        staged.as_file().sync_all().with_path(staged.path())?;
        staged
            .persist(&self.path)
            .map_err(|e| IngestError::io(&self.path, e.error))?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping an uncommitted staging file deletes it
        if self.writer.is_some() {
            tracing::debug!("Discarding uncommitted output for {}", self.path.display());
        }
        Ok(())
    }
}

fn to_status(path: &str, meta: &Metadata) -> FileStatus {
    let modification_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let (owner, group, permission) = ownership(meta);

    FileStatus {
        path: path.to_string(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modification_time,
        owner,
        group,
        is_dir: meta.is_dir(),
        permission,
    }
}

#[cfg(unix)]
fn ownership(meta: &Metadata) -> (String, String, u16) {
    use nix::unistd::{Gid, Group, Uid, User};
    use std::os::unix::fs::MetadataExt;

    let owner = User::from_uid(Uid::from_raw(meta.uid()))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| meta.uid().to_string());
    let group = Group::from_gid(Gid::from_raw(meta.gid()))
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_else(|| meta.gid().to_string());
    (owner, group, (meta.mode() & 0o7777) as u16)
}

#[cfg(not(unix))]
fn ownership(meta: &Metadata) -> (String, String, u16) {
    let mode = if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    };
    (String::new(), String::new(), mode)
}

#[cfg(unix)]
fn apply_mode(path: &Path, permission: u16) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(u32::from(permission))).with_path(path)
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _permission: u16) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn chown_by_name(path: &Path, owner: &str, group: &str) -> Result<()> {
    use nix::unistd::{chown, Gid, Group, Uid, User};

    let uid = lookup(owner, |name| User::from_name(name).map(|u| u.map(|u| u.uid)))
        .or_else(|| owner.parse::<u32>().ok().map(Uid::from_raw));
    let gid = lookup(group, |name| Group::from_name(name).map(|g| g.map(|g| g.gid)))
        .or_else(|| group.parse::<u32>().ok().map(Gid::from_raw));

    if uid.is_none() && !owner.is_empty() {
        tracing::warn!("Unknown owner '{}' for {}, keeping current owner", owner, path.display());
    }
    if gid.is_none() && !group.is_empty() {
        tracing::warn!("Unknown group '{}' for {}, keeping current group", group, path.display());
    }
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }

    chown(path, uid, gid).map_err(|errno| IngestError::io(path, std::io::Error::from(errno)))
}

#[cfg(unix)]
fn lookup<T>(name: &str, f: impl FnOnce(&str) -> nix::Result<Option<T>>) -> Option<T> {
    if name.is_empty() {
        return None;
    }
    f(name).ok().flatten()
}

#[cfg(not(unix))]
fn chown_by_name(path: &Path, _owner: &str, _group: &str) -> Result<()> {
    tracing::debug!("Ownership not supported on this platform: {}", path.display());
    Ok(())
}
