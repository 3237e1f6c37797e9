//! Storage system access
//!
//! Every protocol the ingester talks to sits behind [`StorageClient`]:
//! - Local filesystem and HDFS gateway mounts
//! - SFTP over libssh2
//! - FTP
//! - S3-compatible object stores (`native_s3` feature)
//!
//! Clients are opened from a [`ConnectionDescriptor`] produced by the
//! credential resolver. A client is never shared between descriptors: two
//! entries on the same host may carry different credentials.

mod credentials;
mod ftp;
mod local;
#[cfg(test)]
pub mod memory;
#[cfg(feature = "native_s3")]
mod s3;
mod sftp;

pub use credentials::*;
pub use ftp::FtpStorage;
pub use local::LocalStorage;
#[cfg(feature = "native_s3")]
pub use s3::S3Storage;
pub use sftp::SftpStorage;

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Path separator used by every storage system
pub const SEPARATOR: char = '/';

/// Raw metadata of one path as reported by a storage system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    /// Absolute path on the storage system, without scheme or host
    pub path: String,
    /// Length in bytes (0 for directories)
    pub size: u64,
    /// Modification time in epoch milliseconds
    pub modification_time: u64,
    /// Owner name
    pub owner: String,
    /// Group name
    pub group: String,
    /// Whether the path is a directory
    pub is_dir: bool,
    /// Permission bits
    pub permission: u16,
}

impl FileStatus {
    /// Status of a regular file with default ownership and mode 0644
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            modification_time: 0,
            owner: String::new(),
            group: String::new(),
            is_dir: false,
            permission: 0o644,
        }
    }

    /// Status of a directory with default ownership and mode 0755
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modification_time: 0,
            owner: String::new(),
            group: String::new(),
            is_dir: true,
            permission: 0o755,
        }
    }

    /// Final path component ("" for the root)
    pub fn name(&self) -> &str {
        file_name(&self.path)
    }
}

/// Readable byte stream with an explicit, fallible close
pub trait InputStream: Read {
    /// Release the stream; errors are reported, never retried
    fn close(self: Box<Self>) -> Result<()>;
}

/// Writable byte stream with a commit step and an explicit close
pub trait OutputStream: Write {
    /// Make written bytes visible at the destination path
    ///
    /// Until commit the bytes live in a staging location (a hidden
    /// `.partial` sibling, or a local temp file for object stores), so the
    /// destination path only ever holds complete files. A failure means the
    /// file was not materialized.
    fn commit(&mut self) -> Result<()>;

    /// Release the stream handle, discarding anything not committed
    fn close(self: Box<Self>) -> Result<()>;
}

/// A live session against one storage system
pub trait StorageClient {
    /// Canonical `scheme://host/` of the system this client talks to
    fn host_uri(&self) -> &str;

    /// List the immediate children of a directory
    ///
    /// A regular file lists as itself. A missing path yields
    /// [`IngestError::NotFound`].
    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>>;

    /// Status of a path, `None` if it does not exist
    fn status(&mut self, path: &str) -> Result<Option<FileStatus>>;

    /// Check whether a path exists
    fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.status(path)?.is_some())
    }

    /// Check whether a path exists and is a directory
    fn is_dir(&mut self, path: &str) -> Result<bool> {
        Ok(self.status(path)?.is_some_and(|s| s.is_dir))
    }

    /// Open a file for buffered reading
    fn open(&mut self, path: &str, buffer_size: usize) -> Result<Box<dyn InputStream + '_>>;

    /// Create (or truncate) a file with the given permission, creating parents
    fn create(
        &mut self,
        path: &str,
        permission: u16,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>>;

    /// Create a directory and any missing parents
    fn mkdirs(&mut self, path: &str, permission: u16) -> Result<()>;

    /// Change owner and group of a path
    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()>;

    /// End the session
    fn close(&mut self) -> Result<()>;
}

/// Factory that opens a fresh client for a descriptor
pub trait Connector: Send + Sync {
    /// Open a new session; never returns a cached client
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StorageClient>>;
}

/// A session that is closed when it goes out of scope
///
/// Close failures on drop are logged and swallowed so that one failing
/// session never prevents the release of the others.
pub struct OpenConnection {
    client: Box<dyn StorageClient>,
    host_uri: String,
}

impl OpenConnection {
    /// Open a fresh session for the descriptor
    pub fn open(connector: &dyn Connector, descriptor: &ConnectionDescriptor) -> Result<Self> {
        let client = connector.connect(descriptor)?;
        Ok(Self {
            client,
            host_uri: descriptor.host_uri(),
        })
    }

    pub fn host_uri(&self) -> &str {
        &self.host_uri
    }
}

impl std::ops::Deref for OpenConnection {
    type Target = dyn StorageClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl std::ops::DerefMut for OpenConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut()
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        match self.client.close() {
            Ok(()) => tracing::debug!("Closed connection to {}", self.host_uri),
            Err(e) => tracing::warn!("Failed to close connection to {}: {}", self.host_uri, e),
        }
    }
}

/// Options that are not part of per-entry credentials
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Local mount point of the HDFS gateway (NFS or FUSE)
    pub hdfs_mount: Option<PathBuf>,
    /// Object-store region
    pub s3_region: Option<String>,
    /// Custom object-store endpoint (MinIO, Ceph, ...)
    pub s3_endpoint: Option<String>,
    /// Force path-style object-store URLs
    pub s3_path_style: bool,
}

/// Connector backed by the real protocol clients
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    options: ConnectOptions,
}

impl DefaultConnector {
    /// Create a connector with the given options
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

impl Connector for DefaultConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StorageClient>> {
        tracing::debug!(
            "Opening {} session to '{}'",
            descriptor.driver.name(),
            descriptor.host
        );

        match descriptor.driver {
            Driver::Local => Ok(Box::new(LocalStorage::new(descriptor.host_uri()))),
            Driver::Hdfs => {
                let mount = self.options.hdfs_mount.as_ref().ok_or_else(|| {
                    IngestError::connection(
                        &descriptor.host,
                        "no HDFS gateway mount configured (--hdfs-mount)",
                    )
                })?;
                Ok(Box::new(LocalStorage::rooted(descriptor.host_uri(), mount)))
            }
            Driver::Sftp => Ok(Box::new(SftpStorage::connect(descriptor)?)),
            Driver::Ftp => Ok(Box::new(FtpStorage::connect(descriptor)?)),
            #[cfg(feature = "native_s3")]
            Driver::S3a | Driver::S3n => {
                Ok(Box::new(S3Storage::connect(descriptor, &self.options)?))
            }
            #[cfg(not(feature = "native_s3"))]
            Driver::S3a | Driver::S3n => Err(IngestError::UnsupportedOperation(format!(
                "{} support requires the native_s3 feature",
                descriptor.driver.name()
            ))),
        }
    }
}

/// Final component of a slash separated path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent of a slash separated path, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind(SEPARATOR) {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Join a base path and a relative path with exactly one separator
pub fn join_path(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches(SEPARATOR);
    if relative.is_empty() {
        return base.to_string();
    }
    let base = base.trim_end_matches(SEPARATOR);
    format!("{}{}{}", base, SEPARATOR, relative)
}

/// Hidden sibling that receives the bytes of `path` until they are committed
///
/// `/out/dir/data.csv` stages as `/out/dir/.data.csv.partial`.
pub fn partial_path(path: &str) -> String {
    let name = file_name(path);
    let staged = format!(".{}{}", name, PARTIAL_SUFFIX);
    match parent_path(path) {
        Some(parent) => join_path(parent, &staged),
        None => staged,
    }
}

/// Suffix of staged, not yet committed files
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Host and port from an authority string, falling back to a default port
pub fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16)> {
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                IngestError::config(format!("invalid port in authority '{}'", authority))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Credentials;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/source/path/123.txt"), "123.txt");
        assert_eq!(file_name("/source/path/"), "path");
        assert_eq!(file_name("/"), "");
        assert_eq!(file_name("plain"), "plain");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/dest", "dir/file.txt"), "/dest/dir/file.txt");
        assert_eq!(join_path("/dest/", "dir/file.txt"), "/dest/dir/file.txt");
        assert_eq!(join_path("/", "abc.txt"), "/abc.txt");
        assert_eq!(join_path("/dest", ""), "/dest");
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(partial_path("/out/dir/data.csv"), "/out/dir/.data.csv.partial");
        assert_eq!(partial_path("/top.bin"), "/.top.bin.partial");
    }

    #[test]
    fn test_split_authority() {
        assert_eq!(split_authority("host", 22).unwrap(), ("host".to_string(), 22));
        assert_eq!(split_authority("host:2222", 22).unwrap(), ("host".to_string(), 2222));
        assert!(split_authority("host:notaport", 22).is_err());
    }

    #[test]
    fn test_hdfs_requires_mount() {
        let connector = DefaultConnector::new(ConnectOptions::default());
        let descriptor = resolve("hdfs", "namenode", &Credentials::None).unwrap();
        let err = connector.connect(&descriptor).err().unwrap();
        assert!(matches!(err, IngestError::Connection { .. }));
    }
}
