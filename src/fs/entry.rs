//! Entry model
//!
//! An [`Entry`] describes one discovered file or directory together with the
//! credentials needed to reach it again at copy time. Entries are built once
//! by the scanner (or decoded from a unit file) and never mutated.

use crate::error::{IngestError, Result};
use crate::storage::{FileStatus, SEPARATOR};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Scheme-specific authentication payload carried by every entry
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// Local filesystem or HDFS gateway
    None,
    /// FTP login
    Ftp {
        username: String,
        #[serde(skip_serializing)]
        password: Option<String>,
    },
    /// SFTP login, by password and/or private key
    Sftp {
        username: String,
        #[serde(skip_serializing)]
        password: Option<String>,
        key_path: Option<String>,
    },
    /// Object-store access keys
    ObjectStore {
        access_key_id: String,
        #[serde(skip_serializing)]
        secret_key_id: String,
    },
}

impl Credentials {
    /// Variant tag of these credentials
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::None => CredentialKind::None,
            Self::Ftp { .. } => CredentialKind::Ftp,
            Self::Sftp { .. } => CredentialKind::Sftp,
            Self::ObjectStore { .. } => CredentialKind::ObjectStore,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |p: &Option<String>| p.as_ref().map(|_| "***");
        match self {
            Self::None => f.write_str("None"),
            Self::Ftp { username, password } => f
                .debug_struct("Ftp")
                .field("username", username)
                .field("password", &redact(password))
                .finish(),
            Self::Sftp {
                username,
                password,
                key_path,
            } => f
                .debug_struct("Sftp")
                .field("username", username)
                .field("password", &redact(password))
                .field("key_path", key_path)
                .finish(),
            Self::ObjectStore { access_key_id, .. } => f
                .debug_struct("ObjectStore")
                .field("access_key_id", access_key_id)
                .field("secret_key_id", &"***")
                .finish(),
        }
    }
}

/// Which credential variant an encoded entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CredentialKind {
    None = 0,
    Ftp = 1,
    Sftp = 2,
    ObjectStore = 3,
}

impl CredentialKind {
    /// Single byte tag used by the unit file envelope
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inverse of [`CredentialKind::tag`]
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Ftp),
            2 => Ok(Self::Sftp),
            3 => Ok(Self::ObjectStore),
            other => Err(IngestError::Codec(format!(
                "unknown credential kind tag {}",
                other
            ))),
        }
    }
}

/// Canonical `scheme://authority/` root of a storage system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostUri {
    scheme: String,
    authority: String,
}

impl HostUri {
    /// The local filesystem, `file:///`
    pub fn local() -> Self {
        Self {
            scheme: "file".to_string(),
            authority: String::new(),
        }
    }

    /// Build from scheme and authority (`host` or `host:port`, empty for local)
    pub fn new(scheme: impl Into<String>, authority: impl Into<String>) -> Result<Self> {
        let scheme = scheme.into().to_ascii_lowercase();
        let authority = authority.into();
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return Err(IngestError::config(format!("invalid scheme '{}'", scheme)));
        }
        if authority.contains(SEPARATOR) {
            return Err(IngestError::config(format!(
                "host '{}' must not contain a path",
                authority
            )));
        }
        Ok(Self { scheme, authority })
    }

    /// Split a location such as `sftp://host:22/data/in` into host root and path
    ///
    /// A bare absolute path is a local `file` location.
    pub fn split(location: &str) -> Result<(Self, String)> {
        if location.starts_with(SEPARATOR) {
            return Ok((Self::new("file", "")?, location.to_string()));
        }
        let (scheme, rest) = location
            .split_once(':')
            .ok_or_else(|| IngestError::config(format!("'{}' is not a URI or absolute path", location)))?;

        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => match after.find(SEPARATOR) {
                Some(idx) => (&after[..idx], &after[idx..]),
                None => (after, "/"),
            },
            None => ("", rest),
        };
        let path = if path.is_empty() { "/" } else { path };
        if !path.starts_with(SEPARATOR) {
            return Err(IngestError::config(format!(
                "path of '{}' must be absolute",
                location
            )));
        }
        Ok((Self::new(scheme, authority)?, path.to_string()))
    }

    /// Parse a canonical host root, tolerating a missing trailing separator
    pub fn parse(uri: &str) -> Result<Self> {
        let (host, path) = Self::split(uri)?;
        if path != "/" {
            return Err(IngestError::config(format!(
                "host URI '{}' carries a path component",
                uri
            )));
        }
        Ok(host)
    }

    /// Lowercase scheme name
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host with optional port; empty for local files
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for HostUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/", self.scheme, self.authority)
    }
}

/// Path of `full_path` relative to the directory that contains `root`
///
/// The prefix up to and including the last separator of `root` is removed,
/// so the last component of the root survives:
/// `/source/path/directory/123.txt` under `/source/path/directory` becomes
/// `directory/123.txt`.
pub fn relative_path(full_path: &str, root: &str) -> Result<String> {
    if !full_path.starts_with(root) {
        return Err(IngestError::config(format!(
            "source root '{}' is not a prefix of '{}'",
            root, full_path
        )));
    }
    let start = root.rfind(SEPARATOR).map_or(0, |idx| idx + 1);
    Ok(full_path[start..].to_string())
}

/// Metadata record for one discovered file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub(crate) file_name: String,
    pub(crate) full_path: String,
    pub(crate) modification_time: u64,
    pub(crate) group: String,
    pub(crate) owner: String,
    pub(crate) file_size: u64,
    pub(crate) is_dir: bool,
    pub(crate) relative_path: String,
    pub(crate) permission: u16,
    pub(crate) host_uri: String,
    pub(crate) credentials: Credentials,
}

impl Entry {
    /// Build an entry from a listing result under a configured source root
    pub fn from_status(
        status: &FileStatus,
        root: &str,
        host: &HostUri,
        credentials: Credentials,
    ) -> Result<Self> {
        let relative_path = relative_path(&status.path, root)?;
        Ok(Self {
            file_name: status.name().to_string(),
            full_path: status.path.clone(),
            modification_time: status.modification_time,
            group: status.group.clone(),
            owner: status.owner.clone(),
            file_size: if status.is_dir { 0 } else { status.size },
            is_dir: status.is_dir,
            relative_path,
            permission: status.permission,
            host_uri: host.to_string(),
            credentials,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn modification_time(&self) -> u64 {
        self.modification_time
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn permission(&self) -> u16 {
        self.permission
    }

    /// Canonical host root the entry was discovered on
    pub fn host_uri(&self) -> &str {
        &self.host_uri
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Compare two entries by size alone
    pub fn cmp_size(&self, other: &Self) -> Ordering {
        self.file_size.cmp(&other.file_size)
    }
}
