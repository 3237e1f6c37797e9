//! Credential resolution
//!
//! Turns a scheme, a host and the credentials carried by an entry into a
//! [`ConnectionDescriptor`]. Resolution is pure: nothing is opened here.

use crate::error::{IngestError, Result};
use crate::fs::{CredentialKind, Credentials};
use std::fmt;
use std::str::FromStr;

/// Storage schemes the ingester understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    File,
    Hdfs,
    S3a,
    S3n,
    Ftp,
    Sftp,
}

impl Scheme {
    /// Scheme name as it appears in URIs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Hdfs => "hdfs",
            Self::S3a => "s3a",
            Self::S3n => "s3n",
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
        }
    }

    /// Credential variant entries of this scheme carry
    pub fn credential_kind(self) -> CredentialKind {
        match self {
            Self::File | Self::Hdfs => CredentialKind::None,
            Self::S3a | Self::S3n => CredentialKind::ObjectStore,
            Self::Ftp => CredentialKind::Ftp,
            Self::Sftp => CredentialKind::Sftp,
        }
    }

    /// Driver that opens sessions for this scheme
    pub fn driver(self) -> Driver {
        match self {
            Self::File => Driver::Local,
            Self::Hdfs => Driver::Hdfs,
            Self::S3a => Driver::S3a,
            Self::S3n => Driver::S3n,
            Self::Ftp => Driver::Ftp,
            Self::Sftp => Driver::Sftp,
        }
    }
}

impl FromStr for Scheme {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "hdfs" => Ok(Self::Hdfs),
            "s3a" => Ok(Self::S3a),
            "s3n" => Ok(Self::S3n),
            "ftp" => Ok(Self::Ftp),
            "sftp" => Ok(Self::Sftp),
            _ => Err(IngestError::UnsupportedScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage client implementation selected for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Local,
    Hdfs,
    S3a,
    S3n,
    Ftp,
    Sftp,
}

impl Driver {
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Hdfs => "hdfs-gateway",
            Self::S3a => "s3a",
            Self::S3n => "s3n",
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
        }
    }
}

/// Authentication parameters handed to a driver
#[derive(Clone, PartialEq, Eq)]
pub enum AuthParams {
    Anonymous,
    Password {
        username: String,
        password: Option<String>,
    },
    SshKey {
        username: String,
        password: Option<String>,
        key_path: Option<String>,
    },
    AccessKeys {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Password { username, .. } => {
                f.debug_struct("Password").field("username", username).finish_non_exhaustive()
            }
            Self::SshKey {
                username, key_path, ..
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("key_path", key_path)
                .finish_non_exhaustive(),
            Self::AccessKeys { access_key_id, .. } => f
                .debug_struct("AccessKeys")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to open one fresh session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub scheme: Scheme,
    pub driver: Driver,
    /// Authority part of the host URI (`host[:port]`, bucket, or empty)
    pub host: String,
    pub auth: AuthParams,
    /// Always set: sessions are never pooled across credential sets
    pub disable_cache: bool,
}

impl ConnectionDescriptor {
    /// Canonical `scheme://host/` for this session
    pub fn host_uri(&self) -> String {
        format!("{}://{}/", self.scheme, self.host)
    }

    /// User name used for authentication, if any
    pub fn username(&self) -> Option<&str> {
        match &self.auth {
            AuthParams::Password { username, .. } | AuthParams::SshKey { username, .. } => {
                Some(username)
            }
            _ => None,
        }
    }
}

/// Resolve scheme, host and credentials into a connection descriptor
pub fn resolve(scheme: &str, host: &str, credentials: &Credentials) -> Result<ConnectionDescriptor> {
    let scheme: Scheme = scheme.parse()?;

    let auth = match (scheme, credentials) {
        (Scheme::File | Scheme::Hdfs, _) => AuthParams::Anonymous,
        (
            Scheme::S3a | Scheme::S3n,
            Credentials::ObjectStore {
                access_key_id,
                secret_key_id,
            },
        ) => {
            if access_key_id.is_empty() || secret_key_id.is_empty() {
                return Err(IngestError::config(format!(
                    "{} requires both an access key and a secret key",
                    scheme
                )));
            }
            AuthParams::AccessKeys {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_key_id.clone(),
            }
        }
        (Scheme::Ftp, Credentials::Ftp { username, password }) => {
            require_username(scheme, username)?;
            AuthParams::Password {
                username: username.clone(),
                password: password.clone(),
            }
        }
        (
            Scheme::Sftp,
            Credentials::Sftp {
                username,
                password,
                key_path,
            },
        ) => {
            require_username(scheme, username)?;
            AuthParams::SshKey {
                username: username.clone(),
                password: password.clone(),
                key_path: key_path.clone(),
            }
        }
        (scheme, other) => {
            return Err(IngestError::config(format!(
                "{} credentials cannot be used with scheme '{}' (expected {:?})",
                kind_name(other.kind()),
                scheme,
                scheme.credential_kind()
            )))
        }
    };

    Ok(ConnectionDescriptor {
        scheme,
        driver: scheme.driver(),
        host: host.to_string(),
        auth,
        disable_cache: true,
    })
}

fn require_username(scheme: Scheme, username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(IngestError::config(format!("{} requires a username", scheme)));
    }
    Ok(())
}

fn kind_name(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::None => "empty",
        CredentialKind::Ftp => "FTP",
        CredentialKind::Sftp => "SFTP",
        CredentialKind::ObjectStore => "object-store",
    }
}
