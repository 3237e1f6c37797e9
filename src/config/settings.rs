//! Configuration settings for FileIngest
//!
//! Defines the CLI, the validated source and sink configurations built from
//! it, and their defaults. Every check here runs before any storage system
//! is contacted.

use crate::error::{IngestError, Result};
use crate::fs::{CredentialKind, Credentials, HostUri};
use crate::storage::{resolve, ConnectOptions, Scheme};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default streaming buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default cap on entries per work unit
pub const DEFAULT_MAX_ENTRIES_PER_UNIT: i64 = 1000;

/// FileIngest - balanced whole-file ingestion between storage systems
#[derive(Parser, Debug, Clone)]
#[command(name = "fileingest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Balanced, credential-aware file ingestion between storage systems")]
#[command(long_about = r#"
FileIngest discovers files and directories on a source storage system,
partitions them into work units of balanced byte size, and copies each unit
to a destination storage system.

Supported schemes: file, hdfs (through a gateway mount), s3a, s3n, ftp, sftp

Examples:
  fileingest plan --source sftp://edge:22 --roots /export/a,/export/b \
      --source-user ingest --source-key ~/.ssh/id_ed25519 --output plan/
  fileingest copy plan/unit-00003.fiu --dest hdfs://namenode/landing \
      --hdfs-mount /mnt/hdfs
  fileingest run --source file:/// --roots /data --dest s3a://bucket/raw
  fileingest inspect plan/unit-00000.fiu
"#)]
pub struct CliArgs {
    /// Verbose output (-v, -vv, -vvv); RUST_LOG takes precedence
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no progress bars or summaries)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Report format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Discover source entries and write one unit file per work unit
    #[command(name = "plan")]
    Plan {
        #[command(flatten)]
        source: SourceArgs,

        /// Directory receiving the unit files
        #[arg(short = 'o', long, value_name = "DIR")]
        output: PathBuf,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Copy the entries of one unit file to a destination
    #[command(name = "copy")]
    Copy {
        /// Unit file written by `plan`
        #[arg(value_name = "UNIT_FILE")]
        unit: PathBuf,

        #[command(flatten)]
        sink: SinkArgs,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Plan and copy every unit on a local worker pool
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        sink: SinkArgs,

        /// Number of parallel unit workers (0 = auto-detect)
        #[arg(short = 't', long, default_value = "0", value_name = "NUM")]
        threads: usize,

        /// Extra attempts for a failed unit
        #[arg(long, default_value = "0", value_name = "NUM")]
        retries: usize,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Decode a unit file and list its entries
    #[command(name = "inspect")]
    Inspect {
        /// Unit file written by `plan`
        #[arg(value_name = "UNIT_FILE")]
        unit: PathBuf,
    },
}

/// Source side of a job
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source storage root (e.g. file:///, sftp://host:22, s3a://bucket)
    #[arg(long = "source", value_name = "URI")]
    pub source_uri: String,

    /// Comma-separated list of source root paths
    #[arg(long, value_name = "PATHS")]
    pub roots: String,

    /// Descend into subdirectories
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub recursive: bool,

    /// Maximum number of entries per work unit
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES_PER_UNIT, allow_negative_numbers = true, value_name = "NUM")]
    pub max_entries_per_unit: i64,

    /// Source login (ftp, sftp)
    #[arg(long, value_name = "USER")]
    pub source_user: Option<String>,

    /// Source password (ftp, sftp)
    #[arg(long, env = "FILEINGEST_SOURCE_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub source_password: Option<String>,

    /// Source private key file (sftp)
    #[arg(long, value_name = "PATH")]
    pub source_key: Option<String>,

    /// Source access key id (s3a, s3n)
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true, value_name = "KEY")]
    pub source_access_key: Option<String>,

    /// Source secret key (s3a, s3n)
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true, value_name = "SECRET")]
    pub source_secret_key: Option<String>,
}

/// Destination side of a job
#[derive(Args, Debug, Clone)]
pub struct SinkArgs {
    /// Destination location with base path (e.g. hdfs://namenode/landing)
    #[arg(long = "dest", value_name = "URI")]
    pub dest_uri: String,

    /// Replace files that already exist at the destination
    #[arg(long)]
    pub overwrite: bool,

    /// Apply source owner and group to created paths
    #[arg(long)]
    pub preserve_owner: bool,

    /// Streaming buffer size (e.g., 1M, 64K)
    #[arg(short = 'b', long, default_value = "1M", value_name = "SIZE")]
    pub buffer_size: String,

    /// Destination login (ftp, sftp)
    #[arg(long, value_name = "USER")]
    pub dest_user: Option<String>,

    /// Destination password (ftp, sftp)
    #[arg(long, env = "FILEINGEST_DEST_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub dest_password: Option<String>,

    /// Destination private key file (sftp)
    #[arg(long, value_name = "PATH")]
    pub dest_key: Option<String>,

    /// Destination access key id (s3a, s3n)
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true, value_name = "KEY")]
    pub dest_access_key: Option<String>,

    /// Destination secret key (s3a, s3n)
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true, value_name = "SECRET")]
    pub dest_secret_key: Option<String>,
}

/// Settings for opening sessions that are not part of credentials
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Local mount point of the HDFS gateway (NFS or FUSE)
    #[arg(long, env = "HDFS_GATEWAY_MOUNT", value_name = "DIR")]
    pub hdfs_mount: Option<PathBuf>,

    /// Object-store region
    #[arg(long, env = "AWS_REGION", value_name = "REGION")]
    pub s3_region: Option<String>,

    /// Custom object-store endpoint (MinIO, Ceph, ...)
    #[arg(long, env = "AWS_ENDPOINT_URL", value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// Use path-style object-store URLs
    #[arg(long, env = "S3_PATH_STYLE")]
    pub s3_path_style: bool,
}

impl ConnectArgs {
    pub fn to_options(&self) -> ConnectOptions {
        ConnectOptions {
            hdfs_mount: self.hdfs_mount.clone(),
            s3_region: self.s3_region.clone(),
            s3_endpoint: self.s3_endpoint.clone(),
            s3_path_style: self.s3_path_style,
        }
    }
}

/// Report output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Validated source side of a job
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Storage system to discover on
    pub host: HostUri,
    /// Absolute root paths to walk
    pub roots: Vec<String>,
    pub recursive: bool,
    pub max_entries_per_unit: usize,
    /// Credentials embedded in every discovered entry
    pub credentials: Credentials,
}

impl SourceConfig {
    /// Build and validate from CLI arguments
    pub fn from_args(args: &SourceArgs) -> Result<Self> {
        if args.max_entries_per_unit <= 0 {
            return Err(IngestError::config(format!(
                "max entries per unit must be a positive integer, got {}",
                args.max_entries_per_unit
            )));
        }
        let host = HostUri::parse(&args.source_uri)?;
        let credentials = build_credentials(
            host.scheme(),
            CredentialArgs {
                user: args.source_user.as_deref(),
                password: args.source_password.as_deref(),
                key_path: args.source_key.as_deref(),
                access_key: args.source_access_key.as_deref(),
                secret_key: args.source_secret_key.as_deref(),
            },
        )?;

        let config = Self {
            host,
            roots: parse_roots(&args.roots),
            recursive: args.recursive,
            max_entries_per_unit: usize::try_from(args.max_entries_per_unit)
                .map_err(|_| IngestError::config("max entries per unit is too large"))?,
            credentials,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without touching any storage system
    pub fn validate(&self) -> Result<()> {
        if self.max_entries_per_unit == 0 {
            return Err(IngestError::config(
                "max entries per unit must be a positive integer",
            ));
        }
        if self.roots.is_empty() {
            return Err(IngestError::config("at least one source root is required"));
        }
        if let Some(root) = self.roots.iter().find(|r| !r.starts_with('/')) {
            return Err(IngestError::config(format!(
                "source root '{}' must be an absolute path",
                root
            )));
        }
        resolve(self.host.scheme(), self.host.authority(), &self.credentials)?;
        Ok(())
    }
}

/// Validated destination side of a job
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Storage system to write to
    pub destination: HostUri,
    /// Directory every relative path is joined onto
    pub base_path: String,
    pub credentials: Credentials,
    /// Replace existing destination files
    pub overwrite: bool,
    /// Apply source ownership to created paths
    pub preserve_owner: bool,
    /// Streaming buffer size in bytes
    pub buffer_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            destination: HostUri::local(),
            base_path: "/".to_string(),
            credentials: Credentials::None,
            overwrite: false,
            preserve_owner: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl SinkConfig {
    /// Build and validate from CLI arguments
    pub fn from_args(args: &SinkArgs) -> Result<Self> {
        let (destination, base_path) = HostUri::split(&args.dest_uri)?;
        let buffer_size = parse_size(&args.buffer_size)
            .map_err(|e| IngestError::config(format!("invalid buffer size: {}", e)))?;
        let credentials = build_credentials(
            destination.scheme(),
            CredentialArgs {
                user: args.dest_user.as_deref(),
                password: args.dest_password.as_deref(),
                key_path: args.dest_key.as_deref(),
                access_key: args.dest_access_key.as_deref(),
                secret_key: args.dest_secret_key.as_deref(),
            },
        )?;

        let config = Self {
            destination,
            base_path,
            credentials,
            overwrite: args.overwrite,
            preserve_owner: args.preserve_owner,
            buffer_size: usize::try_from(buffer_size)
                .map_err(|_| IngestError::config("buffer size is too large"))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without touching any storage system
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(IngestError::config("buffer size must be positive"));
        }
        if !self.base_path.starts_with('/') {
            return Err(IngestError::config(format!(
                "destination base path '{}' must be absolute",
                self.base_path
            )));
        }
        resolve(
            self.destination.scheme(),
            self.destination.authority(),
            &self.credentials,
        )?;
        Ok(())
    }
}

/// Raw credential flags of one side of a job
struct CredentialArgs<'a> {
    user: Option<&'a str>,
    password: Option<&'a str>,
    key_path: Option<&'a str>,
    access_key: Option<&'a str>,
    secret_key: Option<&'a str>,
}

/// Pick the credential variant the scheme needs from the supplied flags
fn build_credentials(scheme: &str, args: CredentialArgs<'_>) -> Result<Credentials> {
    let scheme: Scheme = scheme.parse()?;
    let owned = |s: Option<&str>| s.map(str::to_string);

    Ok(match scheme.credential_kind() {
        CredentialKind::None => Credentials::None,
        CredentialKind::Ftp => Credentials::Ftp {
            username: args.user.unwrap_or_default().to_string(),
            password: owned(args.password),
        },
        CredentialKind::Sftp => Credentials::Sftp {
            username: args.user.unwrap_or_default().to_string(),
            password: owned(args.password),
            key_path: owned(args.key_path),
        },
        CredentialKind::ObjectStore => Credentials::ObjectStore {
            access_key_id: args.access_key.unwrap_or_default().to_string(),
            secret_key_id: args.secret_key.unwrap_or_default().to_string(),
        },
    })
}

/// Split a comma-separated root list, dropping blanks
pub fn parse_roots(roots: &str) -> Vec<String> {
    roots
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("TB") || size.ends_with('T') {
        (size.trim_end_matches(['T', 'B']), 1024u64 * 1024 * 1024 * 1024)
    } else if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Invalid size: {}", size));
    }

    Ok((num * multiplier as f64) as u64)
}
