//! S3-compatible object stores over the AWS SDK
//!
//! The host of an `s3a://` or `s3n://` URI is the bucket and the path is the
//! object key. Directories are key prefixes: listings use the `/` delimiter
//! and report common prefixes as directories, and `mkdirs` writes an empty
//! `key/` marker object so that empty directories survive.
//!
//! The SDK is async; each client owns a current-thread runtime and blocks on
//! it so that the synchronous [`StorageClient`] contract holds.

use super::{
    AuthParams, ConnectOptions, ConnectionDescriptor, FileStatus, InputStream, OutputStream,
    StorageClient,
};
use crate::error::{IngestError, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::io::{BufWriter, Read, Write};
use std::pin::Pin;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Runtime;

const DEFAULT_REGION: &str = "us-east-1";
const FILE_MODE: u16 = 0o666;
const DIR_MODE: u16 = 0o777;

/// Object-store session bound to one bucket and one key pair
pub struct S3Storage {
    runtime: Runtime,
    client: Client,
    bucket: String,
    host_uri: String,
}

impl S3Storage {
    /// Build an SDK client with the descriptor's static keys
    pub fn connect(descriptor: &ConnectionDescriptor, options: &ConnectOptions) -> Result<Self> {
        let (key_id, secret) = match &descriptor.auth {
            AuthParams::AccessKeys {
                access_key_id,
                secret_access_key,
            } => (access_key_id, secret_access_key),
            other => {
                return Err(IngestError::config(format!(
                    "object stores require access keys, got {:?}",
                    other
                )))
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;

        let region = options
            .s3_region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));

        if let Some(ref endpoint) = options.s3_endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let creds = aws_credential_types::Credentials::new(
            key_id,
            secret,
            None, // session token
            None, // expiry
            "fileingest-static",
        );
        aws_config_builder = aws_config_builder.credentials_provider(creds);

        let aws_config = runtime.block_on(aws_config_builder.load());

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if options.s3_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        tracing::debug!("Object-store client ready for bucket '{}'", descriptor.host);

        Ok(Self {
            runtime,
            client: Client::from_conf(s3_config.build()),
            bucket: descriptor.host.clone(),
            host_uri: descriptor.host_uri(),
        })
    }

    fn remote(&self, op: &str, key: &str, err: impl std::fmt::Display) -> IngestError {
        IngestError::Remote(format!("{} failed for {}{}: {}", op, self.host_uri, key, err))
    }

    fn head(&self, key: &str) -> Result<Option<FileStatus>> {
        let result = self
            .runtime
            .block_on(self.client.head_object().bucket(&self.bucket).key(key).send());
        match result {
            Ok(head) => Ok(Some(FileStatus {
                path: format!("/{}", key),
                size: head.content_length().unwrap_or(0).max(0) as u64,
                modification_time: head
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .unwrap_or(0)
                    .max(0) as u64,
                owner: String::new(),
                group: String::new(),
                is_dir: false,
                permission: FILE_MODE,
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(self.remote("head_object", key, e)),
        }
    }

    /// One delimited listing pass below a prefix, following continuation tokens
    fn list_prefix(&self, prefix: &str, limit: Option<i32>) -> Result<Vec<FileStatus>> {
        let mut children = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .runtime
                .block_on(
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .delimiter("/")
                        .set_max_keys(limit)
                        .set_continuation_token(token.take())
                        .send(),
                )
                .map_err(|e| self.remote("list_objects_v2", prefix, e))?;

            for object in resp.contents() {
                let key = object.key().unwrap_or_default();
                // The directory marker itself
                if key == prefix || key.is_empty() {
                    continue;
                }
                children.push(FileStatus {
                    path: format!("/{}", key.trim_end_matches('/')),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    modification_time: object
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0)
                        .max(0) as u64,
                    owner: String::new(),
                    group: String::new(),
                    is_dir: key.ends_with('/'),
                    permission: if key.ends_with('/') { DIR_MODE } else { FILE_MODE },
                });
            }
            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    let mut dir = FileStatus::directory(format!("/{}", p.trim_end_matches('/')));
                    dir.permission = DIR_MODE;
                    children.push(dir);
                }
            }

            if limit.is_some() || resp.is_truncated() != Some(true) {
                break;
            }
            token = resp.next_continuation_token().map(String::from);
            if token.is_none() {
                break;
            }
        }
        Ok(children)
    }
}

fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn dir_prefix(path: &str) -> String {
    let key = object_key(path).trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

impl StorageClient for S3Storage {
    fn host_uri(&self) -> &str {
        &self.host_uri
    }

    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>> {
        let status = self
            .status(path)?
            .ok_or_else(|| IngestError::NotFound(format!("{}{}", self.host_uri, object_key(path))))?;
        if !status.is_dir {
            return Ok(vec![status]);
        }
        let mut children = self.list_prefix(&dir_prefix(path), None)?;
        children.sort_by(|a, b| a.path.cmp(&b.path));
        children.dedup_by(|a, b| a.path == b.path);
        Ok(children)
    }

    fn status(&mut self, path: &str) -> Result<Option<FileStatus>> {
        let key = object_key(path).trim_end_matches('/');
        if key.is_empty() {
            let mut root = FileStatus::directory("/");
            root.permission = DIR_MODE;
            return Ok(Some(root));
        }
        if let Some(file) = self.head(key)? {
            return Ok(Some(file));
        }

        // A directory exists if anything lives below its prefix, marker included
        let prefix = dir_prefix(path);
        let marker = self.head(&prefix)?;
        let any_child = marker.is_some() || !self.list_prefix(&prefix, Some(1))?.is_empty();
        Ok(any_child.then(|| {
            let mut dir = FileStatus::directory(format!("/{}", key));
            dir.permission = DIR_MODE;
            dir
        }))
    }

    fn open(&mut self, path: &str, _buffer_size: usize) -> Result<Box<dyn InputStream + '_>> {
        let key = object_key(path);
        let resp = self
            .runtime
            .block_on(self.client.get_object().bucket(&self.bucket).key(key).send())
            .map_err(|e| self.remote("get_object", key, e))?;

        Ok(Box::new(S3Input {
            runtime: &self.runtime,
            body: Box::pin(resp.body.into_async_read()),
        }))
    }

    fn create(
        &mut self,
        path: &str,
        _permission: u16,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>> {
        let staging = NamedTempFile::new()?;
        Ok(Box::new(S3Output {
            storage: self,
            key: object_key(path).to_string(),
            staging: Some(BufWriter::with_capacity(buffer_size, staging)),
        }))
    }

    fn mkdirs(&mut self, path: &str, _permission: u16) -> Result<()> {
        let marker = dir_prefix(path);
        if marker.is_empty() {
            return Ok(());
        }
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&marker)
                    .body(ByteStream::from_static(b""))
                    .send(),
            )
            .map_err(|e| self.remote("put_object", &marker, e))?;
        Ok(())
    }

    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()> {
        tracing::debug!(
            "Object stores have no ownership, ignoring {}:{} for {}{}",
            owner,
            group,
            self.host_uri,
            object_key(path)
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct S3Input<'a> {
    runtime: &'a Runtime,
    body: Pin<Box<dyn AsyncRead + Send>>,
}

impl Read for S3Input<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.runtime.block_on(self.body.read(buf))
    }
}

impl InputStream for S3Input<'_> {
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Upload staged in a local temp file, sent on commit
struct S3Output<'a> {
    storage: &'a S3Storage,
    key: String,
    staging: Option<BufWriter<NamedTempFile>>,
}

impl Write for S3Output<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.staging.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("upload already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.staging.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl OutputStream for S3Output<'_> {
    fn commit(&mut self) -> Result<()> {
        let Some(writer) = self.staging.take() else {
            return Ok(());
        };
        let staged = writer
            .into_inner()
            .map_err(|e| IngestError::streaming(self.key.clone(), e.into_error()))?;

        let storage = self.storage;
        let body = storage
            .runtime
            .block_on(ByteStream::from_path(staged.path()))
            .map_err(|e| storage.remote("staging read", &self.key, e))?;

        storage
            .runtime
            .block_on(
                storage
                    .client
                    .put_object()
                    .bucket(&storage.bucket)
                    .key(&self.key)
                    .body(body)
                    .send(),
            )
            .map_err(|e| storage.remote("put_object", &self.key, e))?;

        tracing::debug!("Uploaded {}{}", storage.host_uri, self.key);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping the staging file removes it
        Ok(())
    }
}
