//! SFTP storage over libssh2

use super::{
    join_path, partial_path, split_authority, AuthParams, ConnectionDescriptor, FileStatus, InputStream,
    OutputStream, StorageClient,
};
use crate::error::{IngestError, Result};
use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, RenameFlags, Session, Sftp};
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 22;

// LIBSSH2_FX_NO_SUCH_FILE
const FX_NO_SUCH_FILE: i32 = 2;

/// SFTP session against one host with one set of credentials
pub struct SftpStorage {
    session: Session,
    sftp: Sftp,
    host: String,
    host_uri: String,
}

impl SftpStorage {
    /// Connect and authenticate
    pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let (host, port) = split_authority(&descriptor.host, DEFAULT_PORT)?;
        let addr = format!("{}:{}", host, port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;

        let mut session = Session::new()
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;

        Self::authenticate(&session, descriptor)?;

        let sftp = session
            .sftp()
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;

        tracing::debug!("SFTP session established to {}", addr);

        Ok(Self {
            session,
            sftp,
            host: descriptor.host.clone(),
            host_uri: descriptor.host_uri(),
        })
    }

    /// Key file first, then password, then the SSH agent
    fn authenticate(session: &Session, descriptor: &ConnectionDescriptor) -> Result<()> {
        let (user, password, key_path) = match &descriptor.auth {
            AuthParams::SshKey {
                username,
                password,
                key_path,
            } => (username, password.as_deref(), key_path.as_deref()),
            other => {
                return Err(IngestError::config(format!(
                    "SFTP requires SSH credentials, got {:?}",
                    other
                )))
            }
        };
        let host = &descriptor.host;

        if let Some(key_path) = key_path {
            // A password alongside a key is the key passphrase
            session
                .userauth_pubkey_file(user, None, Path::new(key_path), password)
                .map_err(|e| IngestError::auth(user, host, e.to_string()))?;
        } else if let Some(password) = password {
            session
                .userauth_password(user, password)
                .map_err(|e| IngestError::auth(user, host, e.to_string()))?;
        } else {
            let mut agent = session
                .agent()
                .map_err(|e| IngestError::auth(user, host, e.to_string()))?;
            agent
                .connect()
                .map_err(|e| IngestError::auth(user, host, e.to_string()))?;
            agent
                .list_identities()
                .map_err(|e| IngestError::auth(user, host, e.to_string()))?;

            let identities = agent.identities().unwrap_or_default();
            let accepted = identities
                .iter()
                .any(|identity| agent.userauth(user, identity).is_ok());
            if !accepted {
                return Err(IngestError::auth(user, host, "No valid SSH key found in agent"));
            }
        }

        if !session.authenticated() {
            return Err(IngestError::auth(user, host, "Authentication failed"));
        }
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(remote(path, e)),
        }
    }

    fn mkdir_all(&self, path: &str, permission: u16) -> Result<()> {
        let mut current = PathBuf::from("/");
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push(component);
            match self.sftp.stat(&current) {
                Ok(stat) if stat.is_dir() => {}
                Ok(_) => {
                    return Err(IngestError::Remote(format!(
                        "path exists but is not a directory: {}",
                        current.display()
                    )))
                }
                Err(e) if is_missing(&e) => self
                    .sftp
                    .mkdir(&current, i32::from(permission))
                    .map_err(|e| remote(&current.to_string_lossy(), e))?,
                Err(e) => return Err(remote(&current.to_string_lossy(), e)),
            }
        }
        Ok(())
    }
}

impl StorageClient for SftpStorage {
    fn host_uri(&self) -> &str {
        &self.host_uri
    }

    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>> {
        let stat = self
            .stat(path)?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        if !stat.is_dir() {
            return Ok(vec![to_status(path, &stat)]);
        }

        let mut children: Vec<FileStatus> = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| remote(path, e))?
            .into_iter()
            .filter_map(|(child, stat)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                Some(to_status(&join_path(path, &name), &stat))
            })
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn status(&mut self, path: &str) -> Result<Option<FileStatus>> {
        Ok(self.stat(path)?.map(|stat| to_status(path, &stat)))
    }

    fn open(&mut self, path: &str, buffer_size: usize) -> Result<Box<dyn InputStream + '_>> {
        let file = self.sftp.open(Path::new(path)).map_err(|e| remote(path, e))?;
        Ok(Box::new(SftpInput {
            reader: BufReader::with_capacity(buffer_size, file),
            path: path.to_string(),
        }))
    }

    fn create(
        &mut self,
        path: &str,
        permission: u16,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>> {
        if let Some(parent) = super::parent_path(path) {
            self.mkdir_all(parent, 0o755)?;
        }
        let staging = partial_path(path);
        let file = self
            .sftp
            .open_mode(
                Path::new(&staging),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                i32::from(permission),
                OpenType::File,
            )
            .map_err(|e| remote(&staging, e))?;

        Ok(Box::new(SftpOutput {
            sftp: &self.sftp,
            writer: Some(BufWriter::with_capacity(buffer_size, file)),
            staging,
            path: path.to_string(),
            committed: false,
        }))
    }

    fn mkdirs(&mut self, path: &str, permission: u16) -> Result<()> {
        self.mkdir_all(path, permission)
    }

    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()> {
        // SFTP v3 only carries numeric ids
        let uid = owner.parse::<u32>().ok();
        let gid = group.parse::<u32>().ok();
        if uid.is_none() && gid.is_none() {
            tracing::warn!(
                "Cannot map owner '{}:{}' to numeric ids on sftp://{}{}, ownership unchanged",
                owner,
                group,
                self.host,
                path
            );
            return Ok(());
        }

        let stat = FileStat {
            size: None,
            uid,
            gid,
            perm: None,
            atime: None,
            mtime: None,
        };
        self.sftp
            .setstat(Path::new(path), stat)
            .map_err(|e| remote(path, e))
    }

    fn close(&mut self) -> Result<()> {
        self.session
            .disconnect(None, "ingest complete", None)
            .map_err(|e| IngestError::connection(&self.host, e.to_string()))
    }
}

struct SftpInput {
    reader: BufReader<ssh2::File>,
    path: String,
}

impl Read for SftpInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl InputStream for SftpInput {
    fn close(self: Box<Self>) -> Result<()> {
        let SftpInput { reader, path } = *self;
        reader.into_inner().close().map_err(|e| remote(&path, e))
    }
}

/// Upload written to a staging sibling, renamed into place on commit
struct SftpOutput<'a> {
    sftp: &'a Sftp,
    writer: Option<BufWriter<ssh2::File>>,
    staging: String,
    path: String,
    committed: bool,
}

impl SftpOutput<'_> {
    fn publish(&self) -> Result<()> {
        let (from, to) = (Path::new(&self.staging), Path::new(&self.path));
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        if self.sftp.rename(from, to, flags).is_ok() {
            return Ok(());
        }
        // SFTP v3 servers refuse to rename onto an existing file
        match self.sftp.unlink(to) {
            Ok(()) => {}
            Err(e) if is_missing(&e) => {}
            Err(e) => return Err(remote(&self.path, e)),
        }
        self.sftp
            .rename(from, to, flags)
            .map_err(|e| remote(&self.path, e))
    }
}

impl Write for SftpOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("upload already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl OutputStream for SftpOutput<'_> {
    fn commit(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let mut file = writer
            .into_inner()
            .map_err(|e| IngestError::streaming(self.path.clone(), e.into_error()))?;
        file.close().map_err(|e| remote(&self.staging, e))?;
        self.publish()?;
        self.committed = true;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let SftpOutput {
            sftp,
            writer,
            staging,
            committed,
            ..
        } = *self;
        if let Some(writer) = writer {
            match writer.into_inner() {
                Ok(mut file) => {
                    if let Err(e) = file.close() {
                        tracing::debug!("Closing abandoned upload {}: {}", staging, e);
                    }
                }
                Err(e) => tracing::debug!("Flushing abandoned upload {}: {}", staging, e.error()),
            }
        }
        if committed {
            return Ok(());
        }
        sftp.unlink(Path::new(&staging))
            .map_err(|e| remote(&staging, e))
    }
}

fn to_status(path: &str, stat: &FileStat) -> FileStatus {
    let is_dir = stat.is_dir();
    FileStatus {
        path: path.to_string(),
        size: if is_dir { 0 } else { stat.size.unwrap_or(0) },
        modification_time: stat.mtime.unwrap_or(0) * 1000,
        owner: stat.uid.map(|u| u.to_string()).unwrap_or_default(),
        group: stat.gid.map(|g| g.to_string()).unwrap_or_default(),
        is_dir,
        permission: stat.perm.map(|p| (p & 0o7777) as u16).unwrap_or(0o644),
    }
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE))
}

fn remote(path: &str, err: ssh2::Error) -> IngestError {
    IngestError::Remote(format!("{}: {}", path, err))
}
