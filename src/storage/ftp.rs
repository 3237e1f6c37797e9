//! FTP storage over suppaftp
//!
//! FTP has no stat primitive; the status of a path is found by listing its
//! parent and matching the name. Transfers use binary mode and hold the
//! control connection until the data stream is finalized.

use super::{
    file_name, join_path, parent_path, partial_path, split_authority, AuthParams, ConnectionDescriptor,
    FileStatus, InputStream, OutputStream, StorageClient,
};
use crate::error::{IngestError, Result};
use std::io::{BufReader, BufWriter, Read, Write};
use std::time::UNIX_EPOCH;
use suppaftp::list::{File as ListEntry, PosixPexQuery};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};

const DEFAULT_PORT: u16 = 21;

/// FTP session against one host with one login
pub struct FtpStorage {
    ftp: FtpStream,
    host: String,
    host_uri: String,
}

impl FtpStorage {
    /// Connect, log in and switch to binary transfers
    pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let (username, password) = match &descriptor.auth {
            AuthParams::Password { username, password } => (username.as_str(), password.as_deref()),
            other => {
                return Err(IngestError::config(format!(
                    "FTP requires a username, got {:?}",
                    other
                )))
            }
        };
        let (host, port) = split_authority(&descriptor.host, DEFAULT_PORT)?;

        let mut ftp = FtpStream::connect(format!("{}:{}", host, port))
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;
        ftp.login(username, password.unwrap_or(""))
            .map_err(|e| IngestError::auth(username, &descriptor.host, e.to_string()))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| IngestError::connection(&descriptor.host, e.to_string()))?;

        tracing::debug!("FTP session established to {}:{}", host, port);

        Ok(Self {
            ftp,
            host: descriptor.host.clone(),
            host_uri: descriptor.host_uri(),
        })
    }

    fn list_dir(&mut self, path: &str) -> Result<Option<Vec<FileStatus>>> {
        let lines = match self.ftp.list(Some(path)) {
            Ok(lines) => lines,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(remote(path, e)),
        };

        let mut children = Vec::new();
        for line in lines {
            match line.parse::<ListEntry>() {
                Ok(entry) if entry.name() == "." || entry.name() == ".." => {}
                Ok(entry) => children.push(to_status(&join_path(path, entry.name()), &entry)),
                Err(e) => tracing::debug!("Ignoring unparsable LIST line '{}': {}", line, e),
            }
        }
        Ok(Some(children))
    }

    fn ensure_dir(&mut self, path: &str) -> Result<()> {
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            if self.ftp.cwd(&current).is_err() {
                self.ftp.mkdir(&current).map_err(|e| remote(&current, e))?;
            }
        }
        Ok(())
    }

    fn chmod(ftp: &mut FtpStream, path: &str, permission: u16) {
        if let Err(e) = ftp.site(format!("CHMOD {:o} {}", permission, path)) {
            tracing::debug!("SITE CHMOD not applied to {}: {}", path, e);
        }
    }
}

impl StorageClient for FtpStorage {
    fn host_uri(&self) -> &str {
        &self.host_uri
    }

    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>> {
        let status = self
            .status(path)?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        if !status.is_dir {
            return Ok(vec![status]);
        }
        let mut children = self
            .list_dir(path)?
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn status(&mut self, path: &str) -> Result<Option<FileStatus>> {
        let Some(parent) = parent_path(path) else {
            return Ok(Some(FileStatus::directory("/")));
        };
        let name = file_name(path);
        let siblings = self.list_dir(parent)?.unwrap_or_default();
        Ok(siblings
            .into_iter()
            .find(|s| s.name() == name)
            .map(|mut s| {
                s.path = path.to_string();
                s
            }))
    }

    fn open(&mut self, path: &str, buffer_size: usize) -> Result<Box<dyn InputStream + '_>> {
        let stream = self.ftp.retr_as_stream(path).map_err(|e| remote(path, e))?;
        Ok(Box::new(FtpInput {
            ftp: &mut self.ftp,
            reader: BufReader::with_capacity(buffer_size, stream),
            path: path.to_string(),
        }))
    }

    fn create(
        &mut self,
        path: &str,
        permission: u16,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>> {
        if let Some(parent) = parent_path(path) {
            self.ensure_dir(parent)?;
        }
        let staging = partial_path(path);
        let stream = self
            .ftp
            .put_with_stream(&staging)
            .map_err(|e| remote(&staging, e))?;
        Ok(Box::new(FtpOutput {
            ftp: &mut self.ftp,
            writer: Some(BufWriter::with_capacity(buffer_size, stream)),
            staging,
            path: path.to_string(),
            permission,
            committed: false,
        }))
    }

    fn mkdirs(&mut self, path: &str, permission: u16) -> Result<()> {
        self.ensure_dir(path)?;
        Self::chmod(&mut self.ftp, path, permission);
        Ok(())
    }

    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()> {
        tracing::warn!(
            "FTP cannot change ownership, leaving ftp://{}{} without {}:{}",
            self.host,
            path,
            owner,
            group
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ftp
            .quit()
            .map_err(|e| IngestError::connection(&self.host, e.to_string()))
    }
}

struct FtpInput<'a, R: Read> {
    ftp: &'a mut FtpStream,
    reader: R,
    path: String,
}

impl<R: Read> Read for FtpInput<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R: Read> InputStream for FtpInput<'_, R> {
    fn close(self: Box<Self>) -> Result<()> {
        let FtpInput { ftp, reader, path } = *self;
        ftp.finalize_retr_stream(reader).map_err(|e| remote(&path, e))
    }
}

/// Upload stored under a staging name, renamed into place on commit
struct FtpOutput<'a, W: Write> {
    ftp: &'a mut FtpStream,
    writer: Option<W>,
    staging: String,
    path: String,
    permission: u16,
    committed: bool,
}

impl<W: Write> FtpOutput<'_, W> {
    fn publish(&mut self) -> Result<()> {
        if self.ftp.rename(&self.staging, &self.path).is_ok() {
            return Ok(());
        }
        // Some servers refuse to rename onto an existing file
        match self.ftp.rm(&self.path) {
            Ok(()) => {}
            Err(e) if is_missing(&e) => {}
            Err(e) => return Err(remote(&self.path, e)),
        }
        self.ftp
            .rename(&self.staging, &self.path)
            .map_err(|e| remote(&self.path, e))
    }
}

impl<W: Write> Write for FtpOutput<'_, W> {
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

impl<W: Write> OutputStream for FtpOutput<'_, W> {
    fn commit(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .flush()
            .map_err(|e| IngestError::streaming(self.path.clone(), e))?;
        self.ftp
            .finalize_put_stream(writer)
            .map_err(|e| remote(&self.staging, e))?;
        self.publish()?;
        self.committed = true;
        FtpStorage::chmod(self.ftp, &self.path, self.permission);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        // Uncommitted uploads still have to release the data channel
        if let Some(writer) = self.writer.take() {
            if let Err(e) = self.ftp.finalize_put_stream(writer) {
                tracing::debug!("Finalizing abandoned upload {}: {}", self.staging, e);
            }
        }
        if self.committed {
            return Ok(());
        }
        self.ftp
            .rm(&self.staging)
            .map_err(|e| remote(&self.staging, e))
    }
}

fn to_status(path: &str, entry: &ListEntry) -> FileStatus {
    let is_dir = entry.is_directory();
    let modification_time = entry
        .modified()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    FileStatus {
        path: path.to_string(),
        size: if is_dir { 0 } else { entry.size() as u64 },
        modification_time,
        owner: entry.uid().map(|u| u.to_string()).unwrap_or_default(),
        group: entry.gid().map(|g| g.to_string()).unwrap_or_default(),
        is_dir,
        permission: mode_bits(entry),
    }
}

fn mode_bits(entry: &ListEntry) -> u16 {
    let mut mode = 0u16;
    for (shift, who) in [
        (6, PosixPexQuery::Owner),
        (3, PosixPexQuery::Group),
        (0, PosixPexQuery::Others),
    ] {
        let mut bits = 0u16;
        if entry.can_read(who) {
            bits |= 0o4;
        }
        if entry.can_write(who) {
            bits |= 0o2;
        }
        if entry.can_execute(who) {
            bits |= 0o1;
        }
        mode |= bits << shift;
    }
    mode
}

fn is_missing(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
}

fn remote(path: &str, err: FtpError) -> IngestError {
    IngestError::Remote(format!("{}: {}", path, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_unix_listing() {
        let entry: ListEntry = "-rw-r----- 1 1001 1002 1024 Jan 01 2020 data.csv"
            .parse()
            .unwrap();
        let status = to_status("/in/data.csv", &entry);
        assert_eq!(status.size, 1024);
        assert_eq!(status.permission, 0o640);
        assert!(!status.is_dir);
        assert_eq!(status.name(), "data.csv");
    }

    #[test]
    fn test_directory_listing_has_zero_size() {
        let entry: ListEntry = "drwxr-xr-x 2 ftp ftp 4096 Mar 15 2021 folderA"
            .parse()
            .unwrap();
        let status = to_status("/in/folderA", &entry);
        assert!(status.is_dir);
        assert_eq!(status.size, 0);
        assert_eq!(status.permission, 0o755);
    }
}
