//! In-memory storage for tests
//!
//! Every client call is recorded so tests can assert on call sequences
//! (which paths were streamed, whether streams and sessions were closed).
//! Clients handed out by [`MemoryConnector`] share state with the
//! [`MemoryStorage`] registered for their host.

use super::{
    parent_path, ConnectionDescriptor, Connector, FileStatus, InputStream, LocalStorage,
    OutputStream, StorageClient,
};
use crate::error::{IngestError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String),
    Status(String),
    Open(String),
    InputClosed(String),
    Create(String, u16),
    Committed(String),
    OutputClosed(String),
    Mkdirs(String, u16),
    SetOwner(String, String, String),
    Close,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, (FileStatus, Vec<u8>)>,
    calls: Vec<Call>,
    fail_reads: HashSet<String>,
    fail_input_close: bool,
    fail_output_close: bool,
    fail_session_close: bool,
}

impl State {
    fn insert_dirs(&mut self, path: &str, permission: u16) {
        let mut current = Some(normalize(path));
        while let Some(dir) = current {
            if dir.is_empty() || dir == "/" {
                break;
            }
            self.nodes.entry(dir.clone()).or_insert_with(|| {
                let mut status = FileStatus::directory(dir.clone());
                status.permission = permission;
                (status, Vec::new())
            });
            current = parent_path(&dir).map(str::to_string);
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Shared in-memory filesystem for one host
#[derive(Clone)]
pub struct MemoryStorage {
    host_uri: String,
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    pub fn new(host_uri: &str) -> Self {
        Self {
            host_uri: host_uri.to_string(),
            state: Arc::default(),
        }
    }

    /// Add a file (and any missing parent directories)
    pub fn add_file(&self, path: &str, data: &[u8]) -> &Self {
        let mut state = self.state.lock().unwrap();
        if let Some(parent) = parent_path(path) {
            state.insert_dirs(parent, 0o755);
        }
        let mut status = FileStatus::file(normalize(path), data.len() as u64);
        status.owner = "alice".to_string();
        status.group = "staff".to_string();
        state.nodes.insert(normalize(path), (status, data.to_vec()));
        self
    }

    /// Add a directory (and any missing parents)
    pub fn add_dir(&self, path: &str) -> &Self {
        self.state.lock().unwrap().insert_dirs(path, 0o755);
        self
    }

    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().nodes.remove(&normalize(path));
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(&normalize(path))
            .filter(|(s, _)| !s.is_dir)
            .map(|(_, data)| data.clone())
    }

    pub fn stat(&self, path: &str) -> Option<FileStatus> {
        let state = self.state.lock().unwrap();
        state.nodes.get(&normalize(path)).map(|(s, _)| s.clone())
    }

    /// Every path currently stored, with file contents
    pub fn snapshot(&self) -> BTreeMap<String, (bool, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .map(|(k, (s, d))| (k.clone(), (s.is_dir, d.clone())))
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Reads of this path fail after the stream is opened
    pub fn fail_reads_of(&self, path: &str) {
        self.state.lock().unwrap().fail_reads.insert(normalize(path));
    }

    /// Undo every `fail_reads_of`
    pub fn restore_reads(&self) {
        self.state.lock().unwrap().fail_reads.clear();
    }

    pub fn fail_input_close(&self) {
        self.state.lock().unwrap().fail_input_close = true;
    }

    pub fn fail_output_close(&self) {
        self.state.lock().unwrap().fail_output_close = true;
    }

    pub fn fail_session_close(&self) {
        self.state.lock().unwrap().fail_session_close = true;
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl StorageClient for MemoryStorage {
    fn host_uri(&self) -> &str {
        &self.host_uri
    }

    fn list(&mut self, path: &str) -> Result<Vec<FileStatus>> {
        self.record(Call::List(path.to_string()));
        let path = normalize(path);
        let state = self.state.lock().unwrap();

        if path != "/" {
            match state.nodes.get(&path) {
                None => return Err(IngestError::NotFound(path)),
                Some((status, _)) if !status.is_dir => return Ok(vec![status.clone()]),
                Some(_) => {}
            }
        }
        Ok(state
            .nodes
            .values()
            .filter(|(s, _)| parent_path(&s.path).map(normalize) == Some(path.clone()))
            .map(|(s, _)| s.clone())
            .collect())
    }

    fn status(&mut self, path: &str) -> Result<Option<FileStatus>> {
        self.record(Call::Status(path.to_string()));
        if normalize(path) == "/" {
            return Ok(Some(FileStatus::directory("/")));
        }
        Ok(self.stat(path))
    }

    fn open(&mut self, path: &str, _buffer_size: usize) -> Result<Box<dyn InputStream + '_>> {
        self.record(Call::Open(path.to_string()));
        let data = self
            .contents(path)
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        let fail = self.state.lock().unwrap().fail_reads.contains(&normalize(path));
        Ok(Box::new(MemoryInput {
            data: Cursor::new(data),
            fail,
            path: path.to_string(),
            storage: self.clone(),
        }))
    }

    fn create(
        &mut self,
        path: &str,
        permission: u16,
        _buffer_size: usize,
    ) -> Result<Box<dyn OutputStream + '_>> {
        self.record(Call::Create(path.to_string(), permission));
        Ok(Box::new(MemoryOutput {
            buffer: Vec::new(),
            path: path.to_string(),
            permission,
            storage: self.clone(),
        }))
    }

    fn mkdirs(&mut self, path: &str, permission: u16) -> Result<()> {
        self.record(Call::Mkdirs(path.to_string(), permission));
        self.state.lock().unwrap().insert_dirs(path, permission);
        Ok(())
    }

    fn set_owner(&mut self, path: &str, owner: &str, group: &str) -> Result<()> {
        self.record(Call::SetOwner(
            path.to_string(),
            owner.to_string(),
            group.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        let (status, _) = state
            .nodes
            .get_mut(&normalize(path))
            .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
        status.owner = owner.to_string();
        status.group = group.to_string();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record(Call::Close);
        if self.state.lock().unwrap().fail_session_close {
            return Err(IngestError::connection(&self.host_uri, "injected close failure"));
        }
        Ok(())
    }
}

struct MemoryInput {
    data: Cursor<Vec<u8>>,
    fail: bool,
    path: String,
    storage: MemoryStorage,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.fail {
            return Err(std::io::Error::other(format!("injected read failure: {}", self.path)));
        }
        self.data.read(buf)
    }
}

impl InputStream for MemoryInput {
    fn close(self: Box<Self>) -> Result<()> {
        self.storage.record(Call::InputClosed(self.path.clone()));
        if self.storage.state.lock().unwrap().fail_input_close {
            return Err(IngestError::Remote("injected input close failure".to_string()));
        }
        Ok(())
    }
}

struct MemoryOutput {
    buffer: Vec<u8>,
    path: String,
    permission: u16,
    storage: MemoryStorage,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputStream for MemoryOutput {
    fn commit(&mut self) -> Result<()> {
        self.storage.record(Call::Committed(self.path.clone()));
        let mut state = self.storage.state.lock().unwrap();
        if let Some(parent) = parent_path(&self.path) {
            state.insert_dirs(parent, 0o755);
        }
        let mut status = FileStatus::file(normalize(&self.path), self.buffer.len() as u64);
        status.permission = self.permission;
        state
            .nodes
            .insert(normalize(&self.path), (status, self.buffer.clone()));
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.storage.record(Call::OutputClosed(self.path.clone()));
        if self.storage.state.lock().unwrap().fail_output_close {
            return Err(IngestError::Remote("injected output close failure".to_string()));
        }
        Ok(())
    }
}

/// Connector serving registered in-memory hosts
///
/// Hosts can also be served by a [`LocalStorage`] rooted in a test
/// directory, to run the engine against a sink that writes real files.
#[derive(Default)]
pub struct MemoryConnector {
    hosts: HashMap<String, MemoryStorage>,
    mounts: HashMap<String, PathBuf>,
    connects: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `storage` for its host URI
    pub fn with(mut self, storage: &MemoryStorage) -> Self {
        self.hosts.insert(storage.host_uri.clone(), storage.clone());
        self
    }

    /// Serve `host_uri` from a local directory
    pub fn with_local(mut self, host_uri: &str, mount: &Path) -> Self {
        self.mounts.insert(host_uri.to_string(), mount.to_path_buf());
        self
    }

    /// Host URIs of every session opened so far, in order
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn StorageClient>> {
        let uri = descriptor.host_uri();
        self.connects.lock().unwrap().push(uri.clone());
        if let Some(mount) = self.mounts.get(&uri) {
            return Ok(Box::new(LocalStorage::rooted(uri, mount)));
        }
        self.hosts
            .get(&uri)
            .map(|s| Box::new(s.clone()) as Box<dyn StorageClient>)
            .ok_or_else(|| IngestError::connection(uri, "no in-memory host registered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_name;

    #[test]
    fn test_memory_listing_matches_client_contract() {
        let storage = MemoryStorage::new("file:///");
        storage.add_file("/data/a.txt", b"abc").add_dir("/data/empty");

        let mut client = storage.clone();
        let children = client.list("/data").unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(file_name(&children[0].path), "a.txt");
        assert!(children[1].is_dir);

        assert_eq!(client.list("/data/a.txt").unwrap().len(), 1);
        assert!(client.list("/missing").unwrap_err().is_not_found());
        assert_eq!(client.list("/").unwrap().len(), 1);
    }
}
