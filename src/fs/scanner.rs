//! Discovery walk
//!
//! Enumerates files and directories below configured roots on one storage
//! system. Listing is done one directory at a time instead of with a
//! recursive listing call: recursive listings of most storage systems omit
//! empty directories, and those must still be recreated at the destination.

use super::entry::{Credentials, Entry, HostUri};
use crate::error::Result;
use crate::storage::{resolve, Connector, FileStatus, OpenConnection, StorageClient};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Result of a discovery walk
#[derive(Debug, Serialize)]
pub struct ScanResult {
    /// Every discovered entry, files and directories alike
    pub entries: Vec<Entry>,
    /// Total size of all files
    pub total_size: u64,
    /// Number of files
    pub file_count: usize,
    /// Number of directories
    pub dir_count: usize,
    /// Roots that did not exist and were skipped
    pub missing_roots: Vec<String>,
    /// Time taken to walk
    #[serde(skip)]
    pub scan_duration: Duration,
}

impl ScanResult {
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

/// Walks source roots on a single host with a single set of credentials
pub struct Scanner<'a> {
    connector: &'a dyn Connector,
    host: HostUri,
    credentials: Credentials,
}

impl<'a> Scanner<'a> {
    pub fn new(connector: &'a dyn Connector, host: HostUri, credentials: Credentials) -> Self {
        Self {
            connector,
            host,
            credentials,
        }
    }

    /// Discover all entries below `roots`
    ///
    /// Missing roots are logged and skipped. Every other listing failure
    /// aborts discovery.
    pub fn discover(&self, roots: &[String], recursive: bool) -> Result<ScanResult> {
        let start_time = Instant::now();
        let descriptor = resolve(self.host.scheme(), self.host.authority(), &self.credentials)?;
        let mut connection = OpenConnection::open(self.connector, &descriptor)?;

        let mut entries = Vec::new();
        let mut missing_roots = Vec::new();

        for root in roots {
            tracing::info!("Discovering {}{}", self.host, root.trim_start_matches('/'));
            match connection.list(root) {
                Ok(children) => {
                    self.visit(&mut *connection, root, children, recursive, &mut entries)?
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!("Source root {} does not exist, skipping", root);
                    missing_roots.push(root.clone());
                }
                Err(e) => return Err(e.with_context(format!("listing source root {}", root))),
            }
        }

        let file_count = entries.iter().filter(|e| !e.is_dir()).count();
        let result = ScanResult {
            total_size: entries.iter().map(Entry::file_size).sum(),
            file_count,
            dir_count: entries.len() - file_count,
            entries,
            missing_roots,
            scan_duration: start_time.elapsed(),
        };

        tracing::info!(
            "Discovered {} files and {} directories ({} bytes) in {:?}",
            result.file_count,
            result.dir_count,
            result.total_size,
            result.scan_duration
        );
        Ok(result)
    }

    /// Depth-first: each child is emitted before its own children
    fn visit(
        &self,
        client: &mut dyn StorageClient,
        root: &str,
        children: Vec<FileStatus>,
        recursive: bool,
        out: &mut Vec<Entry>,
    ) -> Result<()> {
        for child in children {
            out.push(Entry::from_status(&child, root, &self.host, self.credentials.clone())?);

            if child.is_dir && recursive {
                match client.list(&child.path) {
                    Ok(grandchildren) => self.visit(client, root, grandchildren, recursive, out)?,
                    Err(e) if e.is_not_found() => {
                        tracing::warn!("Directory {} vanished during discovery", child.path)
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{Call, MemoryConnector, MemoryStorage};
    use crate::storage::{ConnectOptions, DefaultConnector};
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn local() -> HostUri {
        HostUri::new("file", "").unwrap()
    }

    /// folderA holds 100, 2 and 3 bytes; folderB holds 1, 200 and 300 bytes
    fn sample_storage() -> MemoryStorage {
        let storage = MemoryStorage::new("file:///");
        storage
            .add_file("/folderA/a1", &[0; 100])
            .add_file("/folderA/a2", &[0; 2])
            .add_file("/folderA/a3", &[0; 3])
            .add_file("/folderB/b1", &[0; 1])
            .add_file("/folderB/b2", &[0; 200])
            .add_file("/folderB/b3", &[0; 300]);
        storage
    }

    #[test]
    fn test_discover_includes_directories() {
        let storage = sample_storage();
        let connector = MemoryConnector::new().with(&storage);
        let scanner = Scanner::new(&connector, local(), Credentials::None);

        let result = scanner.discover(&["/".to_string()], true).unwrap();
        assert_eq!(result.entries.len(), 8);
        assert_eq!(result.dir_count, 2);
        assert_eq!(result.total_size, 606);

        let rel: Vec<_> = result.entries.iter().map(|e| e.relative_path()).collect();
        assert!(rel.contains(&"folderA"));
        assert!(rel.contains(&"folderB/b3"));
        assert!(result.entries.iter().all(|e| e.host_uri() == "file:///"));
    }

    #[test]
    fn test_discover_empty_directories() {
        let storage = MemoryStorage::new("file:///");
        storage.add_dir("/src/empty/deeper");
        let connector = MemoryConnector::new().with(&storage);
        let scanner = Scanner::new(&connector, local(), Credentials::None);

        let entries = scanner.discover(&["/src".to_string()], true).unwrap().into_entries();
        let rel: Vec<_> = entries.iter().map(|e| e.relative_path().to_string()).collect();
        assert_eq!(rel, vec!["src/empty", "src/empty/deeper"]);
    }

    #[test]
    fn test_non_recursive_lists_one_level() {
        let storage = sample_storage();
        let connector = MemoryConnector::new().with(&storage);
        let scanner = Scanner::new(&connector, local(), Credentials::None);

        let entries = scanner.discover(&["/".to_string()], false).unwrap().into_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_dir()));
        assert_eq!(
            storage.calls().iter().filter(|c| matches!(c, Call::List(_))).count(),
            1
        );
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let storage = sample_storage();
        let connector = MemoryConnector::new().with(&storage);
        let scanner = Scanner::new(&connector, local(), Credentials::None);

        let roots = vec!["/nope".to_string(), "/folderA".to_string()];
        let result = scanner.discover(&roots, true).unwrap();
        assert_eq!(result.missing_roots, vec!["/nope".to_string()]);
        assert_eq!(result.file_count, 3);
        assert_eq!(result.entries[0].relative_path(), "folderA/a1");
    }

    #[test]
    fn test_connection_closed_after_walk() {
        let storage = sample_storage();
        let connector = MemoryConnector::new().with(&storage);
        let scanner = Scanner::new(&connector, local(), Credentials::None);

        scanner.discover(&["/folderB".to_string()], true).unwrap();
        assert_eq!(storage.calls().last(), Some(&Call::Close));
        assert_eq!(connector.connects(), vec!["file:///".to_string()]);
    }

    #[test]
    fn test_entries_carry_credentials() {
        let storage = MemoryStorage::new("sftp://host/");
        storage.add_file("/in/x.dat", b"xyz");
        let connector = MemoryConnector::new().with(&storage);
        let creds = Credentials::Sftp {
            username: "ingest".to_string(),
            password: Some("pw".to_string()),
            key_path: None,
        };
        let scanner = Scanner::new(&connector, HostUri::new("sftp", "host").unwrap(), creds.clone());

        let entries = scanner.discover(&["/in".to_string()], true).unwrap().into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].credentials(), &creds);
        assert_eq!(entries[0].host_uri(), "sftp://host/");
    }

    #[test]
    fn test_unsupported_scheme_fails_before_io() {
        let connector = MemoryConnector::new();
        let scanner = Scanner::new(&connector, HostUri::new("gopher", "h").unwrap(), Credentials::None);
        let err = scanner.discover(&["/".to_string()], true).unwrap_err();
        assert!(err.is_configuration());
        assert!(connector.connects().is_empty());
    }

    #[test]
    fn test_discover_local_tree() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("small.txt"))
            .unwrap()
            .write_all(b"small file")
            .unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        File::create(dir.path().join("subdir/nested.txt"))
            .unwrap()
            .write_all(b"nested")
            .unwrap();

        let connector = DefaultConnector::new(ConnectOptions::default());
        let scanner = Scanner::new(&connector, local(), Credentials::None);
        let root = dir.path().to_string_lossy().into_owned();
        let result = scanner.discover(&[root], true).unwrap();

        assert_eq!(result.file_count, 2);
        assert_eq!(result.dir_count, 2);
        assert_eq!(result.total_size, 16);

        let base = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(result
            .entries
            .iter()
            .any(|e| e.relative_path() == format!("{}/subdir/nested.txt", base)));
    }
}
