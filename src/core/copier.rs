//! Unit copy engine
//!
//! Executes one work unit: every entry is materialized under the destination
//! base path in unit order, one at a time.
//!
//! Connection lifetime is scoped to a single [`CopyEngine::execute`] call.
//! Source sessions are cached per host URI inside that call and released
//! when the cache goes out of scope, on success and on failure alike.

use crate::config::SinkConfig;
use crate::core::WorkUnit;
use crate::error::{IngestError, Result};
use crate::fs::{Entry, HostUri};
use crate::progress::ProgressReporter;
use crate::storage::{
    join_path, resolve, Connector, InputStream, OpenConnection, OutputStream, StorageClient,
};
use serde::Serialize;
use std::collections::hash_map::{self, HashMap};
use std::io::{ErrorKind, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why an entry was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The entry is the source root itself
    EmptyRelativePath,
    /// Overwrite is disabled and the destination path is present
    DestinationExists,
    /// The source vanished after discovery
    SourceMissing,
}

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    Copied { bytes: u64 },
    DirectoryCreated,
    Skipped { reason: SkipReason },
}

impl EntryOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Bytes moved for this entry
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Copied { bytes } => *bytes,
            _ => 0,
        }
    }
}

/// Outcome of one entry, keyed by its relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub relative_path: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

/// Result of executing one work unit
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnitReport {
    /// Per-entry outcomes in unit order
    pub entries: Vec<EntryReport>,
    /// Files streamed
    pub files_copied: u64,
    /// Directories created
    pub dirs_created: u64,
    /// Entries left alone
    pub skipped: u64,
    /// Bytes streamed
    pub bytes_copied: u64,
    /// Wall time of the unit
    pub duration: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}

impl UnitReport {
    fn record(&mut self, entry: &Entry, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Copied { bytes } => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
            }
            EntryOutcome::DirectoryCreated => self.dirs_created += 1,
            EntryOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.entries.push(EntryReport {
            relative_path: entry.relative_path().to_string(),
            outcome,
        });
    }

    fn finish(&mut self, duration: Duration) {
        self.duration = duration;
        self.throughput = if duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
    }

    /// Print unit summary
    pub fn print_summary(&self) {
        println!("Unit Summary:");
        println!("  Files copied:   {}", self.files_copied);
        println!("  Dirs created:   {}", self.dirs_created);
        println!("  Skipped:        {}", self.skipped);
        println!(
            "  Bytes copied:   {}",
            humansize::format_size(self.bytes_copied, humansize::BINARY)
        );
        println!("  Duration:       {:.2?}", self.duration);
        println!(
            "  Throughput:     {}/s",
            humansize::format_size(self.throughput as u64, humansize::BINARY)
        );
    }
}

/// Copies the entries of a work unit to one destination
pub struct CopyEngine<'a> {
    sink: SinkConfig,
    connector: &'a dyn Connector,
    progress: Option<Arc<ProgressReporter>>,
}

impl<'a> CopyEngine<'a> {
    pub fn new(sink: SinkConfig, connector: &'a dyn Connector) -> Self {
        Self {
            sink,
            connector,
            progress: None,
        }
    }

    /// Report per-entry progress to a shared reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn progress(&self) -> Option<&Arc<ProgressReporter>> {
        self.progress.as_ref()
    }

    /// Execute one work unit
    ///
    /// A streaming failure aborts the unit. Entries finished before it stay
    /// at the destination; nothing is rolled back. The file being streamed
    /// is never committed, so a re-run copies it again.
    pub fn execute(&self, unit: &WorkUnit) -> Result<UnitReport> {
        let start_time = Instant::now();
        let mut report = UnitReport::default();

        if unit.is_empty() {
            report.finish(start_time.elapsed());
            return Ok(report);
        }

        let destination = &self.sink.destination;
        let descriptor = resolve(
            destination.scheme(),
            destination.authority(),
            &self.sink.credentials,
        )?;
        let mut sink = OpenConnection::open(self.connector, &descriptor)?;
        let mut sources: HashMap<String, OpenConnection> = HashMap::new();

        tracing::info!(
            "Executing unit of {} entries ({} bytes) into {}{}",
            unit.len(),
            unit.total_bytes(),
            destination,
            self.sink.base_path.trim_start_matches('/')
        );

        for (done, entry) in unit.entries().iter().enumerate() {
            let outcome = self
                .copy_entry(entry, &mut *sink, &mut sources)
                .map_err(|e| {
                    e.with_context(format!(
                        "unit aborted at '{}' after {} of {} entries",
                        entry.full_path(),
                        done,
                        unit.len()
                    ))
                })?;
            if let Some(progress) = &self.progress {
                progress.entry_done(outcome.bytes());
            }
            report.record(entry, outcome);
        }

        report.finish(start_time.elapsed());
        tracing::info!(
            "Unit finished: {} files, {} directories, {} skipped, {} bytes in {:.2?}",
            report.files_copied,
            report.dirs_created,
            report.skipped,
            report.bytes_copied,
            report.duration
        );
        Ok(report)
    }

    fn copy_entry(
        &self,
        entry: &Entry,
        sink: &mut dyn StorageClient,
        sources: &mut HashMap<String, OpenConnection>,
    ) -> Result<EntryOutcome> {
        if entry.relative_path().is_empty() {
            tracing::debug!("Nothing to materialize for root {}", entry.full_path());
            return Ok(EntryOutcome::skipped(SkipReason::EmptyRelativePath));
        }

        let target = join_path(&self.sink.base_path, entry.relative_path());
        if !self.sink.overwrite && sink.exists(&target)? {
            tracing::debug!("Destination {} exists, skipping", target);
            return Ok(EntryOutcome::skipped(SkipReason::DestinationExists));
        }

        if let Some(progress) = &self.progress {
            progress.set_current_entry(entry.relative_path());
        }

        let source = self.source_connection(entry, sources)?;
        if entry.is_dir() {
            return self.copy_directory(entry, &mut **source, sink, &target);
        }

        if !source.exists(entry.full_path())? {
            tracing::warn!(
                "Source {}{} no longer exists, skipping",
                entry.host_uri(),
                entry.full_path().trim_start_matches('/')
            );
            return Ok(EntryOutcome::skipped(SkipReason::SourceMissing));
        }
        self.copy_file(entry, &mut **source, sink, &target)
    }

    /// Cached session to the entry's source host, opened on first use
    fn source_connection<'c>(
        &self,
        entry: &Entry,
        sources: &'c mut HashMap<String, OpenConnection>,
    ) -> Result<&'c mut OpenConnection> {
        match sources.entry(entry.host_uri().to_string()) {
            hash_map::Entry::Occupied(slot) => Ok(slot.into_mut()),
            hash_map::Entry::Vacant(slot) => {
                let host = HostUri::parse(entry.host_uri())?;
                let descriptor = resolve(host.scheme(), host.authority(), entry.credentials())?;
                let connection = OpenConnection::open(self.connector, &descriptor)?;
                tracing::debug!("Opened source session to {}", connection.host_uri());
                Ok(slot.insert(connection))
            }
        }
    }

    fn copy_directory(
        &self,
        entry: &Entry,
        source: &mut dyn StorageClient,
        sink: &mut dyn StorageClient,
        target: &str,
    ) -> Result<EntryOutcome> {
        // Also reached with overwrite on: an existing directory, including one
        // created earlier as a file's parent, keeps its mode and owner
        if sink.exists(target)? {
            return Ok(EntryOutcome::skipped(SkipReason::DestinationExists));
        }
        if !source.is_dir(entry.full_path())? {
            tracing::warn!(
                "Source directory {} no longer exists, skipping",
                entry.full_path()
            );
            return Ok(EntryOutcome::skipped(SkipReason::SourceMissing));
        }

        sink.mkdirs(target, entry.permission())?;
        if self.sink.preserve_owner {
            self.apply_owner(entry, sink, target)?;
        }
        tracing::debug!("Created directory {} ({:o})", target, entry.permission());
        Ok(EntryOutcome::DirectoryCreated)
    }

    fn copy_file(
        &self,
        entry: &Entry,
        source: &mut dyn StorageClient,
        sink: &mut dyn StorageClient,
        target: &str,
    ) -> Result<EntryOutcome> {
        let buffer_size = self.sink.buffer_size;
        let mut input = source.open(entry.full_path(), buffer_size)?;
        let mut output = match sink.create(target, entry.permission(), buffer_size) {
            Ok(output) => output,
            Err(e) => {
                close_input(input, entry.full_path());
                return Err(e);
            }
        };

        let streamed = stream(&mut *input, &mut *output, buffer_size, entry.full_path(), target)
            .and_then(|bytes| {
                output.commit()?;
                Ok(bytes)
            });

        close_input(input, entry.full_path());
        let output_closed = close_output(output, target);
        let bytes = streamed?;

        if output_closed && self.sink.preserve_owner {
            self.apply_owner(entry, sink, target)?;
        }
        tracing::debug!("Copied {} -> {} ({} bytes)", entry.full_path(), target, bytes);
        Ok(EntryOutcome::Copied { bytes })
    }

    fn apply_owner(&self, entry: &Entry, sink: &mut dyn StorageClient, target: &str) -> Result<()> {
        if entry.owner().is_empty() && entry.group().is_empty() {
            tracing::debug!("No ownership recorded for {}", entry.full_path());
            return Ok(());
        }
        sink.set_owner(target, entry.owner(), entry.group())
    }
}

/// Move every byte from `input` to `output` through one buffer
fn stream(
    input: &mut dyn InputStream,
    output: &mut dyn OutputStream,
    buffer_size: usize,
    source_path: &str,
    target_path: &str,
) -> Result<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::streaming(source_path, e)),
        };
        output
            .write_all(&buffer[..n])
            .map_err(|e| IngestError::streaming(target_path, e))?;
        total += n as u64;
    }

    output
        .flush()
        .map_err(|e| IngestError::streaming(target_path, e))?;
    Ok(total)
}

fn close_input(input: Box<dyn InputStream + '_>, path: &str) {
    if let Err(e) = input.close() {
        tracing::warn!("Failed to close input stream for {}: {}", path, e);
    }
}

fn close_output(output: Box<dyn OutputStream + '_>, path: &str) -> bool {
    match output.close() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to close output stream for {}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::balance;
    use crate::fs::{Credentials, Scanner};
    use crate::storage::memory::{Call, MemoryConnector, MemoryStorage};
    use crate::storage::{ConnectOptions, DefaultConnector};
    use std::fs::File;
    use tempfile::TempDir;

    fn local() -> HostUri {
        HostUri::new("file", "").unwrap()
    }

    fn sink_config(base: &str) -> SinkConfig {
        SinkConfig {
            destination: HostUri::new("hdfs", "namenode").unwrap(),
            base_path: base.to_string(),
            ..SinkConfig::default()
        }
    }

    fn sample_source() -> MemoryStorage {
        let storage = MemoryStorage::new("file:///");
        storage
            .add_file("/src/folderA/a1", &[1; 100])
            .add_file("/src/folderA/a2", &[2; 2])
            .add_dir("/src/folderA/empty")
            .add_file("/src/folderB/b1", &[3; 300]);
        storage
    }

    fn discover(connector: &MemoryConnector, root: &str) -> WorkUnit {
        let scanner = Scanner::new(connector, local(), Credentials::None);
        let entries = scanner.discover(&[root.to_string()], true).unwrap().into_entries();
        WorkUnit::from_entries(entries)
    }

    fn setup() -> (MemoryStorage, MemoryStorage, MemoryConnector) {
        let source = sample_source();
        let dest = MemoryStorage::new("hdfs://namenode/");
        let connector = MemoryConnector::new().with(&source).with(&dest);
        (source, dest, connector)
    }

    #[test]
    fn test_copy_unit_materializes_tree() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        source.clear_calls();

        let engine = CopyEngine::new(sink_config("/landing"), &connector);
        let report = engine.execute(&unit).unwrap();

        assert_eq!(report.files_copied, 3);
        assert_eq!(report.dirs_created, 3);
        assert_eq!(report.bytes_copied, 402);
        assert_eq!(dest.contents("/landing/src/folderB/b1").unwrap(), vec![3; 300]);
        assert!(dest.stat("/landing/src/folderA/empty").unwrap().is_dir);
        assert_eq!(report.entries.len(), unit.len());
    }

    #[test]
    fn test_directories_never_stream() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        let dirs: Vec<String> = unit
            .entries()
            .iter()
            .filter(|e| e.is_dir())
            .map(|e| e.full_path().to_string())
            .collect();
        source.clear_calls();

        CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        for call in source.calls() {
            if let Call::Open(path) = call {
                assert!(!dirs.contains(&path), "directory {} was streamed", path);
            }
        }
        for call in dest.calls() {
            if let Call::Create(path, _) = call {
                assert!(!path.ends_with("empty"));
            }
        }
        assert!(dest
            .calls()
            .contains(&Call::Mkdirs("/landing/src/folderA/empty".to_string(), 0o755)));
    }

    #[test]
    fn test_one_source_session_per_host() {
        let (_source, _dest, connector) = setup();
        let unit = discover(&connector, "/src");

        CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        // First connect belongs to discovery
        let connects = connector.connects();
        assert_eq!(connects.len(), 3);
        assert_eq!(connects.iter().filter(|h| *h == "file:///").count(), 2);
        assert_eq!(connects.iter().filter(|h| *h == "hdfs://namenode/").count(), 1);
    }

    #[test]
    fn test_sessions_closed_after_unit() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        source.clear_calls();

        CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        assert_eq!(source.calls().last(), Some(&Call::Close));
        assert_eq!(dest.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn test_streaming_failure_aborts_unit_without_rollback() {
        let source = MemoryStorage::new("file:///");
        source
            .add_file("/src/1", &[1; 10])
            .add_file("/src/2", &[2; 10])
            .add_file("/src/3", &[3; 10]);
        source.fail_reads_of("/src/2");
        let dest = MemoryStorage::new("hdfs://namenode/");
        let connector = MemoryConnector::new().with(&source).with(&dest);
        let unit = discover(&connector, "/src");
        source.clear_calls();

        let err = CopyEngine::new(sink_config("/out"), &connector)
            .execute(&unit)
            .unwrap_err();

        assert!(matches!(err.root(), IngestError::StreamingIo { .. }));
        assert!(!err.is_configuration());
        assert_eq!(dest.contents("/out/src/1").unwrap(), vec![1; 10]);
        assert!(dest.contents("/out/src/2").is_none());
        assert!(dest.contents("/out/src/3").is_none());

        // Both streams and both sessions are released on the failure path
        assert!(source.calls().contains(&Call::InputClosed("/src/2".to_string())));
        assert!(dest.calls().contains(&Call::OutputClosed("/out/src/2".to_string())));
        assert_eq!(source.calls().last(), Some(&Call::Close));
        assert_eq!(dest.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn test_second_run_without_overwrite_is_noop() {
        let (_source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        let engine = CopyEngine::new(sink_config("/landing"), &connector);

        engine.execute(&unit).unwrap();
        let first = dest.snapshot();
        dest.clear_calls();

        let report = engine.execute(&unit).unwrap();
        assert_eq!(dest.snapshot(), first);
        assert_eq!(report.skipped, unit.len() as u64);
        assert_eq!(report.bytes_copied, 0);
        assert!(report.entries.iter().all(|e| e.outcome
            == EntryOutcome::Skipped {
                reason: SkipReason::DestinationExists
            }));
        assert!(!dest
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Create(..) | Call::Mkdirs(..))));
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        dest.add_file("/landing/src/folderB/b1", b"stale");
        source.add_file("/src/folderB/b1", b"fresh");

        let sink = SinkConfig {
            overwrite: true,
            ..sink_config("/landing")
        };
        let report = CopyEngine::new(sink, &connector).execute(&unit).unwrap();
        assert_eq!(dest.contents("/landing/src/folderB/b1").unwrap(), b"fresh");
        assert_eq!(report.files_copied, 3);
    }

    #[test]
    fn test_vanished_source_is_skipped() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        source.remove("/src/folderA/a2");

        let report = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        assert_eq!(report.files_copied, 2);
        assert!(report.entries.iter().any(|e| e.relative_path == "src/folderA/a2"
            && e.outcome
                == EntryOutcome::Skipped {
                    reason: SkipReason::SourceMissing
                }));
        assert!(dest.contents("/landing/src/folderA/a2").is_none());
    }

    #[test]
    fn test_vanished_source_directory_is_skipped() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        source.remove("/src/folderA/empty");

        let report = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        assert!(report.entries.iter().any(|e| e.relative_path == "src/folderA/empty"
            && e.outcome
                == EntryOutcome::Skipped {
                    reason: SkipReason::SourceMissing
                }));
        assert!(dest.stat("/landing/src/folderA/empty").is_none());
        assert_eq!(report.files_copied, 3);
    }

    #[test]
    fn test_source_directory_replaced_by_file_is_skipped() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src");
        source.remove("/src/folderA/empty");
        source.add_file("/src/folderA/empty", b"now a file");

        let report = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();

        assert!(report.entries.iter().any(|e| e.relative_path == "src/folderA/empty"
            && e.outcome
                == EntryOutcome::Skipped {
                    reason: SkipReason::SourceMissing
                }));
        assert!(dest.stat("/landing/src/folderA/empty").is_none());
        assert!(!dest
            .calls()
            .contains(&Call::Mkdirs("/landing/src/folderA/empty".to_string(), 0o755)));
    }

    #[test]
    fn test_root_entry_is_not_materialized() {
        let (_source, dest, connector) = setup();
        let root = Entry::from_status(
            &crate::storage::FileStatus::directory("/"),
            "/",
            &local(),
            Credentials::None,
        )
        .unwrap();
        let unit = WorkUnit::from_entries(vec![root]);
        let report = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();
        assert_eq!(
            report.entries[0].outcome,
            EntryOutcome::Skipped {
                reason: SkipReason::EmptyRelativePath
            }
        );
        assert!(dest.snapshot().is_empty());
    }

    #[test]
    fn test_owner_applied_after_close_when_preserving() {
        let (_source, dest, connector) = setup();
        let unit = discover(&connector, "/src/folderB");
        let sink = SinkConfig {
            preserve_owner: true,
            ..sink_config("/landing")
        };

        CopyEngine::new(sink, &connector).execute(&unit).unwrap();

        let calls = dest.calls();
        let closed = calls
            .iter()
            .position(|c| *c == Call::OutputClosed("/landing/folderB/b1".to_string()))
            .unwrap();
        let owned = calls
            .iter()
            .position(|c| matches!(c, Call::SetOwner(p, ..) if p == "/landing/folderB/b1"))
            .unwrap();
        assert!(closed < owned);
        assert_eq!(dest.stat("/landing/folderB/b1").unwrap().owner, "alice");
    }

    #[test]
    fn test_owner_not_applied_without_flag() {
        let (_source, dest, connector) = setup();
        let unit = discover(&connector, "/src");

        CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap();
        assert!(!dest.calls().iter().any(|c| matches!(c, Call::SetOwner(..))));
    }

    #[test]
    fn test_close_failures_are_only_warned() {
        let (source, dest, connector) = setup();
        let unit = discover(&connector, "/src/folderA");
        source.fail_input_close();
        source.fail_session_close();
        dest.fail_output_close();
        let sink = SinkConfig {
            preserve_owner: true,
            ..sink_config("/landing")
        };

        let report = CopyEngine::new(sink, &connector).execute(&unit).unwrap();
        assert_eq!(report.files_copied, 2);
        assert_eq!(dest.contents("/landing/folderA/a1").unwrap(), vec![1; 100]);

        // Output close failed, so ownership was never applied to files
        assert!(!dest
            .calls()
            .iter()
            .any(|c| matches!(c, Call::SetOwner(p, ..) if p.ends_with("a1") || p.ends_with("a2"))));
        assert!(source.calls().contains(&Call::InputClosed("/src/folderA/a1".to_string())));
        assert_eq!(dest.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn test_unregistered_destination_fails_before_copy() {
        let source = sample_source();
        let connector = MemoryConnector::new().with(&source);
        let unit = discover(&connector, "/src");
        source.clear_calls();

        let err = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&unit)
            .unwrap_err();
        assert!(matches!(err, IngestError::Connection { .. }));
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_empty_unit_opens_nothing() {
        let connector = MemoryConnector::new();
        let report = CopyEngine::new(sink_config("/landing"), &connector)
            .execute(&WorkUnit::new())
            .unwrap();
        assert!(report.entries.is_empty());
        assert!(connector.connects().is_empty());
    }

    #[test]
    fn test_failed_stream_is_recopied_on_rerun_into_local_sink() {
        let dst = TempDir::new().unwrap();
        let source = MemoryStorage::new("file:///");
        source
            .add_file("/src/big.bin", &[9; 4096])
            .add_file("/src/small.txt", &[5; 10]);
        source.fail_reads_of("/src/big.bin");
        let connector = MemoryConnector::new()
            .with(&source)
            .with_local("hdfs://namenode/", dst.path());
        let unit = discover(&connector, "/src");
        let engine = CopyEngine::new(sink_config("/landing"), &connector);

        let err = engine.execute(&unit).unwrap_err();
        assert!(matches!(err.root(), IngestError::StreamingIo { .. }));

        // Neither the target nor its staging file survive the failure
        let target = dst.path().join("landing/src/big.bin");
        assert!(!target.exists());
        let leftovers = std::fs::read_dir(dst.path().join("landing/src"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(crate::storage::PARTIAL_SUFFIX)
            })
            .count();
        assert_eq!(leftovers, 0);

        source.restore_reads();
        let report = engine.execute(&unit).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), vec![9; 4096]);
        assert_eq!(
            std::fs::read(dst.path().join("landing/src/small.txt")).unwrap(),
            vec![5; 10]
        );
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.bytes_copied, 4106);
    }

    #[test]
    fn test_balanced_units_copy_local_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("data/nested")).unwrap();
        std::fs::create_dir_all(src.path().join("data/empty")).unwrap();
        File::create(src.path().join("data/tiny.txt"))
            .unwrap()
            .write_all(b"tiny")
            .unwrap();
        File::create(src.path().join("data/nested/medium.bin"))
            .unwrap()
            .write_all(&vec![0xCD; 100 * 1024])
            .unwrap();

        let connector = DefaultConnector::new(ConnectOptions::default());
        let root = src.path().join("data").to_string_lossy().into_owned();
        let entries = Scanner::new(&connector, local(), Credentials::None)
            .discover(&[root], true)
            .unwrap()
            .into_entries();

        let sink = SinkConfig {
            destination: local(),
            base_path: dst.path().to_string_lossy().into_owned(),
            buffer_size: 4096,
            ..SinkConfig::default()
        };
        let engine = CopyEngine::new(sink, &connector);
        for unit in balance(entries, 2).unwrap() {
            engine.execute(&unit).unwrap();
        }

        assert_eq!(
            std::fs::read(dst.path().join("data/nested/medium.bin")).unwrap().len(),
            100 * 1024
        );
        assert_eq!(std::fs::read(dst.path().join("data/tiny.txt")).unwrap(), b"tiny");
        assert!(dst.path().join("data/empty").is_dir());
    }
}
