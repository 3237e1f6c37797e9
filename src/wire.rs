//! Wire encoding of entries and work units
//!
//! Integers are big-endian and fixed width. Strings are a `u16` byte length
//! followed by UTF-8. Optional strings carry a presence byte first. An entry
//! is not self-describing: the reader must know its credential variant.
//!
//! Unit files wrap a unit in a small envelope (`FIU1` magic, credential kind
//! tag) so that a worker can decode them without out-of-band information.

use crate::core::WorkUnit;
use crate::error::{IngestError, IoResultExt, Result};
use crate::fs::{CredentialKind, Credentials, Entry, HostUri};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes opening every unit file
pub const UNIT_FILE_MAGIC: &[u8; 4] = b"FIU1";

/// Primitive writers
pub trait WireWrite: Write {
    fn write_u8_be(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_u16_be(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_u32_be(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_u64_be(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8_be(u8::from(v))
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| {
            IngestError::Codec(format!("string of {} bytes exceeds the u16 length prefix", s.len()))
        })?;
        self.write_u16_be(len)?;
        self.write_all(s.as_bytes())?;
        Ok(())
    }

    fn write_opt_str(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) => {
                self.write_bool(true)?;
                self.write_str(s)
            }
            None => self.write_bool(false),
        }
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Primitive readers
pub trait WireRead: Read {
    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }

    fn read_u8_be(&mut self) -> Result<u8> {
        Ok(self.read_fixed::<1>()?[0])
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_fixed()?))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_fixed()?))
    }

    fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_fixed()?))
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8_be()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(IngestError::Codec(format!("invalid boolean byte {}", other))),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let len = usize::from(self.read_u16_be()?);
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).map_err(truncated)?;
        String::from_utf8(buf).map_err(|e| IngestError::Codec(format!("invalid UTF-8: {}", e)))
    }

    fn read_opt_string(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }
}

impl<R: Read + ?Sized> WireRead for R {}

fn truncated(e: std::io::Error) -> IngestError {
    if e.kind() == ErrorKind::UnexpectedEof {
        IngestError::Codec("truncated input".to_string())
    } else {
        IngestError::from(e)
    }
}

impl Entry {
    /// Write the entry in wire order, credential fields last
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_str(&self.file_name)?;
        w.write_str(&self.full_path)?;
        w.write_u64_be(self.modification_time)?;
        w.write_str(&self.group)?;
        w.write_str(&self.owner)?;
        w.write_u64_be(self.file_size)?;
        w.write_bool(self.is_dir)?;
        w.write_str(&self.relative_path)?;
        w.write_u16_be(self.permission)?;
        w.write_str(&self.host_uri)?;

        match &self.credentials {
            Credentials::None => {}
            Credentials::Ftp { username, password } => {
                w.write_str(username)?;
                w.write_opt_str(password.as_deref())?;
            }
            Credentials::Sftp {
                username,
                password,
                key_path,
            } => {
                w.write_str(username)?;
                w.write_opt_str(password.as_deref())?;
                w.write_opt_str(key_path.as_deref())?;
            }
            Credentials::ObjectStore {
                access_key_id,
                secret_key_id,
            } => {
                w.write_str(access_key_id)?;
                w.write_str(secret_key_id)?;
            }
        }
        Ok(())
    }

    /// Read an entry of a known credential variant
    pub fn decode<R: Read + ?Sized>(r: &mut R, kind: CredentialKind) -> Result<Self> {
        let file_name = r.read_string()?;
        let full_path = r.read_string()?;
        let modification_time = r.read_u64_be()?;
        let group = r.read_string()?;
        let owner = r.read_string()?;
        let file_size = r.read_u64_be()?;
        let is_dir = r.read_bool()?;
        let relative_path = r.read_string()?;
        let permission = r.read_u16_be()?;
        let host_uri = r.read_string()?;
        let canonical = HostUri::parse(&host_uri).map(|h| h.to_string()).ok();
        if canonical.as_deref() != Some(host_uri.as_str()) {
            return Err(IngestError::Codec(format!(
                "host URI '{}' is not in canonical scheme://host/ form",
                host_uri
            )));
        }

        let credentials = match kind {
            CredentialKind::None => Credentials::None,
            CredentialKind::Ftp => Credentials::Ftp {
                username: r.read_string()?,
                password: r.read_opt_string()?,
            },
            CredentialKind::Sftp => Credentials::Sftp {
                username: r.read_string()?,
                password: r.read_opt_string()?,
                key_path: r.read_opt_string()?,
            },
            CredentialKind::ObjectStore => Credentials::ObjectStore {
                access_key_id: r.read_string()?,
                secret_key_id: r.read_string()?,
            },
        };

        Ok(Self {
            file_name,
            full_path,
            modification_time,
            group,
            owner,
            file_size,
            is_dir,
            relative_path,
            permission,
            host_uri,
            credentials,
        })
    }
}

impl WorkUnit {
    /// Entry count followed by each entry
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let count = u32::try_from(self.len())
            .map_err(|_| IngestError::Codec(format!("unit of {} entries is too large", self.len())))?;
        w.write_u32_be(count)?;
        for entry in self.entries() {
            entry.encode(w)?;
        }
        Ok(())
    }

    /// Read a unit; the byte total is recomputed from the entries
    pub fn decode<R: Read + ?Sized>(r: &mut R, kind: CredentialKind) -> Result<Self> {
        let count = r.read_u32_be()? as usize;
        // Never trust the count for preallocation
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            entries.push(Entry::decode(r, kind)?);
        }
        Ok(Self::from_entries(entries))
    }
}

/// Write a unit with its envelope to any writer
pub fn write_unit<W: Write + ?Sized>(w: &mut W, unit: &WorkUnit) -> Result<()> {
    let kind = unit.credential_kind()?;
    w.write_all(UNIT_FILE_MAGIC)?;
    w.write_u8_be(kind.tag())?;
    unit.encode(w)
}

/// Read a unit with its envelope from any reader
pub fn read_unit<R: Read + ?Sized>(r: &mut R) -> Result<WorkUnit> {
    let magic: [u8; 4] = r.read_fixed()?;
    if &magic != UNIT_FILE_MAGIC {
        return Err(IngestError::Codec("not a work unit file (bad magic)".to_string()));
    }
    let kind = CredentialKind::from_tag(r.read_u8_be()?)?;
    let unit = WorkUnit::decode(r, kind)?;

    let mut rest = [0u8; 1];
    if r.read(&mut rest)? != 0 {
        return Err(IngestError::Codec("trailing bytes after work unit".to_string()));
    }
    Ok(unit)
}

/// Write a unit file
pub fn write_unit_file(path: &Path, unit: &WorkUnit) -> Result<()> {
    let file = std::fs::File::create(path).with_path(path)?;
    let mut writer = BufWriter::new(file);
    write_unit(&mut writer, unit)?;
    writer.flush().with_path(path)
}

/// Read a unit file
pub fn read_unit_file(path: &Path) -> Result<WorkUnit> {
    let file = std::fs::File::open(path).with_path(path)?;
    read_unit(&mut BufReader::new(file))
        .map_err(|e| e.with_context(format!("decoding {}", path.display())))
}

/// Extension of unit files in a plan directory
pub const UNIT_FILE_EXTENSION: &str = "fiu";

/// File name of the unit at `index` in a plan directory
pub fn unit_file_name(index: usize) -> String {
    format!("unit-{:05}.{}", index, UNIT_FILE_EXTENSION)
}

/// Write every unit of a plan into `dir`, creating it if needed
pub fn write_plan(dir: &Path, units: &[WorkUnit]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_path(dir)?;
    units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            let path = dir.join(unit_file_name(index));
            write_unit_file(&path, unit)?;
            Ok(path)
        })
        .collect()
}

/// Unit files of a plan directory, in plan order
pub fn plan_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_path(dir)? {
        let path = entry.with_path(dir)?.path();
        if path.extension().is_some_and(|ext| ext == UNIT_FILE_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
