//! Append-only record stream backing the audit ledger.
//!
//! File layout: a header record followed by data records, each encoded as
//! a little-endian u32 length prefix and a JSON payload. Appends only ever
//! extend the file; a torn final write is truncated away on open so the
//! stream stays well-formed.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Records larger than this are treated as corruption, not data.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// First record of every stream file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHeader {
    pub version: u32,
    pub created: DateTime<Utc>,
}

/// A length-prefixed record file opened for appending.
pub struct RecordStream {
    file: File,
    header: StreamHeader,
}

impl RecordStream {
    /// Opens (or creates) the stream at `path` and returns it together
    /// with the payloads of all existing data records.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Vec<u8>>)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        if !exists {
            let header = StreamHeader {
                version: 1,
                created: Utc::now(),
            };
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(path)?;
            write_record(&mut file, &serde_json::to_vec(&header)?)?;
            file.sync_data()?;
            return Ok((
                Self { file, header },
                Vec::new(),
            ));
        }

        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let (records, valid_len) = scan_records(&bytes);
        if valid_len < bytes.len() as u64 {
            warn!(
                "Truncating {} torn byte(s) at the end of {}",
                bytes.len() as u64 - valid_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        let mut records = records.into_iter();
        let header_bytes = records.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has no header record", path.display()),
            )
        })?;
        let header: StreamHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} header is not valid: {}", path.display(), e),
            )
        })?;

        let file = OpenOptions::new().append(true).open(path)?;
        Ok((
            Self { file, header },
            records.collect(),
        ))
    }

    /// Appends one record and makes it durable before returning.
    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        write_record(&mut self.file, payload)?;
        self.file.sync_data()
    }

    /// The stream's header record.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }
}

fn write_record(file: &mut File, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;
    if len > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "record too large"));
    }
    file.write_all(&len.to_le_bytes())?;
    file.write_all(payload)?;
    file.flush()
}

/// Walks the byte buffer, returning complete record payloads and the byte
/// length of the valid prefix. Anything past it is a torn write.
fn scan_records(bytes: &[u8]) -> (Vec<Vec<u8>>, u64) {
    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        if offset + 4 > bytes.len() {
            break;
        }
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        if len > MAX_RECORD_LEN {
            break;
        }
        let end = offset + 4 + len as usize;
        if end > bytes.len() {
            break;
        }
        records.push(bytes[offset + 4..end].to_vec());
        offset = end;
    }

    (records, offset as u64)
}
