//! # WAL: Write-Ahead Log
//!
//! Fixed-size, memory-mapped log segments that make memtable writes durable.
//!
//! Every put is appended to the active segment and forced to disk **before**
//! the memtable is updated. A segment never grows: once the next record would
//! not leave room for the end marker, the writer stamps [`END_MARK`] at the
//! current position and refuses further writes. The engine then rotates to a
//! fresh segment.
//!
//! ## Segment Layout
//!
//! ```text
//! +---------+---------+-----+-------+---------+---------+-----+-------+-----
//! | key_len | val_len | key | value | key_len | val_len | key | value | ...
//! | i32 BE  | i32 BE  |     |       |   ...
//! +---------+---------+-----+-------+---------+---------+-----+-------+-----
//!
//! tail:   key_len == 0 && val_len == 0  (unused, zero-filled space)
//! sealed: key_len == END_MARK           (segment is full)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalReader, WalWriter};
//!
//! let mut w = WalWriter::open("0.wal", 4096).unwrap();
//! assert!(w.write(b"hello", b"world").unwrap());
//! drop(w);
//!
//! let r = WalReader::open("0.wal").unwrap();
//! r.replay(|k, v| println!("{:?} => {:?}", k, v)).unwrap();
//! ```

use byteorder::{BigEndian, ByteOrder};
use memmap2::{Mmap, MmapMut, MmapOptions};
use memtable::MemTable;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Marker written in place of a key length when a segment is full.
pub const END_MARK: i32 = -1;
/// Bytes occupied by [`END_MARK`].
pub const END_MARK_BYTES: usize = 4;
/// Bytes of the `key_len` + `val_len` record header.
pub const RECORD_HEADER_BYTES: usize = 8;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The segment already carries an end marker and cannot be appended to.
    #[error("wal segment {0} is sealed")]
    Sealed(PathBuf),

    /// A record header is negative or runs past the end of the segment.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: usize },
}

/// Bytes a record of the given sizes occupies in a segment.
#[must_use]
pub fn record_len(key_len: usize, value_len: usize) -> usize {
    RECORD_HEADER_BYTES + key_len + value_len
}

/// Whether a record of the given sizes fits in an empty segment of
/// `max_size` bytes while leaving room for the end marker.
#[must_use]
pub fn fits_in_segment(key_len: usize, value_len: usize, max_size: usize) -> bool {
    record_len(key_len, value_len) + END_MARK_BYTES <= max_size
}

/// Outcome of scanning a segment from the start.
enum Scan {
    /// Valid records end at this offset.
    Tail(usize),
    /// An end marker was found.
    Sealed,
}

/// Walks records from offset 0, calling `visit` for each one.
fn scan(data: &[u8], mut visit: impl FnMut(&[u8], &[u8])) -> Result<Scan, WalError> {
    let len = data.len();
    let mut pos = 0usize;

    while pos + END_MARK_BYTES <= len {
        let key_len = BigEndian::read_i32(&data[pos..]);
        if key_len == END_MARK {
            return Ok(Scan::Sealed);
        }
        if pos + RECORD_HEADER_BYTES > len {
            break;
        }
        let val_len = BigEndian::read_i32(&data[pos + 4..]);
        if key_len == 0 && val_len == 0 {
            break;
        }
        if key_len < 0 || val_len < 0 {
            return Err(WalError::Corrupt { offset: pos });
        }
        let (k, v) = (key_len as usize, val_len as usize);
        let end = pos + record_len(k, v);
        if end > len {
            return Err(WalError::Corrupt { offset: pos });
        }
        let key_start = pos + RECORD_HEADER_BYTES;
        visit(&data[key_start..key_start + k], &data[key_start + k..end]);
        pos = end;
    }

    Ok(Scan::Tail(pos))
}

/// Appending writer over one memory-mapped segment.
///
/// The segment file is created (or extended) to exactly `max_size` bytes.
/// Opening an existing segment resumes after its last record, or fails with
/// [`WalError::Sealed`] if the segment already ends with an end marker.
pub struct WalWriter {
    path: PathBuf,
    _file: File,
    map: MmapMut,
    max_size: usize,
    position: usize,
    sealed: bool,
}

impl WalWriter {
    /// Opens or creates the segment at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Sealed`] for a full segment, [`WalError::Corrupt`]
    /// for an unreadable record header, and [`WalError::Io`] for file or
    /// mapping failures.
    pub fn open<P: AsRef<Path>>(path: P, max_size: usize) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if (file.metadata()?.len() as usize) < max_size {
            file.set_len(max_size as u64)?;
        }

        // SAFETY: the segment file is owned by this writer for its lifetime;
        // no other handle in the process truncates it while mapped.
        let map = unsafe { MmapOptions::new().len(max_size).map_mut(&file)? };

        let position = match scan(&map[..], |_, _| {})? {
            Scan::Tail(pos) => pos,
            Scan::Sealed => return Err(WalError::Sealed(path)),
        };
        debug!(path = %path.display(), position, max_size, "wal segment opened");

        Ok(Self {
            path,
            _file: file,
            map,
            max_size,
            position,
            sealed: false,
        })
    }

    /// Appends one record and forces it to disk.
    ///
    /// Returns `Ok(false)` when the record does not fit alongside the end
    /// marker; the marker is written and the segment becomes sealed. A sealed
    /// writer returns `Ok(false)` without touching the segment again.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the mapped range cannot be flushed.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<bool, WalError> {
        if self.sealed {
            return Ok(false);
        }

        if self.position + END_MARK_BYTES > self.max_size {
            self.sealed = true;
            return Ok(false);
        }

        let will_write = record_len(key.len(), value.len());
        if self.position + will_write + END_MARK_BYTES > self.max_size {
            BigEndian::write_i32(&mut self.map[self.position..], END_MARK);
            self.map.flush_range(self.position, END_MARK_BYTES)?;
            self.sealed = true;
            debug!(path = %self.path.display(), position = self.position, "wal segment sealed");
            return Ok(false);
        }

        let pos = self.position;
        let buf = &mut self.map[pos..pos + will_write];
        BigEndian::write_i32(&mut buf[0..4], key.len() as i32);
        BigEndian::write_i32(&mut buf[4..8], value.len() as i32);
        buf[RECORD_HEADER_BYTES..RECORD_HEADER_BYTES + key.len()].copy_from_slice(key);
        buf[RECORD_HEADER_BYTES + key.len()..].copy_from_slice(value);
        self.map.flush_range(pos, will_write)?;

        self.position += will_write;
        Ok(true)
    }

    /// Flushes the whole mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] on flush failure.
    pub fn sync_to_disk(&self) -> Result<(), WalError> {
        self.map.flush()?;
        Ok(())
    }

    /// Offset where the next record will be written.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("max_size", &self.max_size)
            .field("sealed", &self.sealed)
            .finish()
    }
}

enum Segment {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Read-only view of a segment used during recovery.
pub struct WalReader {
    segment: Segment,
}

impl WalReader {
    /// Maps the segment at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if the file is missing or cannot be mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::from_bytes(Vec::new()));
        }
        // SAFETY: the file is opened read-only and only read during replay.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            segment: Segment::Mapped(map),
        })
    }

    /// Wraps an in-memory copy of a segment.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            segment: Segment::Owned(bytes),
        }
    }

    fn bytes(&self) -> &[u8] {
        match &self.segment {
            Segment::Mapped(map) => map,
            Segment::Owned(bytes) => bytes,
        }
    }

    /// Replays every record in order, stopping at the tail or the end marker.
    /// Returns the number of records applied.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Corrupt`] if a record header is invalid.
    pub fn replay<F>(&self, mut apply: F) -> Result<usize, WalError>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut count = 0usize;
        scan(self.bytes(), |k, v| {
            apply(k, v);
            count += 1;
        })?;
        Ok(count)
    }

    /// Replays every record into `mem`.
    ///
    /// # Errors
    ///
    /// Same as [`replay`](Self::replay).
    pub fn restore_memtable(&self, mem: &dyn MemTable) -> Result<usize, WalError> {
        self.replay(|k, v| mem.put(k.to_vec(), v.to_vec()))
    }

    /// Whether the segment ends with an end marker.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Corrupt`] if a record header is invalid.
    pub fn is_sealed(&self) -> Result<bool, WalError> {
        Ok(matches!(scan(self.bytes(), |_, _| {})?, Scan::Sealed))
    }
}
