//! File-backed destinations.
//!
//! All three strategies append to a single local file and produce the same
//! bytes for the same record sequence; they differ in when those bytes reach
//! the disk:
//!
//! - [`ImmediateFile`]: `write` + `sync_data` per record.
//! - [`BufferedFile`]: user-space buffer flushed to the page cache per batch.
//! - [`MmapFile`]: copies into a pre-allocated shared mapping, truncated to
//!   the real length on close.

use crate::error::DestinationError;
use crate::record::Record;
use crate::sink::Destination;
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default region pre-allocated by [`MmapFile`] (32 MiB).
pub const DEFAULT_MMAP_REGION: u64 = 32 * 1024 * 1024;

const BUFFER_CAPACITY: usize = 64 * 1024;

/// Where and how a file destination is opened.
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Target file; opened in append mode, created if missing.
    pub path: PathBuf,
    /// Force data to stable storage on every flush.
    pub fsync: bool,
    /// Create missing parent directories.
    pub create_dirs: bool,
}

impl FileOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: false,
            create_dirs: false,
        }
    }

    #[must_use]
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    #[must_use]
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    fn prepare(&self) -> Result<(), DestinationError> {
        if !self.create_dirs {
            return Ok(());
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| DestinationError::io(parent, e))
            }
            _ => Ok(()),
        }
    }

    fn open_append(&self) -> Result<File, DestinationError> {
        self.prepare()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DestinationError::io(&self.path, e))
    }
}

/// Writes every record straight to the file and syncs it before returning.
///
/// Smallest data-loss window on crash, lowest throughput.
#[derive(Debug)]
pub struct ImmediateFile {
    path: PathBuf,
    file: Option<File>,
}

impl ImmediateFile {
    pub fn open(options: FileOptions) -> Result<Self, DestinationError> {
        let file = options.open_append()?;
        Ok(Self { path: options.path, file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File, DestinationError> {
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| DestinationError::Closed { path: path.clone() })
    }
}

impl Destination for ImmediateFile {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        let file = self.file()?;
        let result = file
            .write_all(record.as_bytes())
            .and_then(|()| file.sync_data());
        result.map_err(|e| DestinationError::io(&self.path, e))
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        match self.file.take() {
            Some(file) => file.sync_all().map_err(|e| DestinationError::io(&self.path, e)),
            None => Ok(()),
        }
    }
}

/// Buffers records in user space and hands them to the OS once per batch.
///
/// The page cache does the real batching; with `fsync` the flush also waits
/// for the disk.
#[derive(Debug)]
pub struct BufferedFile {
    path: PathBuf,
    fsync: bool,
    writer: Option<BufWriter<File>>,
}

impl BufferedFile {
    pub fn open(options: FileOptions) -> Result<Self, DestinationError> {
        let file = options.open_append()?;
        Ok(Self {
            path: options.path,
            fsync: options.fsync,
            writer: Some(BufWriter::with_capacity(BUFFER_CAPACITY, file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, DestinationError> {
        let path = &self.path;
        self.writer
            .as_mut()
            .ok_or_else(|| DestinationError::Closed { path: path.clone() })
    }
}

impl Destination for BufferedFile {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        let result = self.writer()?.write_all(record.as_bytes());
        result.map_err(|e| DestinationError::io(&self.path, e))
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        let writer = self.writer()?;
        let mut result = Ok(());
        for record in batch {
            result = writer.write_all(record.as_bytes());
            if result.is_err() {
                break;
            }
        }
        result.map_err(|e| DestinationError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<(), DestinationError> {
        let fsync = self.fsync;
        let writer = self.writer()?;
        let mut result = writer.flush();
        if fsync && result.is_ok() {
            result = writer.get_ref().sync_data();
        }
        result.map_err(|e| DestinationError::io(&self.path, e))
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| DestinationError::io(&self.path, e.into_error()))?;
        if self.fsync {
            file.sync_data().map_err(|e| DestinationError::io(&self.path, e))?;
        }
        Ok(())
    }
}

/// Copies records into a memory-mapped region of the file.
///
/// On the first write the file is extended by `region` bytes past its
/// current end and mapped; writes advance a cursor inside the mapping.
/// [`close`](Destination::close) flushes the mapping and truncates the file
/// back to the bytes actually written.
///
/// A batch that does not fit is refused whole with
/// [`DestinationError::MmapOverflow`] unless
/// [`grow_on_overflow`](MmapFile::grow_on_overflow) is enabled, in which case
/// the region is extended and remapped.
#[derive(Debug)]
pub struct MmapFile {
    path: PathBuf,
    fsync: bool,
    region: u64,
    grow: bool,
    file: Option<File>,
    mmap: Option<MmapMut>,
    cursor: u64,
}

impl MmapFile {
    pub fn open(options: FileOptions) -> Result<Self, DestinationError> {
        options.prepare()?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&options.path)
            .map_err(|e| DestinationError::io(&options.path, e))?;
        let cursor = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|e| DestinationError::io(&options.path, e))?;

        Ok(Self {
            path: options.path,
            fsync: options.fsync,
            region: DEFAULT_MMAP_REGION,
            grow: false,
            file: Some(file),
            mmap: None,
            cursor,
        })
    }

    /// Size of the region reserved on first write.
    #[must_use]
    pub fn with_region_size(mut self, bytes: u64) -> Self {
        self.region = bytes.max(1);
        self
    }

    /// Extend and remap instead of failing when a batch does not fit.
    #[must_use]
    pub fn grow_on_overflow(mut self, grow: bool) -> Self {
        self.grow = grow;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, including whatever the file held when opened.
    pub fn len(&self) -> u64 {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Bytes still free in the current mapping.
    pub fn remaining(&self) -> u64 {
        self.mmap
            .as_ref()
            .map_or(self.region, |m| m.len() as u64 - self.cursor)
    }

    /// Remap so that at least `additional` bytes are free after the cursor.
    pub fn resize(&mut self, additional: u64) -> Result<(), DestinationError> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(|e| DestinationError::io(&self.path, e))?;
        }
        self.map(self.cursor + additional)
    }

    fn map(&mut self, len: u64) -> Result<(), DestinationError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| DestinationError::Closed { path: self.path.clone() })?;
        file.set_len(len).map_err(|e| DestinationError::io(&self.path, e))?;
        // SAFETY: the file is owned by this destination and only ever
        // accessed through this mapping while it exists.
        let mmap = unsafe { MmapMut::map_mut(file) }
            .map_err(|e| DestinationError::io(&self.path, e))?;
        self.mmap = Some(mmap);
        Ok(())
    }

    fn reserve(&mut self, needed: u64) -> Result<(), DestinationError> {
        if self.file.is_none() {
            return Err(DestinationError::Closed { path: self.path.clone() });
        }
        if self.mmap.is_none() {
            self.map(self.cursor + self.region)?;
        }
        let available = self.remaining();
        if needed <= available {
            return Ok(());
        }
        if !self.grow {
            return Err(DestinationError::MmapOverflow {
                path: self.path.clone(),
                needed,
                available,
            });
        }
        let mut additional = self.region;
        while additional < needed {
            additional = additional.saturating_mul(2);
        }
        tracing::debug!(path = ?self.path, additional, "growing mmap region");
        self.resize(additional)
    }

    fn copy(&mut self, bytes: &[u8]) {
        if let Some(mmap) = self.mmap.as_mut() {
            let start = self.cursor as usize;
            mmap[start..start + bytes.len()].copy_from_slice(bytes);
            self.cursor += bytes.len() as u64;
        }
    }
}

impl Destination for MmapFile {
    fn write(&mut self, record: &Record) -> Result<(), DestinationError> {
        self.reserve(record.len() as u64)?;
        self.copy(record.as_bytes());
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Record]) -> Result<(), DestinationError> {
        let needed = batch.iter().map(|r| r.len() as u64).sum();
        self.reserve(needed)?;
        for record in batch {
            self.copy(record.as_bytes());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DestinationError> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(());
        };
        let result = if self.fsync { mmap.flush() } else { mmap.flush_async() };
        result.map_err(|e| DestinationError::io(&self.path, e))
    }

    fn close(&mut self) -> Result<(), DestinationError> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(|e| DestinationError::io(&self.path, e))?;
        }
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.set_len(self.cursor)
            .map_err(|e| DestinationError::io(&self.path, e))?;
        if self.fsync {
            file.sync_all().map_err(|e| DestinationError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(path = ?self.path, error = %e, "failed to close mmap destination");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records(lines: &[&str]) -> Vec<Record> {
        lines.iter().map(|l| Record::from(*l)).collect()
    }

    #[test]
    fn create_dirs_builds_missing_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/out.log");

        assert!(BufferedFile::open(FileOptions::new(&path)).is_err());

        let mut dest = BufferedFile::open(FileOptions::new(&path).with_create_dirs(true)).unwrap();
        dest.write_batch(&records(&["x\n"])).unwrap();
        dest.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x\n");
    }

    #[test]
    fn immediate_file_is_visible_without_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("immediate.log");
        let mut dest = ImmediateFile::open(FileOptions::new(&path)).unwrap();

        dest.write(&Record::from("one\n")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one\n");
    }

    #[test]
    fn buffered_file_appends_to_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buffered.log");
        fs::write(&path, "old\n").unwrap();

        let mut dest = BufferedFile::open(FileOptions::new(&path).with_fsync(true)).unwrap();
        dest.write_batch(&records(&["new\n"])).unwrap();
        dest.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn writes_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let mut dest = BufferedFile::open(FileOptions::new(dir.path().join("c.log"))).unwrap();
        dest.close().unwrap();
        assert!(matches!(
            dest.write(&Record::from("x")),
            Err(DestinationError::Closed { .. })
        ));
    }

    #[test]
    fn mmap_truncates_to_written_bytes_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmap.log");
        let mut dest = MmapFile::open(FileOptions::new(&path))
            .unwrap()
            .with_region_size(4096);

        dest.write_batch(&records(&["alpha\n", "beta\n"])).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 4096);
        dest.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"alpha\nbeta\n");
    }

    #[test]
    fn mmap_overflow_is_distinct_and_copies_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.log");
        let mut dest = MmapFile::open(FileOptions::new(&path))
            .unwrap()
            .with_region_size(8);

        dest.write(&Record::from("1234\n")).unwrap();
        let err = dest
            .write_batch(&records(&["ab\n", "cd\n"]))
            .unwrap_err();
        assert!(err.is_overflow());
        assert!(matches!(
            err,
            DestinationError::MmapOverflow { needed: 6, available: 3, .. }
        ));

        dest.resize(16).unwrap();
        dest.write_batch(&records(&["ab\n", "cd\n"])).unwrap();
        dest.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"1234\nab\ncd\n");
    }

    #[test]
    fn mmap_grows_when_enabled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.log");
        let mut dest = MmapFile::open(FileOptions::new(&path))
            .unwrap()
            .with_region_size(4)
            .grow_on_overflow(true);

        let lines: Vec<String> = (0..100).map(|i| format!("line {i}\n")).collect();
        for line in &lines {
            dest.write(&Record::from(line.as_str())).unwrap();
        }
        dest.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), lines.concat());
    }

    #[test]
    fn mmap_appends_after_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.log");
        fs::write(&path, "head\n").unwrap();

        let mut dest = MmapFile::open(FileOptions::new(&path))
            .unwrap()
            .with_region_size(64);
        assert_eq!(dest.len(), 5);
        dest.write(&Record::from("tail\n")).unwrap();
        drop(dest);

        assert_eq!(fs::read_to_string(&path).unwrap(), "head\ntail\n");
    }
}
