//! Output file with positional I/O.
//!
//! Workers share one handle and write at explicit offsets; there is no
//! shared cursor to race on. The engine guarantees the offset ranges
//! never overlap, so no lock is needed around `write_at`. `flush` and
//! `close` are only called by the engine after every worker is joined.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{BoltError, Result};

pub struct OutputFile {
    file: File,
    path: PathBuf,
    closed: AtomicBool,
}

impl OutputFile {
    /// Create (or truncate-extend) the output at `path`. A non-zero
    /// `size` pre-allocates the full length up front; sparse allocation
    /// is fine. `size == 0` means unknown length, grow on write.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| BoltError::from_io(&e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .map_err(|e| BoltError::from_io(&e))?;

        if size > 0 {
            file.set_len(size).map_err(|e| BoltError::from_io(&e))?;
        }

        debug!(path = %path.display(), size, "output file opened");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Write the whole buffer at `offset`. Safe to call concurrently
    /// from workers whose ranges do not overlap.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::HandleInvalid);
        }
        write_all_at(&self.file, offset, buf)
    }

    /// Read exactly `buf.len()` bytes from `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::HandleInvalid);
        }
        read_exact_at(&self.file, offset, buf)
    }

    /// Force buffered data down to stable storage.
    pub fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::HandleInvalid);
        }
        self.file.sync_all().map_err(|e| BoltError::from_io(&e))
    }

    /// Flush and mark closed. Idempotent; later writes fail with
    /// `HandleInvalid`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.file.sync_all();
        debug!(path = %self.path.display(), "output file closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        let meta = self.file.metadata().map_err(|e| BoltError::from_io(&e))?;
        Ok(meta.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(true)
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, mut offset: u64, mut buf: &[u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    while !buf.is_empty() {
        let written = file
            .write_at(buf, offset)
            .map_err(|e| BoltError::from_io(&e))?;
        if written == 0 {
            return Err(BoltError::Write("zero-length write".to_string()));
        }
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut offset: u64, mut buf: &[u8]) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let written = file
            .seek_write(buf, offset)
            .map_err(|e| BoltError::from_io(&e))?;
        if written == 0 {
            return Err(BoltError::Write("zero-length write".to_string()));
        }
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
        .map_err(|e| BoltError::Read(e.to_string()))
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let read = file
            .seek_read(buf, offset)
            .map_err(|e| BoltError::Read(e.to_string()))?;
        if read == 0 {
            return Err(BoltError::Read("unexpected end of file".to_string()));
        }
        let rest = buf;
        buf = &mut rest[read..];
        offset += read as u64;
    }
    Ok(())
}
