//! Disk I/O shim.
//!
//! External collaborator: an offset-addressed byte reader/writer over a
//! single image file. The operation engine never opens the image file
//! itself; it only ever goes through a `Disk`, so every access is a
//! `pread`/`pwrite`-style call at an absolute byte offset. No caching, no
//! write coalescing — a write lands on the image the moment the call
//! returns.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::SfsError;

pub struct Disk {
    file: File,
}

impl Disk {
    /// Opens an existing image file for reading and writing.
    pub fn open(path: &Path) -> Result<Self, SfsError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Reads exactly `buf.len()` bytes starting at byte offset `off`.
    pub fn read(&mut self, buf: &mut [u8], off: u64) -> Result<(), SfsError> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes all of `buf` starting at byte offset `off`.
    pub fn write(&mut self, buf: &[u8], off: u64) -> Result<(), SfsError> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Current size of the underlying file in bytes.
    pub fn len(&self) -> Result<u64, SfsError> {
        Ok(self.file.metadata()?.len())
    }
}
