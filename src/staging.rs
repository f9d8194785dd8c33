//! Scoped storage for the intermediate archive.
//!
//! The staging archive is written once, front to back, and then reopened for
//! random access reads. File-backed staging uses an anonymous temporary file
//! that the OS reclaims as soon as the handle is dropped, whatever path the
//! owner takes out of scope.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use crate::io::{LocalFileReader, ReadAt};

/// Where staged entries are kept until the archive is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingMode {
    /// Anonymous temporary file, in `dir` or the system temp directory.
    TempFile { dir: Option<PathBuf> },
    /// Growable in-memory buffer. Only sensible for bounded archive sizes.
    Memory,
}

impl Default for StagingMode {
    fn default() -> Self {
        StagingMode::TempFile { dir: None }
    }
}

/// Write side of the staging storage.
pub enum StagingStore {
    File(BufWriter<File>),
    Memory(Vec<u8>),
}

impl StagingStore {
    pub fn new(mode: &StagingMode) -> io::Result<Self> {
        Ok(match mode {
            StagingMode::TempFile { dir: Some(dir) } => {
                StagingStore::File(BufWriter::new(tempfile::tempfile_in(dir)?))
            }
            StagingMode::TempFile { dir: None } => {
                StagingStore::File(BufWriter::new(tempfile::tempfile()?))
            }
            StagingMode::Memory => StagingStore::Memory(Vec::new()),
        })
    }

    /// Flush everything written and reopen the storage for reading.
    pub fn into_source(self) -> io::Result<StagingSource> {
        match self {
            StagingStore::File(writer) => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                Ok(StagingSource::File(LocalFileReader::from_file(file)?))
            }
            StagingStore::Memory(buf) => Ok(StagingSource::Memory(buf)),
        }
    }
}

impl Write for StagingStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StagingStore::File(w) => w.write(buf),
            StagingStore::Memory(v) => v.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StagingStore::File(w) => w.flush(),
            StagingStore::Memory(_) => Ok(()),
        }
    }
}

/// Read side of the staging storage.
pub enum StagingSource {
    File(LocalFileReader),
    Memory(Vec<u8>),
}

impl ReadAt for StagingSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StagingSource::File(r) => r.read_at(offset, buf),
            StagingSource::Memory(v) => v.read_at(offset, buf),
        }
    }

    fn size(&self) -> u64 {
        match self {
            StagingSource::File(r) => r.size(),
            StagingSource::Memory(v) => v.size(),
        }
    }
}
