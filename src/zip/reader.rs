use crc32fast::Hasher;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::codec::InflateReader;
use crate::error::{Result, TorrentZipError};
use crate::io::{LocalFileReader, ReadAt};

use super::parser::{DirectoryLocation, ZipParser};
use super::structures::{CompressionMethod, EndOfCentralDirectory, ZipFileEntry};

/// Random access ZIP reader.
///
/// Entries are listed in the order they are stored in the central directory.
/// Their data can be read back either verbatim ([`ZipReader::open_raw`]) or
/// decompressed and checksummed ([`ZipReader::open`]).
pub struct ZipReader<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<ZipFileEntry>,
    directory: DirectoryLocation,
    comment: Vec<u8>,
}

impl ZipReader<LocalFileReader> {
    /// Open the archive at `path`.
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::new(LocalFileReader::new(path)?)
    }
}

impl<R: ReadAt> ZipReader<R> {
    /// Parse the end records and the central directory of `reader`.
    pub fn new(reader: R) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let (directory, eocd, eocd_offset) = parser.locate_directory()?;
        let entries = parser.read_directory(&directory)?;

        let mut comment = vec![0u8; eocd.comment_len as usize];
        parser
            .reader()
            .read_exact_at(eocd_offset + EndOfCentralDirectory::SIZE as u64, &mut comment)?;

        Ok(Self {
            parser,
            entries,
            directory,
            comment,
        })
    }

    /// All entries in stored order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// Position, size and record count of the central directory.
    pub fn directory(&self) -> DirectoryLocation {
        self.directory
    }

    /// The archive comment.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// First entry called `name`, if any.
    pub fn find(&self, name: &str) -> Option<&ZipFileEntry> {
        self.entries.iter().find(|e| e.file_name == name)
    }

    /// Reader over the entry's data exactly as stored, without inflating.
    pub fn open_raw(&self, entry: &ZipFileEntry) -> Result<RawEntryReader<'_, R>> {
        let offset = self.parser.get_data_offset(entry)?;
        Ok(RawEntryReader {
            source: self.parser.reader(),
            offset,
            remaining: entry.compressed_size,
        })
    }

    /// Reader over the entry's uncompressed contents.
    ///
    /// The CRC32 and uncompressed size recorded in the directory are checked
    /// once the data has been read to the end.
    pub fn open(&self, entry: &ZipFileEntry) -> Result<Box<dyn Read + '_>> {
        if entry.is_encrypted() {
            return Err(TorrentZipError::format(format!(
                "{} is encrypted",
                entry.file_name
            )));
        }

        let raw = self.open_raw(entry)?;
        let body: Box<dyn Read + '_> = match entry.compression_method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflate => Box::new(InflateReader::new(BufReader::new(raw))),
            CompressionMethod::Unknown(method) => {
                return Err(TorrentZipError::format(format!(
                    "unsupported compression method {method} for {}",
                    entry.file_name
                )));
            }
        };

        Ok(Box::new(ChecksumReader::new(body, entry)))
    }

    /// Inflate an entry into memory.
    pub fn read_entry(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open(entry)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Reader over a byte range of a [`ReadAt`] source.
pub struct RawEntryReader<'a, R: ReadAt> {
    source: &'a R,
    offset: u64,
    remaining: u64,
}

impl<R: ReadAt> RawEntryReader<'_, R> {
    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: ReadAt> Read for RawEntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.offset, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry data truncated",
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Verifies CRC32 and length of everything read through it.
struct ChecksumReader<R> {
    inner: R,
    hasher: Hasher,
    read: u64,
    expected_crc: u32,
    expected_size: u64,
    name: String,
}

impl<R: Read> ChecksumReader<R> {
    fn new(inner: R, entry: &ZipFileEntry) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            read: 0,
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            name: entry.file_name.clone(),
        }
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.read += n as u64;
            if self.read > self.expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is longer than recorded", self.name),
                ));
            }
            return Ok(n);
        }

        if buf.is_empty() {
            return Ok(0);
        }
        if self.read != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} is {} bytes, expected {}",
                    self.name, self.read, self.expected_size
                ),
            ));
        }
        if self.hasher.clone().finalize() != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("checksum mismatch for {}", self.name),
            ));
        }
        Ok(0)
    }
}
