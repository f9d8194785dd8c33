//! Streaming ZIP writer.
//!
//! Entries are deflated as they are written and appended in arrival order.
//! The sink only needs [`Write`]: local headers carry the data-descriptor flag
//! with zeroed CRC and sizes, a data descriptor follows each entry's bytes and
//! the central directory written by [`ZipWriter::finish`] holds the real
//! values.

use crc32fast::Hasher;
use std::io::{self, Write};
use tracing::{debug, trace};

use crate::codec::{BEST_COMPRESSION, Deflater};
use crate::error::{Result, TorrentZipError};

use super::cursor::{ByteWriter, CountingWriter};
use super::structures::*;

/// A 32-bit field holding this value or more must move to a zip64 extra.
fn overflows32(value: u64) -> bool {
    value >= UINT32_MAX
}

struct OpenEntry {
    hasher: Hasher,
    uncompressed: u64,
    compressed: u64,
}

/// ZIP writer producing deflated entries in arrival order.
pub struct ZipWriter<W: Write> {
    out: CountingWriter<W>,
    entries: Vec<ZipFileEntry>,
    current: Option<OpenEntry>,
    deflater: Deflater,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter::new(inner),
            entries: Vec::new(),
            current: None,
            deflater: Deflater::new(BEST_COMPRESSION),
        }
    }

    /// Start a new entry and return a sink for its uncompressed contents.
    ///
    /// Any entry still open is finished first.
    pub fn create(&mut self, name: &str) -> Result<EntryWriter<'_, W>> {
        self.create_bytes(name.as_bytes())
    }

    /// [`ZipWriter::create`] for a name given as stored bytes, which need
    /// not be UTF-8.
    pub fn create_bytes(&mut self, name: &[u8]) -> Result<EntryWriter<'_, W>> {
        self.finish_entry()?;

        if name.len() > u16::MAX as usize {
            return Err(TorrentZipError::NameTooLong(name.len()));
        }

        let entry = ZipFileEntry {
            file_name: String::from_utf8_lossy(name).into_owned(),
            raw_name: name.to_vec(),
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: CompressionMethod::Deflate,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: self.out.count(),
            last_mod_time: 0,
            last_mod_date: 0,
            extra: Vec::new(),
            is_directory: name.ends_with(b"/"),
        };
        write_local_header(&mut self.out, &entry)?;
        trace!(name = %entry.file_name, offset = entry.lfh_offset, "opened entry");

        self.entries.push(entry);
        self.deflater.reset();
        self.current = Some(OpenEntry {
            hasher: Hasher::new(),
            uncompressed: 0,
            compressed: 0,
        });

        Ok(EntryWriter { zip: self })
    }

    /// Entries written so far, in arrival order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    fn write_current(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::other("no open zip entry"))?;
        current.compressed += self.deflater.write(buf, &mut self.out)?;
        current.hasher.update(buf);
        current.uncompressed += buf.len() as u64;
        Ok(buf.len())
    }

    fn finish_entry(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        let compressed = current.compressed + self.deflater.finish(&mut self.out)?;

        let entry = self
            .entries
            .last_mut()
            .ok_or_else(|| io::Error::other("open entry without a header"))?;
        entry.crc32 = current.hasher.finalize();
        entry.compressed_size = compressed;
        entry.uncompressed_size = current.uncompressed;

        let mut buf = [0u8; 24];
        let mut b = ByteWriter::new(&mut buf);
        b.put32(DATA_DESCRIPTOR_SIGNATURE);
        b.put32(entry.crc32);
        if overflows32(entry.compressed_size) || overflows32(entry.uncompressed_size) {
            b.put64(entry.compressed_size);
            b.put64(entry.uncompressed_size);
        } else {
            b.put32(entry.compressed_size as u32);
            b.put32(entry.uncompressed_size as u32);
        }
        let len = b.position();
        self.out.write_all(&buf[..len])?;

        debug!(
            name = %entry.file_name,
            uncompressed = entry.uncompressed_size,
            compressed = entry.compressed_size,
            "finished entry"
        );
        Ok(())
    }

    /// Finish the open entry, write the central directory and end records
    /// and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.finish_entry()?;

        let start = self.out.count();
        for entry in &self.entries {
            write_central_header(&mut self.out, entry)?;
        }
        let end = self.out.count();

        let records = self.entries.len() as u64;
        let size = end - start;
        if records >= UINT16_MAX || overflows32(size) || overflows32(start) {
            write_zip64_end(&mut self.out, records, size, start, end)?;
        }
        write_end_record(&mut self.out, records, size, start, &[])?;

        self.out.flush()?;
        Ok(self.out.into_inner())
    }
}

/// Sink for the contents of the entry opened by [`ZipWriter::create`].
pub struct EntryWriter<'a, W: Write> {
    zip: &'a mut ZipWriter<W>,
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.zip.write_current(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.zip.out.flush()
    }
}

fn write_local_header<W: Write>(w: &mut W, entry: &ZipFileEntry) -> io::Result<()> {
    let mut buf = [0u8; LFH_SIZE];
    let mut b = ByteWriter::new(&mut buf);
    b.put32(LFH_SIGNATURE);
    b.put16(VERSION_DEFLATE);
    b.put16(entry.flags);
    b.put16(entry.compression_method.as_u16());
    b.put16(entry.last_mod_time);
    b.put16(entry.last_mod_date);
    b.put32(0); // crc32, in the data descriptor
    b.put32(0); // compressed size
    b.put32(0); // uncompressed size
    b.put16(entry.raw_name.len() as u16);
    b.put16(0); // extra length
    w.write_all(&buf)?;
    w.write_all(&entry.raw_name)
}

fn write_central_header<W: Write>(w: &mut W, entry: &ZipFileEntry) -> io::Result<()> {
    let mut extra = [0u8; 28];
    let mut eb = ByteWriter::new(&mut extra);
    let big_uncompressed = overflows32(entry.uncompressed_size);
    let big_compressed = overflows32(entry.compressed_size);
    let big_offset = overflows32(entry.lfh_offset);
    let zip64 = big_uncompressed || big_compressed || big_offset;
    if zip64 {
        let count = [big_uncompressed, big_compressed, big_offset]
            .iter()
            .filter(|&&big| big)
            .count();
        eb.put16(ZIP64_EXTRA_ID);
        eb.put16(8 * count as u16);
        if big_uncompressed {
            eb.put64(entry.uncompressed_size);
        }
        if big_compressed {
            eb.put64(entry.compressed_size);
        }
        if big_offset {
            eb.put64(entry.lfh_offset);
        }
    }
    let extra_len = eb.position();
    let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE };

    let mut buf = [0u8; CDFH_MIN_SIZE];
    let mut b = ByteWriter::new(&mut buf);
    b.put32(CDFH_SIGNATURE);
    b.put16(version); // version made by, creator 0
    b.put16(version); // version needed to extract
    b.put16(entry.flags);
    b.put16(entry.compression_method.as_u16());
    b.put16(entry.last_mod_time);
    b.put16(entry.last_mod_date);
    b.put32(entry.crc32);
    b.put32(entry.compressed_size.min(UINT32_MAX) as u32);
    b.put32(entry.uncompressed_size.min(UINT32_MAX) as u32);
    b.put16(entry.raw_name.len() as u16);
    b.put16(extra_len as u16);
    b.put16(0); // comment length
    b.put16(0); // disk number start
    b.put16(0); // internal attributes
    b.put32(0); // external attributes
    b.put32(entry.lfh_offset.min(UINT32_MAX) as u32);
    w.write_all(&buf)?;
    w.write_all(&entry.raw_name)?;
    w.write_all(&extra[..extra_len])
}

/// Write a zip64 end of central directory record followed by its locator.
///
/// `record_offset` is where the record itself starts, i.e. the end of the
/// central directory.
pub(crate) fn write_zip64_end<W: Write>(
    w: &mut W,
    records: u64,
    size: u64,
    offset: u64,
    record_offset: u64,
) -> io::Result<()> {
    let mut buf = [0u8; Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE];
    let mut b = ByteWriter::new(&mut buf);

    b.put32(Zip64EOCD::SIGNATURE);
    b.put64(Zip64EOCD::MIN_SIZE as u64 - 12); // size of the remaining record
    b.put16(VERSION_ZIP64); // version made by
    b.put16(VERSION_ZIP64); // version needed to extract
    b.put32(0); // number of this disk
    b.put32(0); // disk with the start of the central directory
    b.put64(records); // entries on this disk
    b.put64(records); // total entries
    b.put64(size);
    b.put64(offset);

    b.put32(Zip64EOCDLocator::SIGNATURE);
    b.put32(0); // disk with the zip64 end record
    b.put64(record_offset);
    b.put32(1); // total number of disks

    w.write_all(&buf)
}

/// Write the classic end of central directory record and `comment`.
///
/// Values that do not fit are clamped to their sentinel so readers fall back
/// to the zip64 record.
pub(crate) fn write_end_record<W: Write>(
    w: &mut W,
    records: u64,
    size: u64,
    offset: u64,
    comment: &[u8],
) -> io::Result<()> {
    let records = records.min(UINT16_MAX) as u16;

    let mut buf = [0u8; EndOfCentralDirectory::SIZE];
    let mut b = ByteWriter::new(&mut buf);
    b.put32(EndOfCentralDirectory::SIGNATURE);
    b.put16(0); // number of this disk
    b.put16(0); // disk with the start of the central directory
    b.put16(records);
    b.put16(records);
    b.put32(size.min(UINT32_MAX) as u32);
    b.put32(offset.min(UINT32_MAX) as u32);
    b.put16(comment.len() as u16);
    w.write_all(&buf)?;
    w.write_all(comment)
}
