//! TorrentZip writer.
//!
//! Entries are streamed into a staging archive as they arrive. On
//! [`Writer::close`] the staging archive is reopened and its compressed
//! entries are copied, without recompression, into the final sink in
//! case-insensitive name order with all variable metadata pinned. The
//! archive comment carries the CRC32 of the resulting central directory, so
//! two runs over the same contents produce identical bytes.
//!
//! ```no_run
//! use std::io::Write;
//!
//! # fn main() -> torrentzip::Result<()> {
//! let file = std::fs::File::create("out.zip")?;
//! let mut zip = torrentzip::Writer::new(file)?;
//! zip.create("b.txt")?.write_all(b"hello")?;
//! zip.create("A.txt")?.write_all(b"world")?;
//! zip.close()?;
//! # Ok(())
//! # }
//! ```

mod headers;

use std::io::{self, Write};
use std::path::MAIN_SEPARATOR;
use tracing::{debug, trace};

use crate::error::Result;
use crate::staging::{StagingMode, StagingStore};
use crate::zip::cursor::{CountingWriter, CrcWriter};
use crate::zip::{
    EntryWriter, UINT16_MAX, UINT32_MAX, ZipReader, ZipWriter, write_end_record, write_zip64_end,
};

pub use headers::{
    COMMENT_LEN, COMMENT_PREFIX, CREATOR_FAT, DOS_DATE, DOS_TIME, FLAG_MAX_COMPRESSION,
    METHOD_DEFLATE, directory_comment, write_central_header, write_local_header,
};

/// Options for [`Writer::with_options`].
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Where entries wait until the archive is closed.
    pub staging: StagingMode,
}

/// Writer producing a TorrentZip archive into `W`.
///
/// Nothing reaches the sink before [`Writer::close`].
pub struct Writer<W: Write> {
    staging: ZipWriter<StagingStore>,
    sink: W,
}

impl<W: Write> Writer<W> {
    /// Create a writer staging its entries in an anonymous temporary file.
    pub fn new(sink: W) -> Result<Self> {
        Self::with_options(sink, &WriterOptions::default())
    }

    pub fn with_options(sink: W, options: &WriterOptions) -> Result<Self> {
        let store = StagingStore::new(&options.staging)?;
        Ok(Self {
            staging: ZipWriter::new(store),
            sink,
        })
    }

    /// Add an entry called `name` and return a sink for its contents.
    ///
    /// The name is kept as given until the archive is closed. Writing to a
    /// new entry finishes the previous one.
    pub fn create(&mut self, name: &str) -> Result<EntryWriter<'_, StagingStore>> {
        self.staging.create(name)
    }

    /// [`Writer::create`] for a name given as raw bytes, such as a CP437
    /// name read back from an existing archive.
    pub fn create_bytes(&mut self, name: &[u8]) -> Result<EntryWriter<'_, StagingStore>> {
        self.staging.create_bytes(name)
    }

    /// Write the canonical archive to the sink and return it.
    ///
    /// On error the sink holds a partial archive and must be discarded. The
    /// staging storage is released either way.
    pub fn close(self) -> Result<W> {
        let Writer { staging, sink } = self;

        let source = staging.finish()?.into_source()?;
        let reader = ZipReader::new(source)?;

        let mut order: Vec<Placement> = reader
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| Placement {
                name: canonical_name(&entry.raw_name),
                index,
                offset: 0,
            })
            .collect();
        sort_canonical(&mut order);

        let mut out = CountingWriter::new(sink);
        for placement in &mut order {
            let entry = &reader.entries()[placement.index];
            placement.offset = out.count();
            write_local_header(&mut out, entry, &placement.name)?;
            let copied = io::copy(&mut reader.open_raw(entry)?, &mut out)?;
            trace!(
                name = %entry.file_name,
                offset = placement.offset,
                compressed = copied,
                "emitted entry"
            );
        }

        let start = out.count();
        let mut directory = CrcWriter::new(&mut out);
        for placement in &order {
            let entry = &reader.entries()[placement.index];
            write_central_header(&mut directory, entry, &placement.name, placement.offset)?;
        }
        let directory_crc = directory.crc32();
        let end = out.count();

        let records = order.len() as u64;
        let size = end - start;
        if records > UINT16_MAX || size > UINT32_MAX || start > UINT32_MAX {
            debug!(records, size, offset = start, "writing zip64 end records");
            write_zip64_end(&mut out, records, size, start, end)?;
        }

        let comment = directory_comment(directory_crc);
        write_end_record(&mut out, records, size, start, comment.as_bytes())?;
        out.flush()?;

        debug!(entries = records, bytes = out.count(), %comment, "wrote torrentzip archive");

        // Dropping the reader releases the staging storage.
        drop(reader);
        Ok(out.into_inner())
    }
}

/// Where an entry of the staging archive lands in the final archive.
struct Placement {
    name: Vec<u8>,
    index: usize,
    offset: u64,
}

/// Entry name with the platform path separator replaced by `/`.
pub fn canonical_name(name: &[u8]) -> Vec<u8> {
    let separator = MAIN_SEPARATOR as u8;
    name.iter()
        .map(|&b| if b == separator { b'/' } else { b })
        .collect()
}

/// Case-insensitive ascending order; entries equal under it keep their
/// arrival order.
fn sort_canonical(order: &mut [Placement]) {
    order.sort_by_cached_key(|placement| fold_case(&placement.name));
}

/// Sort key of a name: each character lowercased on its own, without
/// context rules such as final sigma. Every byte outside a valid UTF-8
/// sequence becomes U+FFFD.
fn fold_case(name: &[u8]) -> String {
    let mut folded = String::with_capacity(name.len());
    for chunk in name.utf8_chunks() {
        folded.extend(chunk.valid().chars().map(lowercase_char));
        folded.extend(chunk.invalid().iter().map(|_| char::REPLACEMENT_CHARACTER));
    }
    folded
}

/// Single-character lowercase mapping. U+0130 is the only character whose
/// full mapping is longer; it folds to plain `i`.
fn lowercase_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placements(names: &[&str]) -> Vec<Placement> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| Placement {
                name: name.as_bytes().to_vec(),
                index,
                offset: 0,
            })
            .collect()
    }

    fn canonical(zip: Writer<Vec<u8>>) -> ZipReader<Vec<u8>> {
        ZipReader::new(zip.close().unwrap()).unwrap()
    }

    #[test]
    fn ordering_ignores_case_and_keeps_ties_stable() {
        let mut order = placements(&["b.txt", "A.txt", "a.TXT", "B/", "a.txt"]);
        sort_canonical(&mut order);
        // '.' sorts before '/'
        assert_eq!(sorted_names(&order), ["A.txt", "a.TXT", "a.txt", "b.txt", "B/"]);
    }

    fn sorted_names(order: &[Placement]) -> Vec<String> {
        order
            .iter()
            .map(|p| String::from_utf8_lossy(&p.name).into_owned())
            .collect()
    }

    #[test]
    fn ordering_lowercases_each_character_alone() {
        // Context-free folding: final sigma is not special and dotted
        // capital I folds to a single `i`, so both pairs tie.
        let mut order = placements(&["ασ", "ΑΣ", "İ", "i"]);
        sort_canonical(&mut order);
        assert_eq!(sorted_names(&order), ["İ", "i", "ασ", "ΑΣ"]);

        assert_eq!(fold_case("ΑΣ".as_bytes()), "ασ");
        assert_eq!(fold_case("İx".as_bytes()), "ix");
    }

    #[test]
    fn ordering_replaces_each_invalid_byte() {
        assert_eq!(fold_case(b"A\x82\x8aB"), "a\u{FFFD}\u{FFFD}b");
        assert_eq!(fold_case(b"\xe2\x82Z"), "\u{FFFD}\u{FFFD}z");
    }

    #[test]
    fn canonical_name_uses_forward_slashes() {
        let native = format!("dir{MAIN_SEPARATOR}file.bin");
        assert_eq!(canonical_name(native.as_bytes()), b"dir/file.bin");
        assert_eq!(canonical_name(b"dir/file.bin"), b"dir/file.bin");
    }

    #[test]
    fn names_that_are_not_utf8_are_kept() {
        let mut zip = Writer::with_options(
            Vec::new(),
            &WriterOptions {
                staging: StagingMode::Memory,
            },
        )
        .unwrap();
        // "Çüé.txt" in CP437.
        zip.create_bytes(b"\x80\x81\x82.txt").unwrap().write_all(b"box").unwrap();
        zip.create("a.txt").unwrap();

        let reader = canonical(zip);
        assert_eq!(reader.entries()[0].raw_name, b"a.txt");
        let entry = &reader.entries()[1];
        assert_eq!(entry.raw_name, b"\x80\x81\x82.txt");
        assert_eq!(entry.file_name, "\u{FFFD}\u{FFFD}\u{FFFD}.txt");
        assert_eq!(reader.read_entry(entry).unwrap(), b"box");
    }

    #[test]
    fn empty_archive_has_only_the_end_record() {
        let zip = Writer::new(Vec::new()).unwrap();
        let out = zip.close().unwrap();
        assert_eq!(out.len(), 22 + COMMENT_LEN);

        let reader = ZipReader::new(out).unwrap();
        assert!(reader.entries().is_empty());
        // CRC32 of no bytes is zero.
        assert_eq!(reader.comment(), b"TORRENTZIPPED-00000000");
    }

    #[test]
    fn entries_are_reordered_and_readable() {
        let mut zip = Writer::with_options(
            Vec::new(),
            &WriterOptions {
                staging: StagingMode::Memory,
            },
        )
        .unwrap();
        zip.create("zeta").unwrap().write_all(b"last").unwrap();
        zip.create("Alpha").unwrap().write_all(b"first").unwrap();
        zip.create("empty").unwrap();

        let reader = canonical(zip);
        let names: Vec<_> = reader.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["Alpha", "empty", "zeta"]);
        assert_eq!(reader.read_entry(&reader.entries()[0]).unwrap(), b"first");
        assert_eq!(reader.read_entry(&reader.entries()[1]).unwrap(), b"");
        assert_eq!(reader.read_entry(&reader.entries()[2]).unwrap(), b"last");

        for entry in reader.entries() {
            assert_eq!(entry.flags, FLAG_MAX_COMPRESSION);
            assert_eq!(entry.last_mod_time, DOS_TIME);
            assert_eq!(entry.last_mod_date, DOS_DATE);
            assert!(entry.extra.is_empty());
        }
    }

    #[test]
    fn local_offsets_point_at_the_sorted_headers() {
        let mut zip = Writer::new(Vec::new()).unwrap();
        zip.create("b").unwrap().write_all(b"bbbb").unwrap();
        zip.create("a").unwrap().write_all(b"aa").unwrap();

        let reader = canonical(zip);
        let a = &reader.entries()[0];
        let b = &reader.entries()[1];
        assert_eq!(a.lfh_offset, 0);
        assert_eq!(b.lfh_offset, 30 + 1 + a.compressed_size);
    }
}
