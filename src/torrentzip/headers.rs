//! Header records of the canonical archive.
//!
//! Every value that a regular writer would take from the entry (flags,
//! method, timestamps) is pinned here, so the same contents always serialize
//! to the same bytes.

use std::io::{self, Write};

use crate::zip::cursor::ByteWriter;
use crate::zip::{
    CDFH_MIN_SIZE, CDFH_SIGNATURE, LFH_SIGNATURE, LFH_SIZE, UINT32_MAX, VERSION_DEFLATE,
    VERSION_ZIP64, ZIP64_EXTRA_ID, ZipFileEntry,
};

/// General purpose flag: deflate at maximum compression.
pub const FLAG_MAX_COMPRESSION: u16 = 2;
pub const METHOD_DEFLATE: u16 = 8;
/// Fixed DOS time field (23:32:00).
pub const DOS_TIME: u16 = 48128;
/// Fixed DOS date field (1996-12-24).
pub const DOS_DATE: u16 = 8600;
/// Host system in "version made by": MS-DOS/FAT.
pub const CREATOR_FAT: u16 = 0;

pub const COMMENT_PREFIX: &str = "TORRENTZIPPED-";
/// Length of the archive comment: the prefix plus eight hex digits.
pub const COMMENT_LEN: usize = COMMENT_PREFIX.len() + 8;

/// Archive comment for a central directory with the given CRC32.
pub fn directory_comment(crc: u32) -> String {
    format!("{COMMENT_PREFIX}{crc:08X}")
}

/// Write the local file header of `entry` under `name`.
///
/// A zip64 entry gets sentinel sizes and an extra block holding the
/// uncompressed then compressed size.
pub fn write_local_header<W: Write + ?Sized>(
    w: &mut W,
    entry: &ZipFileEntry,
    name: &[u8],
) -> io::Result<()> {
    let zip64 = entry.needs_zip64();

    let mut extra = [0u8; 20];
    let extra_len = if zip64 {
        let mut eb = ByteWriter::new(&mut extra);
        eb.put16(ZIP64_EXTRA_ID);
        eb.put16(16);
        eb.put64(entry.uncompressed_size);
        eb.put64(entry.compressed_size);
        eb.position()
    } else {
        0
    };

    let mut buf = [0u8; LFH_SIZE];
    let mut b = ByteWriter::new(&mut buf);
    b.put32(LFH_SIGNATURE);
    b.put16(if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE });
    b.put16(FLAG_MAX_COMPRESSION);
    b.put16(METHOD_DEFLATE);
    b.put16(DOS_TIME);
    b.put16(DOS_DATE);
    b.put32(entry.crc32);
    if zip64 {
        b.put32(UINT32_MAX as u32);
        b.put32(UINT32_MAX as u32);
    } else {
        b.put32(entry.compressed_size as u32);
        b.put32(entry.uncompressed_size as u32);
    }
    b.put16(name.len() as u16);
    b.put16(extra_len as u16);

    w.write_all(&buf)?;
    w.write_all(name)?;
    w.write_all(&extra[..extra_len])
}

/// Write the central directory record of `entry` under `name`, whose local
/// header starts at `offset`.
pub fn write_central_header<W: Write + ?Sized>(
    w: &mut W,
    entry: &ZipFileEntry,
    name: &[u8],
    offset: u64,
) -> io::Result<()> {
    let big_uncompressed = entry.uncompressed_size > UINT32_MAX;
    let big_compressed = entry.compressed_size > UINT32_MAX;
    let big_offset = offset > UINT32_MAX;
    let zip64 = big_uncompressed || big_compressed || big_offset;

    let mut extra = [0u8; 28];
    let mut eb = ByteWriter::new(&mut extra);
    if zip64 {
        let fields = [big_uncompressed, big_compressed, big_offset]
            .into_iter()
            .filter(|&big| big)
            .count();
        eb.put16(ZIP64_EXTRA_ID);
        eb.put16(8 * fields as u16);
        if big_uncompressed {
            eb.put64(entry.uncompressed_size);
        }
        if big_compressed {
            eb.put64(entry.compressed_size);
        }
        if big_offset {
            eb.put64(offset);
        }
    }
    let extra_len = eb.position();

    let mut buf = [0u8; CDFH_MIN_SIZE];
    let mut b = ByteWriter::new(&mut buf);
    b.put32(CDFH_SIGNATURE);
    b.put16(CREATOR_FAT);
    b.put16(if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE });
    b.put16(FLAG_MAX_COMPRESSION);
    b.put16(METHOD_DEFLATE);
    b.put16(DOS_TIME);
    b.put16(DOS_DATE);
    b.put32(entry.crc32);
    b.put32(entry.compressed_size.min(UINT32_MAX) as u32);
    b.put32(entry.uncompressed_size.min(UINT32_MAX) as u32);
    b.put16(name.len() as u16);
    b.put16(extra_len as u16);
    b.put16(0); // comment length
    b.put16(0); // disk number start
    b.put16(0); // internal attributes
    b.put32(0); // external attributes
    b.put32(offset.min(UINT32_MAX) as u32);

    w.write_all(&buf)?;
    w.write_all(name)?;
    w.write_all(&extra[..extra_len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;
    use byteorder::{ByteOrder, LittleEndian};

    fn entry(compressed: u64, uncompressed: u64) -> ZipFileEntry {
        ZipFileEntry {
            file_name: "staged\\name".into(),
            raw_name: b"staged\\name".to_vec(),
            flags: 8,
            compression_method: CompressionMethod::Deflate,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            crc32: 0xDEAD_BEEF,
            lfh_offset: 1234,
            last_mod_time: 1,
            last_mod_date: 2,
            extra: vec![0xAA; 6],
            is_directory: false,
        }
    }

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        LittleEndian::read_u16(&buf[at..at + 2])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        LittleEndian::read_u32(&buf[at..at + 4])
    }

    fn u64_at(buf: &[u8], at: usize) -> u64 {
        LittleEndian::read_u64(&buf[at..at + 8])
    }

    #[test]
    fn local_header_pins_metadata() {
        let mut out = Vec::new();
        write_local_header(&mut out, &entry(3, 5), b"a.txt").unwrap();

        assert_eq!(out.len(), LFH_SIZE + 5);
        assert_eq!(u32_at(&out, 0), LFH_SIGNATURE);
        assert_eq!(u16_at(&out, 4), VERSION_DEFLATE);
        assert_eq!(u16_at(&out, 6), FLAG_MAX_COMPRESSION);
        assert_eq!(u16_at(&out, 8), METHOD_DEFLATE);
        assert_eq!(u16_at(&out, 10), DOS_TIME);
        assert_eq!(u16_at(&out, 12), DOS_DATE);
        assert_eq!(u32_at(&out, 14), 0xDEAD_BEEF);
        assert_eq!(u32_at(&out, 18), 3);
        assert_eq!(u32_at(&out, 22), 5);
        assert_eq!(u16_at(&out, 26), 5);
        assert_eq!(u16_at(&out, 28), 0, "source extra must not leak");
        assert_eq!(&out[LFH_SIZE..], b"a.txt");
    }

    #[test]
    fn oversized_entry_gets_zip64_local_header() {
        let mut out = Vec::new();
        write_local_header(&mut out, &entry(4_900_000_000, 5_000_000_000), b"big").unwrap();

        assert_eq!(u16_at(&out, 4), VERSION_ZIP64);
        assert_eq!(u32_at(&out, 18), 0xFFFF_FFFF);
        assert_eq!(u32_at(&out, 22), 0xFFFF_FFFF);
        assert_eq!(u16_at(&out, 28), 20);

        let extra = &out[LFH_SIZE + 3..];
        assert_eq!(extra.len(), 20);
        assert_eq!(u16_at(extra, 0), ZIP64_EXTRA_ID);
        assert_eq!(u16_at(extra, 2), 16);
        assert_eq!(u64_at(extra, 4), 5_000_000_000);
        assert_eq!(u64_at(extra, 12), 4_900_000_000);
    }

    #[test]
    fn size_at_the_limit_stays_32_bit() {
        let mut out = Vec::new();
        write_local_header(&mut out, &entry(1, UINT32_MAX), b"x").unwrap();
        assert_eq!(u16_at(&out, 4), VERSION_DEFLATE);
        assert_eq!(u16_at(&out, 28), 0);
    }

    #[test]
    fn central_header_pins_metadata() {
        let mut out = Vec::new();
        write_central_header(&mut out, &entry(3, 5), b"a.txt", 77).unwrap();

        assert_eq!(out.len(), CDFH_MIN_SIZE + 5);
        assert_eq!(u32_at(&out, 0), CDFH_SIGNATURE);
        assert_eq!(u16_at(&out, 4), CREATOR_FAT);
        assert_eq!(u16_at(&out, 6), VERSION_DEFLATE);
        assert_eq!(u16_at(&out, 8), FLAG_MAX_COMPRESSION);
        assert_eq!(u16_at(&out, 10), METHOD_DEFLATE);
        assert_eq!(u16_at(&out, 12), DOS_TIME);
        assert_eq!(u16_at(&out, 14), DOS_DATE);
        assert_eq!(u32_at(&out, 20), 3);
        assert_eq!(u32_at(&out, 24), 5);
        assert_eq!(u16_at(&out, 30), 0);
        assert_eq!(u32_at(&out, 42), 77);
    }

    #[test]
    fn central_header_extra_holds_only_overflowing_fields() {
        let mut out = Vec::new();
        let offset = 6_000_000_000;
        write_central_header(&mut out, &entry(10, 20), b"far", offset).unwrap();

        assert_eq!(u16_at(&out, 6), VERSION_ZIP64);
        assert_eq!(u32_at(&out, 20), 10);
        assert_eq!(u32_at(&out, 24), 20);
        assert_eq!(u16_at(&out, 30), 12);
        assert_eq!(u32_at(&out, 42), 0xFFFF_FFFF);

        let extra = &out[CDFH_MIN_SIZE + 3..];
        assert_eq!(u16_at(extra, 0), ZIP64_EXTRA_ID);
        assert_eq!(u16_at(extra, 2), 8);
        assert_eq!(u64_at(extra, 4), offset);
    }

    #[test]
    fn central_header_extra_orders_uncompressed_first() {
        let mut out = Vec::new();
        write_central_header(&mut out, &entry(4_400_000_000, 5_000_000_000), b"big", 0).unwrap();

        assert_eq!(u32_at(&out, 20), 0xFFFF_FFFF);
        assert_eq!(u32_at(&out, 24), 0xFFFF_FFFF);
        let extra = &out[CDFH_MIN_SIZE + 3..];
        assert_eq!(u16_at(extra, 2), 16);
        assert_eq!(u64_at(extra, 4), 5_000_000_000);
        assert_eq!(u64_at(extra, 12), 4_400_000_000);
    }

    #[test]
    fn comment_is_uppercase_hex() {
        assert_eq!(directory_comment(0x00ab_cdef), "TORRENTZIPPED-00ABCDEF");
        assert_eq!(directory_comment(0).len(), COMMENT_LEN);
    }
}
