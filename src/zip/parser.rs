//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For raw access, read each file's Local File Header to find its data

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use crate::error::{Result, TorrentZipError};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Location of the central directory as recorded by the end records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
}

/// Low-level ZIP file parser.
///
/// Typically used through [`ZipReader`](super::ZipReader) rather than
/// directly.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files()?;
/// for entry in entries {
///     let offset = parser.get_data_offset(&entry)?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Tries the no-comment position first, then searches backwards over the
    /// largest possible comment for a signature whose comment length matches
    /// the bytes that follow it.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(TorrentZipError::format("file too small to be a zip archive"));
        }

        let offset = self.size - eocd_size;
        let mut buf = [0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        if read_signature(&buf) == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // EOCD not at expected location - the archive carries a comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if read_signature(&buf[i..]) != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(TorrentZipError::format("end of central directory not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD holds sentinel values. The locator sits
    /// immediately before the regular EOCD and points at the ZIP64 record.
    /// Returns `None` when there is no locator: an archive with exactly
    /// 65535 entries carries the sentinel count without any ZIP64 records.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Option<Zip64EOCD>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        let mut locator_buf = [0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;
        if read_signature(&locator_buf) != Zip64EOCDLocator::SIGNATURE {
            return Ok(None);
        }

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.eocd64_offset > locator_offset {
            return Err(TorrentZipError::format("zip64 end of directory out of range"));
        }

        let mut eocd64_buf = [0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf).map(Some)
    }

    /// Locate the central directory, following ZIP64 records when needed.
    ///
    /// Also returns the EOCD so callers can get at the archive comment.
    pub fn locate_directory(&self) -> Result<(DirectoryLocation, EndOfCentralDirectory, u64)> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let zip64 = if eocd.is_zip64() {
            self.read_zip64_eocd(eocd_offset)?
        } else {
            None
        };

        let location = match zip64 {
            Some(eocd64) => DirectoryLocation {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                entries: eocd64.total_entries,
            },
            None => DirectoryLocation {
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                entries: eocd.total_entries as u64,
            },
        };

        let end = location
            .offset
            .checked_add(location.size)
            .ok_or_else(|| TorrentZipError::format("central directory overflows"))?;
        if end > eocd_offset {
            return Err(TorrentZipError::format("central directory out of range"));
        }
        // Smallest possible record is a bare 46-byte header.
        if location.entries.saturating_mul(CDFH_MIN_SIZE as u64) > location.size {
            return Err(TorrentZipError::format(
                "central directory too small for its entry count",
            ));
        }

        Ok((location, eocd, eocd_offset))
    }

    /// List all files in the ZIP archive, in stored order.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (location, _, _) = self.locate_directory()?;
        self.read_directory(&location)
    }

    /// Parse every Central Directory File Header in `location`.
    pub fn read_directory(&self, location: &DirectoryLocation) -> Result<Vec<ZipFileEntry>> {
        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; location.size as usize];
        self.reader.read_exact_at(location.offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(location.entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..location.entries {
            let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
                TorrentZipError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    TorrentZipError::format("truncated central directory")
                }
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;

        if read_signature(&lfh_buf) != LFH_SIGNATURE {
            return Err(TorrentZipError::format(format!(
                "invalid local file header for {}",
                entry.file_name
            )));
        }

        // Read the variable field lengths from fixed positions in LFH
        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        let data_offset =
            entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;

        let data_end = data_offset.checked_add(entry.compressed_size);
        if data_end.is_none_or(|end| end > self.size) {
            return Err(TorrentZipError::format(format!(
                "data for {} extends past the end of the archive",
                entry.file_name
            )));
        }

        Ok(data_offset)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let signature = cursor.read_u32::<LittleEndian>()?;
    if signature != CDFH_SIGNATURE {
        return Err(TorrentZipError::format(
            "invalid central directory file header",
        ));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Lossy only for display; the stored bytes are kept as they are.
    let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();
    let is_directory = file_name_bytes.ends_with(b"/");

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;

    // ZIP64 fields are present only for header fields holding 0xFFFFFFFF,
    // always in the order uncompressed, compressed, offset.
    let mut fields = Cursor::new(extra.as_slice());
    while fields.position() + 4 <= extra.len() as u64 {
        let header_id = fields.read_u16::<LittleEndian>()?;
        let field_size = fields.read_u16::<LittleEndian>()? as u64;
        let field_end = (fields.position() + field_size).min(extra.len() as u64);

        if header_id == ZIP64_EXTRA_ID {
            if uncompressed_size == UINT32_MAX && fields.position() + 8 <= field_end {
                uncompressed_size = fields.read_u64::<LittleEndian>()?;
            }
            if compressed_size == UINT32_MAX && fields.position() + 8 <= field_end {
                compressed_size = fields.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == UINT32_MAX && fields.position() + 8 <= field_end {
                lfh_offset = fields.read_u64::<LittleEndian>()?;
            }
        }
        fields.set_position(field_end);
    }

    // Skip over the file comment (we don't use it)
    cursor.set_position(cursor.position() + file_comment_length as u64);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }

    Ok(ZipFileEntry {
        file_name,
        raw_name: file_name_bytes,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        extra,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipWriter;
    use std::io::Write;

    fn sample_archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new());
        writer.create("first.txt").unwrap().write_all(b"one").unwrap();
        writer.create("dir/").unwrap();
        writer.create("second.bin").unwrap().write_all(&[0u8; 4096]).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn lists_entries_in_stored_order() {
        let archive = sample_archive();
        let parser = ZipParser::new(&archive);
        let entries = parser.list_files().unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["first.txt", "dir/", "second.bin"]);
        assert!(entries[1].is_directory);
        assert_eq!(entries[0].uncompressed_size, 3);
        assert_eq!(entries[0].crc32, crc32fast::hash(b"one"));
        assert_eq!(entries[2].uncompressed_size, 4096);
        assert_eq!(entries[2].compression_method, CompressionMethod::Deflate);
    }

    #[test]
    fn finds_eocd_behind_a_comment() {
        let mut archive = sample_archive();
        let comment = b"archive comment";
        let len = archive.len();
        archive[len - 2..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        archive.extend_from_slice(comment);

        let parser = ZipParser::new(&archive);
        let (eocd, offset) = parser.find_eocd().unwrap();
        assert_eq!(eocd.comment_len as usize, comment.len());
        assert_eq!(offset as usize, len - EndOfCentralDirectory::SIZE);
        assert_eq!(parser.list_files().unwrap().len(), 3);
    }

    #[test]
    fn rejects_non_zip_input() {
        let junk = vec![0x42u8; 1000];
        let err = ZipParser::new(&junk).list_files().unwrap_err();
        assert!(matches!(err, TorrentZipError::Format(_)), "{err:?}");

        let tiny = vec![0u8; 5];
        assert!(ZipParser::new(&tiny).find_eocd().is_err());
    }

    #[test]
    fn rejects_directory_pointing_past_the_end() {
        let mut archive = sample_archive();
        let len = archive.len();
        // cd_offset lives 6 bytes before the comment length
        archive[len - 6..len - 2].copy_from_slice(&0x7FFF_0000u32.to_le_bytes());
        let err = ZipParser::new(&archive).list_files().unwrap_err();
        assert!(matches!(err, TorrentZipError::Format(_)), "{err:?}");
    }

    #[test]
    fn data_offset_skips_name_and_extra() {
        let archive = sample_archive();
        let parser = ZipParser::new(&archive);
        let entries = parser.list_files().unwrap();
        let offset = parser.get_data_offset(&entries[0]).unwrap();
        assert_eq!(offset, LFH_SIZE as u64 + "first.txt".len() as u64);
    }
}
