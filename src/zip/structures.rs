use crate::error::{Result, TorrentZipError};

use super::cursor::ByteReader;

/// Local File Header (LFH) - 30 bytes + name + extra
pub const LFH_SIGNATURE: u32 = 0x0403_4b50;
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header (CDFH) - 46 bytes + name + extra + comment
pub const CDFH_SIGNATURE: u32 = 0x0201_4b50;
pub const CDFH_MIN_SIZE: usize = 46;

/// Data descriptor trailing a streamed entry
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

/// Extra field id of the ZIP64 extended information block
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Version needed to extract plain deflate entries (2.0)
pub const VERSION_DEFLATE: u16 = 20;
/// Version needed to read and write zip64 structures (4.5)
pub const VERSION_ZIP64: u16 = 45;

/// Limits for non zip64 fields
pub const UINT16_MAX: u64 = u16::MAX as u64;
pub const UINT32_MAX: u64 = u32::MAX as u64;

/// General purpose flag bits
pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes + comment
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || read_signature(data) != Self::SIGNATURE {
            return Err(TorrentZipError::format("invalid end of central directory"));
        }

        let mut r = ByteReader::new(&data[4..Self::SIZE]);
        r.skip(4); // this disk, disk holding the directory
        Ok(Self {
            disk_entries: r.get16(),
            total_entries: r.get16(),
            cd_size: r.get32(),
            cd_offset: r.get32(),
            comment_len: r.get16(),
        })
    }

    /// Whether any field holds its sentinel, deferring to the zip64 record.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == u16::MAX
            || self.total_entries == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: u32 = 0x0706_4b50;
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || read_signature(data) != Self::SIGNATURE {
            return Err(TorrentZipError::format("invalid zip64 end of directory locator"));
        }

        let mut r = ByteReader::new(&data[4..Self::SIZE]);
        r.skip(4);
        Ok(Self {
            eocd64_offset: r.get64(),
            total_disks: r.get32(),
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes, extensible data unused
pub struct Zip64EOCD {
    pub record_size: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x0606_4b50;
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || read_signature(data) != Self::SIGNATURE {
            return Err(TorrentZipError::format("invalid zip64 end of central directory"));
        }

        let mut r = ByteReader::new(&data[4..Self::MIN_SIZE]);
        let record_size = r.get64();
        r.skip(2 + 2 + 4 + 4 + 8); // versions, disk numbers, entries on this disk
        Ok(Self {
            record_size,
            total_entries: r.get64(),
            cd_size: r.get64(),
            cd_offset: r.get64(),
        })
    }
}

/// Read the little-endian signature at the start of `data` (0 if too short).
pub(crate) fn read_signature(data: &[u8]) -> u32 {
    match data.get(..4) {
        Some(sig) => u32::from_le_bytes([sig[0], sig[1], sig[2], sig[3]]),
        None => 0,
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Name for display; bytes that are not UTF-8 are replaced.
    pub file_name: String,
    /// Name exactly as stored in the archive.
    pub raw_name: Vec<u8>,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    /// Extra field bytes as found in the central directory
    pub extra: Vec<u8>,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Whether either size needs 64-bit fields.
    pub fn needs_zip64(&self) -> bool {
        self.compressed_size > UINT32_MAX || self.uncompressed_size > UINT32_MAX
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// DOS date as (year, month, day).
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let d = self.last_mod_date;
        (1980 + (d >> 9), ((d >> 5) & 0x0F) as u8, (d & 0x1F) as u8)
    }

    /// DOS time as (hour, minute, second); seconds have 2s resolution.
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let t = self.last_mod_time;
        ((t >> 11) as u8, ((t >> 5) & 0x3F) as u8, ((t & 0x1F) * 2) as u8)
    }
}
