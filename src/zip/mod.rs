//! ZIP container model.
//!
//! This module reads and writes the ZIP binary format without imposing any
//! ordering of its own: writers append entries in arrival order and readers
//! list them in stored order. Entry data can always be reached verbatim, so
//! callers can move already-deflated bytes between archives without
//! recompressing them.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`cursor`]: Little-endian bump writer and counting/checksumming sinks
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`reader`]: Entry access, raw or inflated
//! - [`writer`]: Streaming writer producing deflated entries
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for entries, offsets and directories past 32-bit limits
//! - DEFLATE for writing; STORED and DEFLATE for reading
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

pub mod cursor;
mod parser;
mod reader;
mod structures;
mod writer;

pub use parser::{DirectoryLocation, ZipParser};
pub use reader::{RawEntryReader, ZipReader};
pub use structures::*;
pub use writer::{EntryWriter, ZipWriter};

pub(crate) use writer::{write_end_record, write_zip64_end};
