//! # torrentzip
//!
//! Writer for TorrentZip archives: ZIP files whose bytes depend only on the
//! names and contents of their entries.
//!
//! Entries are sorted case-insensitively by name, deflated at maximum
//! compression and stored with fixed flags and timestamps. The archive
//! comment records the CRC32 of the central directory, which lets
//! independent tools produce and check bit-identical archives.
//!
//! ## Features
//!
//! - Streaming writer that accepts entries in any order
//! - Staging in an anonymous temporary file or in memory
//! - Support for ZIP64 (entries and archives larger than 4GB, more than
//!   65535 entries)
//! - Reader for STORED and DEFLATE archives
//! - Parallel verification of archive trees
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Write;
//! use torrentzip::Writer;
//!
//! fn main() -> anyhow::Result<()> {
//!     let file = std::fs::File::create("set.zip")?;
//!     let mut zip = Writer::new(std::io::BufWriter::new(file))?;
//!
//!     zip.create("readme.txt")?.write_all(b"hello")?;
//!     zip.create("Data/track01.bin")?.write_all(&[0u8; 2352])?;
//!
//!     zip.close()?.flush()?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod codec;
pub mod error;
pub mod io;
pub mod staging;
pub mod torrentzip;
pub mod verify;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, TorrentZipError};
pub use io::{LocalFileReader, ReadAt};
pub use staging::StagingMode;
pub use torrentzip::{Writer, WriterOptions};
pub use verify::{VerifyOptions, VerifyReport};
pub use zip::{ZipFileEntry, ZipReader};
