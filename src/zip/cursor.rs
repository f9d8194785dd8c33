//! Byte-layout helpers shared by the container model and the canonical
//! header emitters.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use std::io::{self, Write};

/// Bump writer over a fixed-size header buffer.
///
/// Every `put*` call stores a little-endian value at the current offset and
/// advances it. Writing past the end of the buffer is a programming error and
/// panics, exactly like indexing would.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn put16(&mut self, v: u16) {
        LittleEndian::write_u16(&mut self.buf[self.pos..self.pos + 2], v);
        self.pos += 2;
    }

    pub fn put32(&mut self, v: u32) {
        LittleEndian::write_u32(&mut self.buf[self.pos..self.pos + 4], v);
        self.pos += 4;
    }

    pub fn put64(&mut self, v: u64) {
        LittleEndian::write_u64(&mut self.buf[self.pos..self.pos + 8], v);
        self.pos += 8;
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Read-side counterpart of [`ByteWriter`] for fixed-size records whose
/// length has already been checked.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get16(&mut self) -> u16 {
        let v = LittleEndian::read_u16(&self.buf[self.pos..]);
        self.pos += 2;
        v
    }

    pub fn get32(&mut self) -> u32 {
        let v = LittleEndian::read_u32(&self.buf[self.pos..]);
        self.pos += 4;
        v
    }

    pub fn get64(&mut self) -> u64 {
        let v = LittleEndian::read_u64(&self.buf[self.pos..]);
        self.pos += 8;
        v
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

/// Writer that counts every byte it forwards.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that feeds everything it forwards into a CRC32.
pub struct CrcWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// CRC32 of the bytes written so far.
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
