//! Raw (headerless) deflate codec.
//!
//! ZIP entries carry bare deflate streams with no zlib or gzip envelope. This
//! module wraps the `flate2` state machines so that the container code can
//! stream data through them while keeping track of what was produced, and so
//! that decompression failures come back as distinct [`CodecError`] kinds.

use std::io::{self, BufRead, Read, Write};

use flate2::{
    Compress, CompressError, Compression, Decompress, DecompressError, FlushCompress,
    FlushDecompress, Status,
};
use thiserror::Error;

/// Size of the scratch buffer the compressor drains into.
const CHUNK_SIZE: usize = 64 * 1024;

/// Compression level used for every entry written by this crate.
pub const BEST_COMPRESSION: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("corrupt deflate stream: {0}")]
    Corrupt(String),

    #[error("deflate stream requires a preset dictionary")]
    NeedDictionary,

    #[error("out of memory while inflating")]
    OutOfMemory,

    #[error("compression failed: {0}")]
    Compress(String),
}

impl From<DecompressError> for CodecError {
    fn from(err: DecompressError) -> Self {
        if err.needs_dictionary().is_some() {
            CodecError::NeedDictionary
        } else {
            CodecError::Corrupt(err.to_string())
        }
    }
}

impl From<CompressError> for CodecError {
    fn from(err: CompressError) -> Self {
        CodecError::Compress(err.to_string())
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Recover a [`CodecError`] that was smuggled through an `io::Error`.
fn codec_error(err: io::Error) -> CodecError {
    match err.get_ref().and_then(|e| e.downcast_ref::<CodecError>()) {
        Some(codec) => codec.clone(),
        None => CodecError::Corrupt(err.to_string()),
    }
}

/// Compress `data` into a raw deflate stream at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut deflater = Deflater::new(level);
    let mut out = Vec::new();
    deflater.write(data, &mut out).map_err(codec_error)?;
    deflater.finish(&mut out).map_err(codec_error)?;
    Ok(out)
}

/// Inflate a complete raw deflate stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut reader = InflateReader::new(data);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut out = Vec::new();
    loop {
        let n = reader.read(&mut chunk).map_err(codec_error)?;
        if n == 0 {
            return Ok(out);
        }
        out.try_reserve(n).map_err(|_| CodecError::OutOfMemory)?;
        out.extend_from_slice(&chunk[..n]);
    }
}

/// Streaming raw deflate compressor.
///
/// Output is pushed into whatever sink the caller hands to [`Deflater::write`]
/// and [`Deflater::finish`], so one compressor can be reused across entries
/// with [`Deflater::reset`].
pub struct Deflater {
    state: Compress,
    buf: Vec<u8>,
}

impl Deflater {
    pub fn new(level: u32) -> Self {
        Self {
            // With the zlib backend this is deflateInit2(level, -15, 8, default strategy).
            state: Compress::new(Compression::new(level), false),
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Start a fresh stream, discarding any buffered state.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Feed `input` to the compressor. Returns the compressed bytes emitted.
    pub fn write<W: Write + ?Sized>(&mut self, mut input: &[u8], sink: &mut W) -> io::Result<u64> {
        let mut written = 0;
        loop {
            let (consumed, produced, _) = self.step(input, FlushCompress::None, sink)?;
            input = &input[consumed..];
            written += produced as u64;

            let drained = produced < self.buf.capacity();
            if input.is_empty() && drained {
                return Ok(written);
            }
            if consumed == 0 && produced == 0 {
                return Err(CodecError::Compress("compressor made no progress".into()).into());
            }
        }
    }

    /// Terminate the stream. Returns the compressed bytes emitted.
    pub fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<u64> {
        let mut written = 0;
        loop {
            let (_, produced, status) = self.step(&[], FlushCompress::Finish, sink)?;
            written += produced as u64;
            if status == Status::StreamEnd {
                return Ok(written);
            }
        }
    }

    fn step<W: Write + ?Sized>(
        &mut self,
        input: &[u8],
        flush: FlushCompress,
        sink: &mut W,
    ) -> io::Result<(usize, usize, Status)> {
        self.buf.clear();
        let before = self.state.total_in();
        let status = self
            .state
            .compress_vec(input, &mut self.buf, flush)
            .map_err(CodecError::from)?;
        let consumed = (self.state.total_in() - before) as usize;
        sink.write_all(&self.buf)?;
        Ok((consumed, self.buf.len(), status))
    }
}

/// Reader that inflates a raw deflate stream pulled from `inner`.
///
/// Stops at the end-of-stream marker; a source that runs dry before the
/// marker is reported as a corrupt stream.
pub struct InflateReader<R> {
    inner: R,
    state: Decompress,
    done: bool,
}

impl<R: BufRead> InflateReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: Decompress::new(false),
            done: false,
        }
    }
}

impl<R: BufRead> Read for InflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        loop {
            let input = self.inner.fill_buf()?;
            let eof = input.is_empty();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let in_before = self.state.total_in();
            let out_before = self.state.total_out();
            let status = self
                .state
                .decompress(input, buf, flush)
                .map_err(CodecError::from)?;
            let consumed = (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            self.inner.consume(consumed);

            if status == Status::StreamEnd {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if eof {
                return Err(CodecError::Corrupt("unexpected end of deflate stream".into()).into());
            }
            if consumed == 0 {
                return Err(CodecError::Corrupt("inflater made no progress".into()).into());
            }
        }
    }
}
