// compression.rs -- deflate for zpackets, blasts and compressed downloads
//
// Zpackets and downloads are raw deflate (no zlib header); the KEX
// configstring and baseline blasts carry a zlib header. Zpackets are
// self-contained streams; Q2PRO downloads form one stream that spans many
// packets.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::io::MsgWrite;

/// Size of a zpacket header: command byte, compressed and uncompressed length.
pub const ZPACKET_HEADER_SIZE: usize = 5;

/// Minimum packet space needed before compression is attempted.
pub const MIN_COMPRESS_SIZE: usize = ZPACKET_HEADER_SIZE + 16;

/// Maximum decompressed packet size, to prevent decompression bombs.
pub const MAX_DECOMPRESS_SIZE: usize = 65536;

// ============================================================
// Inflate
// ============================================================

/// Streaming raw deflate decompressor.
#[derive(Debug)]
pub struct Inflater {
    inner: Decompress,
    stream_end: bool,
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
            stream_end: false,
        }
    }

    /// Decompressor for a stream with a zlib header.
    pub fn with_header() -> Self {
        Self {
            inner: Decompress::new(true),
            stream_end: false,
        }
    }

    /// Decompress all of `data`, returning whatever output it produced.
    pub fn inflate(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 4 + 64);
        let mut consumed = 0;
        loop {
            let before_in = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|_| Error::InflateFailed)?;
            consumed += (self.inner.total_in() - before_in) as usize;

            if status == Status::StreamEnd {
                self.stream_end = true;
                break;
            }
            if consumed == data.len() && out.len() < out.capacity() {
                break;
            }
            if out.len() >= MAX_DECOMPRESS_SIZE {
                return Err(Error::InflateFailed);
            }
            out.reserve(out.capacity().max(64));
        }
        if consumed < data.len() {
            return Err(Error::MoreDataDeflated);
        }
        Ok(out)
    }

    /// Whether the end of the compressed stream was seen.
    pub fn stream_ended(&self) -> bool {
        self.stream_end
    }
}

/// Decompress one complete zpacket payload.
pub fn inflate_packet(data: &[u8]) -> Result<Vec<u8>> {
    Inflater::new().inflate(data)
}

// ============================================================
// Deflate
// ============================================================

fn deflate_once(input: &[u8], flush: FlushCompress) -> Result<Vec<u8>> {
    let mut c = Compress::new(Compression::default(), false);
    let mut out = Vec::with_capacity(input.len() + 64);
    loop {
        let consumed = c.total_in() as usize;
        let status = c
            .compress_vec(&input[consumed..], &mut out, flush)
            .map_err(|_| Error::DeflateFailed)?;
        let all_in = c.total_in() as usize == input.len();
        let done = match flush {
            FlushCompress::Finish => status == Status::StreamEnd,
            _ => all_in && out.len() < out.capacity(),
        };
        if done {
            return Ok(out);
        }
        out.reserve(out.capacity().max(64));
    }
}

/// Compress `data` into one complete raw deflate stream.
pub fn deflate_packet(data: &[u8]) -> Result<Vec<u8>> {
    deflate_once(data, FlushCompress::Finish)
}

/// Compress as much of `input` as fits into `max_out` compressed bytes.
///
/// Returns the number of input bytes consumed and the compressed data. The
/// stream is terminated only if all input was consumed and `end_stream` is
/// set; otherwise the output ends on a full flush, so chunks produced by
/// successive calls concatenate into one valid stream.
pub fn deflate_chunk(input: &[u8], max_out: usize, end_stream: bool) -> Result<(usize, Vec<u8>)> {
    deflate_fitting(input, max_out, |n| {
        if n == input.len() && end_stream {
            FlushCompress::Finish
        } else {
            FlushCompress::Full
        }
    })
}

/// Compress a prefix of `input` into one complete stream of at most `max_out` bytes.
pub fn deflate_block(input: &[u8], max_out: usize) -> Result<(usize, Vec<u8>)> {
    deflate_fitting(input, max_out, |_| FlushCompress::Finish)
}

fn deflate_fitting(input: &[u8], max_out: usize, flush_for: impl Fn(usize) -> FlushCompress) -> Result<(usize, Vec<u8>)> {
    if input.is_empty() {
        let out = deflate_once(input, flush_for(0))?;
        return if out.len() <= max_out {
            Ok((0, out))
        } else {
            Err(Error::NotEnoughPacketSpace)
        };
    }

    let mut n = input.len().min(max_out.saturating_mul(8)).max(1);
    loop {
        let out = deflate_once(&input[..n], flush_for(n))?;
        if out.len() <= max_out {
            return Ok((n, out));
        }
        if n == 1 {
            return Err(Error::NotEnoughPacketSpace);
        }
        let scaled = (n as u64 * max_out as u64 / out.len() as u64) as usize;
        n = (scaled * 9 / 10).clamp(1, n - 1);
    }
}

// ============================================================
// Streaming deflate writer
// ============================================================

/// Compressed bytes kept back for the stream trailer and flush markers.
const DEFLATE_SLACK: usize = 16;
/// Input buffered inside the compressor before a sync flush.
const DEFLATE_SYNC_INTERVAL: usize = 1024;

/// A message sink that deflates everything written to it into at most
/// `max_out` compressed bytes.
///
/// `available()` assumes input still buffered in the compressor doesn't
/// compress at all, so a write it admits always fits.
pub struct DeflateWriter {
    inner: Compress,
    out: Vec<u8>,
    max_out: usize,
    pending: usize,
}

impl DeflateWriter {
    pub fn new(max_out: usize) -> Self {
        Self::build(max_out, false)
    }

    /// Writer producing a stream with a zlib header.
    pub fn with_header(max_out: usize) -> Self {
        Self::build(max_out, true)
    }

    fn build(max_out: usize, zlib_header: bool) -> Self {
        Self {
            inner: Compress::new(Compression::default(), zlib_header),
            out: Vec::with_capacity(max_out.min(0x10000) + DEFLATE_SLACK),
            max_out,
            pending: 0,
        }
    }

    /// Bytes written so far.
    pub fn uncompressed_len(&self) -> usize {
        self.inner.total_in() as usize
    }

    fn run(&mut self, input: &[u8], flush: FlushCompress) -> Result<()> {
        let start_in = self.inner.total_in();
        loop {
            if self.out.capacity() - self.out.len() < 64 {
                self.out.reserve(256);
            }
            let consumed = (self.inner.total_in() - start_in) as usize;
            let status = self
                .inner
                .compress_vec(&input[consumed..], &mut self.out, flush)
                .map_err(|_| Error::DeflateFailed)?;
            let all_in = (self.inner.total_in() - start_in) as usize == input.len();
            let done = match flush {
                FlushCompress::Finish => status == Status::StreamEnd,
                FlushCompress::None => all_in,
                _ => all_in && self.out.len() < self.out.capacity(),
            };
            if done {
                return Ok(());
            }
        }
    }

    /// End the stream. Returns the uncompressed length and the compressed data.
    pub fn finish(mut self) -> Result<(usize, Vec<u8>)> {
        self.run(&[], FlushCompress::Finish)?;
        if self.out.len() > self.max_out {
            return Err(Error::NotEnoughPacketSpace);
        }
        Ok((self.inner.total_in() as usize, self.out))
    }
}

impl MsgWrite for DeflateWriter {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.available() {
            return Err(Error::NotEnoughPacketSpace);
        }
        self.run(data, FlushCompress::None)?;
        self.pending += data.len();
        if self.pending >= DEFLATE_SYNC_INTERVAL {
            self.run(&[], FlushCompress::Sync)?;
            self.pending = 0;
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.max_out
            .saturating_sub(self.out.len() + self.pending + DEFLATE_SLACK)
    }
}
