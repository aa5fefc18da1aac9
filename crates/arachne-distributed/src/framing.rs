//! Segment framing for RPC byte streams.
//!
//! A stream is a sequence of segments - a 4-byte little-endian size
//! followed by that many payload bytes - ending with a 4-byte zero
//! terminator. The [`Builder`] buffers writes and flushes full segments
//! through a callback; the [`Reader`] pulls payload transparently across
//! segment boundaries; [`check_stream_complete`] scans a receive buffer
//! without consuming it, telling the transport whether a whole message
//! has arrived.

use arachne_common::utils::error::{Error, Result};

/// Size, in bytes, of the segment header (and of the terminator).
pub const SEGMENT_HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Maximum payload bytes per segment.
pub const SEGMENT_MAX_DATA_SIZE: usize = 256 * 1024;

/// Largest on-wire footprint of one segment, header included, plus the
/// terminator that may follow it. Used as the "give me at least this much
/// more" hint for partial streams.
pub const SEGMENT_MAX_TOTAL_SIZE: usize = 2 * SEGMENT_HEADER_SIZE + SEGMENT_MAX_DATA_SIZE;

/// Builds a segment stream, flushing through `write_func`.
///
/// The callback receives the bytes and a flag that is `true` while more
/// data will follow (so transports can batch) and `false` on the final
/// flush.
pub struct Builder<F: FnMut(&[u8], bool)> {
    write_func: F,
    buffer: Vec<u8>,
}

impl<F: FnMut(&[u8], bool)> Builder<F> {
    /// Creates a builder.
    #[must_use]
    pub fn new(write_func: F) -> Self {
        Self {
            write_func,
            buffer: Vec::with_capacity(SEGMENT_MAX_DATA_SIZE),
        }
    }

    /// Appends payload bytes, flushing a segment whenever the buffer
    /// fills.
    pub fn save(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            self.flush_segment(false);
            let room = SEGMENT_MAX_DATA_SIZE - self.buffer.len();
            let take = data.len().min(room);
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
    }

    /// Flushes the final segment and the terminator.
    pub fn finalize(&mut self) {
        self.flush_segment(true);
    }

    fn flush_segment(&mut self, final_segment: bool) {
        if !final_segment && self.buffer.len() < SEGMENT_MAX_DATA_SIZE {
            return;
        }
        let mut out = Vec::with_capacity(SEGMENT_HEADER_SIZE + self.buffer.len() + 4);
        if !self.buffer.is_empty() {
            out.extend_from_slice(&(self.buffer.len() as u32).to_le_bytes());
            out.extend_from_slice(&self.buffer);
        }
        if final_segment {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        (self.write_func)(&out, !final_segment);
        self.buffer.clear();
    }
}

/// Reads payload back out of a segment stream.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    have: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over a complete stream.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            have: 0,
        }
    }

    /// Fills `out` with the next payload bytes, crossing segment
    /// boundaries as needed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Framing`] on truncated or malformed streams.
    pub fn load(&mut self, out: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        while offset < out.len() {
            self.get_segment(false)?;
            let take = (out.len() - offset).min(self.have);
            out[offset..offset + take].copy_from_slice(&self.data[self.pos..self.pos + take]);
            self.pos += take;
            self.have -= take;
            offset += take;
        }
        Ok(())
    }

    /// Consumes the terminator, verifying nothing is left over.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Framing`] when payload remains or the
    /// terminator is missing.
    pub fn finalize(&mut self) -> Result<()> {
        self.get_segment(true)
    }

    /// Total bytes consumed so far, headers included.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn get_segment(&mut self, should_be_final: bool) -> Result<()> {
        if self.have != 0 {
            if should_be_final {
                return Err(Error::Framing("leftover data in stream"));
            }
            return Ok(());
        }

        if self.pos + SEGMENT_HEADER_SIZE > self.data.len() {
            return Err(Error::Framing("size data missing in stream"));
        }
        let len = u32::from_le_bytes(
            self.data[self.pos..self.pos + SEGMENT_HEADER_SIZE]
                .try_into()
                .expect("header slice is 4 bytes"),
        ) as usize;

        if should_be_final && len != 0 {
            return Err(Error::Framing("expected the final segment"));
        }
        if !should_be_final && len == 0 {
            return Err(Error::Framing("unexpected empty segment"));
        }

        // Advance only after the checks so a failed read can be retried
        // from the same header.
        self.pos += SEGMENT_HEADER_SIZE;

        if self.pos + len > self.data.len() {
            return Err(Error::Framing("not enough data in stream"));
        }
        self.have = len;
        Ok(())
    }
}

/// Completeness of a byte buffer as a segment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// A full stream, terminator included.
    Complete,
    /// More bytes are needed.
    Partial,
    /// Not a stream (no segments before the terminator).
    Invalid,
}

/// What [`check_stream_complete`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Completeness verdict.
    pub status: StreamStatus,
    /// For `Complete`: total stream size in bytes. For `Partial`: a hint
    /// of how many bytes the transport should have before rechecking.
    pub stream_size: usize,
    /// Payload bytes across all segments seen so far.
    pub data_size: usize,
}

/// Scans `data` without consuming it and reports whether a complete
/// stream has arrived.
#[must_use]
pub fn check_stream_complete(data: &[u8]) -> StreamInfo {
    let mut found_segments = 0usize;
    let mut data_size = 0usize;
    let mut pos = 0usize;

    loop {
        if pos + SEGMENT_HEADER_SIZE > data.len() {
            return StreamInfo {
                status: StreamStatus::Partial,
                stream_size: pos + SEGMENT_MAX_TOTAL_SIZE,
                data_size,
            };
        }
        let len = u32::from_le_bytes(
            data[pos..pos + SEGMENT_HEADER_SIZE]
                .try_into()
                .expect("header slice is 4 bytes"),
        ) as usize;
        pos += SEGMENT_HEADER_SIZE;
        if len == 0 {
            break;
        }
        if pos + len > data.len() {
            return StreamInfo {
                status: StreamStatus::Partial,
                stream_size: pos + SEGMENT_MAX_TOTAL_SIZE,
                data_size,
            };
        }
        pos += len;
        found_segments += 1;
        data_size += len;
    }

    if found_segments < 1 {
        return StreamInfo {
            status: StreamStatus::Invalid,
            stream_size: 0,
            data_size: 0,
        };
    }
    StreamInfo {
        status: StreamStatus::Complete,
        stream_size: pos,
        data_size,
    }
}

/// Frames `payload` into one self-contained stream.
#[must_use]
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2 * SEGMENT_HEADER_SIZE);
    let mut builder = Builder::new(|bytes, _have_more| out.extend_from_slice(bytes));
    builder.save(payload);
    builder.finalize();
    drop(builder);
    out
}

/// Extracts the full payload of a complete stream.
///
/// # Errors
///
/// Fails with [`Error::Framing`] when the stream is malformed.
pub fn unframe_payload(data: &[u8]) -> Result<Vec<u8>> {
    let info = check_stream_complete(data);
    if info.status != StreamStatus::Complete {
        return Err(Error::Framing("stream is not complete"));
    }
    let mut payload = vec![0u8; info.data_size];
    let mut reader = Reader::new(data);
    reader.load(&mut payload)?;
    reader.finalize()?;
    Ok(payload)
}
