//! Length-delimited frame codec for gRPC payloads carried in HTTP bodies.
//!
//! Wire layout of one frame:
//!
//! ```text
//! <ASCII decimal length> 0x00 <length raw bytes>
//! ```
//!
//! Frames are concatenated with no trailer. An empty body holds zero frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FilterError, Result};

/// Byte separating the decimal length prefix from the payload.
pub const SEPARATOR: u8 = 0x00;

/// Longest accepted length prefix. Anything longer cannot fit in a body anyway.
const MAX_PREFIX_DIGITS: usize = 19;

/// One length-delimited record inside a body payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Size of this frame once written with its prefix and separator.
    pub fn encoded_len(&self) -> usize {
        decimal_width(self.payload.len()) + 1 + self.payload.len()
    }
}

/// Iterates over the frames of a body without copying payloads.
///
/// Yields `None` once no bytes are left; a malformed prefix or a truncated
/// payload yields one error and then ends the iteration.
pub struct FrameDecoder {
    buf: Bytes,
    offset: usize,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            offset: 0,
            failed: false,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let rest = &self.buf[self.offset..];
        let sep = rest
            .iter()
            .take(MAX_PREFIX_DIGITS + 1)
            .position(|b| *b == SEPARATOR)
            .ok_or_else(|| self.framing("length prefix is not terminated by a separator"))?;

        let prefix = &rest[..sep];
        if prefix.is_empty() {
            return Err(self.framing("empty length prefix"));
        }
        let len = prefix.iter().try_fold(0usize, |acc, b| {
            if !b.is_ascii_digit() {
                return None;
            }
            acc.checked_mul(10)?.checked_add(usize::from(b - b'0'))
        });
        let len = len.ok_or_else(|| self.framing("length prefix is not a decimal number"))?;

        let start = self.offset + sep + 1;
        let available = self.buf.len() - start;
        if len > available {
            return Err(self.framing(&format!(
                "frame declares {} bytes but only {} remain",
                len, available
            )));
        }

        self.offset = start + len;
        Ok(Frame::new(self.buf.slice(start..start + len)))
    }

    fn framing(&self, reason: &str) -> FilterError {
        FilterError::Framing {
            offset: self.offset,
            reason: reason.to_string(),
        }
    }
}

impl Iterator for FrameDecoder {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        let frame = self.next_frame();
        self.failed = frame.is_err();
        Some(frame)
    }
}

/// Splits a whole body into its frames, in order.
pub fn decode(body: impl Into<Bytes>) -> Result<Vec<Frame>> {
    FrameDecoder::new(body).collect()
}

/// Writes frames back to back, each with its decimal length and separator.
pub fn encode<'a, I>(frames: I) -> Bytes
where
    I: IntoIterator<Item = &'a Frame>,
{
    let mut out = BytesMut::new();
    for frame in frames {
        encode_into(frame, &mut out);
    }
    out.freeze()
}

/// Appends one frame to `out`.
pub fn encode_into(frame: &Frame, out: &mut BytesMut) {
    out.reserve(frame.encoded_len());
    out.put_slice(frame.payload.len().to_string().as_bytes());
    out.put_u8(SEPARATOR);
    out.put_slice(&frame.payload);
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}
