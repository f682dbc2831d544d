//! RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use arrayvec::ArrayVec;
use bytes::{Buf, Bytes, BytesMut};
use ring::rand::SecureRandom;
use thiserror::Error;

/// 2 fixed bytes + 8 bytes extended length + 4 bytes mask key.
pub const MAX_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("reserved opcode 0x{0:x}")]
    ReservedOpcode(u8),

    #[error("frame payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: usize },

    #[error("text frame payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("failed to generate mask key")]
    MaskKey,
}

/// A decoded frame. Payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn masked(&self) -> bool {
        self.mask_key.is_some()
    }

    pub fn text(&self) -> Result<String, FrameError> {
        std::str::from_utf8(&self.payload)
            .map(str::to_owned)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Outgoing payload. Text is sent as its UTF-8 bytes; both variants go out
/// under the same opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> Payload<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(s: &'a str) -> Self {
        Payload::Text(s)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(s: &'a String) -> Self {
        Payload::Text(s.as_str())
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(b: &'a [u8]) -> Self {
        Payload::Bytes(b)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        Payload::Bytes(b.as_slice())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameOptions<'a> {
    pub payload: Option<Payload<'a>>,
    pub mask: bool,
    pub close: bool,
}

/// Builds a single FIN frame: `CLOSE` if `opts.close`, otherwise `TEXT`.
/// A fresh mask key is drawn from `rng` when `opts.mask` is set.
pub fn encode_frame(opts: &FrameOptions<'_>, rng: &dyn SecureRandom) -> Result<Vec<u8>, FrameError> {
    let opcode = if opts.close { Opcode::Close } else { Opcode::Text };
    let mask_key = if opts.mask {
        Some(generate_mask_key(rng)?)
    } else {
        None
    };
    let payload = opts.payload.map(|p| p.as_bytes()).unwrap_or_default();
    Ok(encode_with_key(opcode, payload, mask_key))
}

/// Encodes a FIN frame with an explicit (or no) mask key.
pub fn encode_with_key(opcode: Opcode, payload: &[u8], mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let header = encode_header(opcode, payload.len(), mask_key);

    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(&header);
    let payload_start = out.len();
    out.extend_from_slice(payload);
    if let Some(key) = mask_key {
        apply_mask(&mut out[payload_start..], key);
    }
    out
}

fn encode_header(opcode: Opcode, payload_len: usize, mask_key: Option<[u8; 4]>) -> ArrayVec<u8, MAX_HEADER_LEN> {
    let mut header = ArrayVec::new();

    // FIN is always set, fragments are never produced.
    header.push(0x80 | opcode as u8);

    let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };
    if payload_len < 126 {
        header.push(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        header.push(mask_bit | 126);
        header.extend((payload_len as u16).to_be_bytes());
    } else {
        header.push(mask_bit | 127);
        header.extend((payload_len as u64).to_be_bytes());
    }

    if let Some(key) = mask_key {
        header.extend(key);
    }
    header
}

/// XORs `buf` in place with the repeating 4-byte key. Applying it twice
/// restores the input.
pub fn apply_mask(buf: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask_key[i & 3];
    }
}

pub fn generate_mask_key(rng: &dyn SecureRandom) -> Result<[u8; 4], FrameError> {
    let mut key = [0u8; 4];
    rng.fill(&mut key).map_err(|_| FrameError::MaskKey)?;
    Ok(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    fin: bool,
    opcode: Opcode,
    mask_key: Option<[u8; 4]>,
    header_len: usize,
    payload_len: u64,
}

/// Returns `Ok(None)` until the whole header (including the mask key) is buffered.
fn parse_header(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;

    let (payload_len, mut offset) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(len_bytes), 10)
        }
        len => (len as u64, 2),
    };

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask_key,
        header_len: offset,
        payload_len,
    }))
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, bytes_consumed)))` if a full frame is available,
/// `Ok(None)` if more data is needed. Masked and unmasked frames are both
/// accepted.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let header = match parse_header(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    let too_large = FrameError::PayloadTooLarge {
        len: header.payload_len,
        max: usize::MAX,
    };
    let payload_len = usize::try_from(header.payload_len).map_err(|_| too_large.clone())?;
    let total_len = header.header_len.checked_add(payload_len).ok_or(too_large)?;
    if buf.len() < total_len {
        return Ok(None);
    }

    let mut payload = buf[header.header_len..total_len].to_vec();
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask_key: header.mask_key,
            payload: Bytes::from(payload),
        },
        total_len,
    )))
}

/// Accumulates inbound bytes across reads and hands out complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameBuffer {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pops the next complete frame. An oversized frame is rejected as soon as
    /// its header is visible, without waiting for the payload.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let header = match parse_header(&self.buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if header.payload_len > self.max_payload as u64 {
            return Err(FrameError::PayloadTooLarge {
                len: header.payload_len,
                max: self.max_payload,
            });
        }

        let total_len = header.header_len + header.payload_len as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let mut payload = self.buf.split_to(total_len);
        payload.advance(header.header_len);
        if let Some(key) = header.mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin: header.fin,
            opcode: header.opcode,
            mask_key: header.mask_key,
            payload: payload.freeze(),
        }))
    }
}
