use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, ErrorKind, Result},
    message::{Message, MsgKind},
    serializer,
};

/// Frame layout (11-byte header + body):
///
/// ```text
/// +-----------+---------+------------+--------+-------------+------+
/// | magic     | version | serializer | kind   | body length | body |
/// | 4 bytes   | 1 byte  | 1 byte     | 1 byte | 4 bytes     | N    |
/// +-----------+---------+------------+--------+-------------+------+
/// ```
///
/// All integers are big-endian.
pub const MAGIC: u32 = 0xCAFE_BABE;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 11;
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Encodes one message into a frame.
///
/// # Errors
///
/// Fails on an unregistered serializer tag, a body the codec rejects, or
/// a body over [`MAX_BODY_LEN`].
pub fn encode(msg: &Message) -> Result<Bytes> {
    let codec = serializer::lookup(msg.serializer)?;
    let body = codec.encode(&msg.body)?;
    if body.len() > MAX_BODY_LEN {
        return Err(Error::new(
            ErrorKind::FrameTooLarge,
            format!("body is too long: {}", body.len()),
        ));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(msg.serializer);
    buf.put_u8(msg.kind.as_byte());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Buffering stream decoder. Feed it raw socket bytes and pull whole
/// messages; partial frames stay buffered until the remaining bytes
/// arrive. A decode error is fatal to the connection and leaves the
/// buffer positioned at the offending frame.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// The internal buffer, for direct socket reads via `read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Attempts to decode the next message.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// `InvalidFrame` on bad magic, version, or kind byte; `FrameTooLarge`
    /// on an oversize length field; `UnknownSerializer` / decode errors
    /// from the body codec.
    pub fn decode(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if magic != MAGIC {
            return Err(Error::new(
                ErrorKind::InvalidFrame,
                format!("invalid magic number: {magic:#010X}"),
            ));
        }

        let version = self.buffer[4];
        if version != VERSION {
            return Err(Error::new(
                ErrorKind::InvalidFrame,
                format!("unsupported version: {version}"),
            ));
        }

        let tag = self.buffer[5];
        let kind = MsgKind::from_byte(self.buffer[6])?;
        let body_len = u32::from_be_bytes([
            self.buffer[7],
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
        ]) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(Error::new(
                ErrorKind::FrameTooLarge,
                format!("body length {body_len} exceeds {MAX_BODY_LEN}"),
            ));
        }

        if self.buffer.len() < HEADER_LEN + body_len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        let body_bytes = self.buffer.split_to(body_len);
        let body = serializer::lookup(tag)?.decode(&body_bytes, kind)?;

        Ok(Some(Message {
            serializer: tag,
            kind,
            body,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
