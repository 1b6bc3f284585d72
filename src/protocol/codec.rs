//! Message encoding and decoding.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use super::error::{ProtocolError, ProtocolResult};
use super::message::{AuthStatus, Message};
use crate::store::{Key, Value};

/// Size of the length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

const TAG_PUT_REQUEST: u8 = 1;
const TAG_GET_REQUEST: u8 = 2;
const TAG_MULTI_PUT_REQUEST: u8 = 3;
const TAG_MULTI_GET_REQUEST: u8 = 4;
const TAG_GET_WHEN_REQUEST: u8 = 5;
const TAG_PUT_RESPONSE: u8 = 6;
const TAG_GET_RESPONSE: u8 = 7;
const TAG_MULTI_GET_RESPONSE: u8 = 8;
const TAG_AUTH_REQUEST: u8 = 9;
const TAG_AUTH_RESPONSE: u8 = 10;
const TAG_ERROR_RESPONSE: u8 = 11;

// ═══════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════

/// Appends big-endian fields to a buffer.
struct Writer {
    message: &'static str,
    buf: Vec<u8>,
}

impl Writer {
    fn new(message: &'static str, tag: u8) -> Self {
        Self {
            message,
            buf: vec![tag],
        }
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn len(&mut self, field: &'static str, len: usize) -> ProtocolResult<()> {
        let len = i32::try_from(len).map_err(|_| {
            ProtocolError::invalid_field(self.message, field, format!("{len} exceeds i32"))
        })?;
        self.i32(len);
        Ok(())
    }

    fn string(&mut self, field: &'static str, value: &str) -> ProtocolResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            ProtocolError::invalid_field(
                self.message,
                field,
                format!("{} bytes exceeds {}", value.len(), u16::MAX),
            )
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn bytes(&mut self, field: &'static str, value: &[u8]) -> ProtocolResult<()> {
        self.len(field, value.len())?;
        self.buf.extend_from_slice(value);
        Ok(())
    }

    fn optional_bytes(&mut self, field: &'static str, value: Option<&[u8]>) -> ProtocolResult<()> {
        match value {
            Some(value) => self.bytes(field, value),
            None => {
                self.i32(-1);
                Ok(())
            }
        }
    }

    fn pairs(&mut self, pairs: &HashMap<Key, Value>) -> ProtocolResult<()> {
        self.len("pairs", pairs.len())?;
        for (key, value) in pairs {
            self.string("key", key)?;
            self.bytes("value", value)?;
        }
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Encodes a message into a frame body (tag and payload, no length prefix).
///
/// # Errors
///
/// Returns an error if a string or collection is too long for its length
/// field.
pub fn encode(message: &Message) -> ProtocolResult<Vec<u8>> {
    let name = message.name();
    let mut w;
    match message {
        Message::PutRequest { id, key, value } => {
            w = Writer::new(name, TAG_PUT_REQUEST);
            w.i32(*id);
            w.string("key", key)?;
            w.bytes("value", value)?;
        }
        Message::GetRequest { id, key } => {
            w = Writer::new(name, TAG_GET_REQUEST);
            w.i32(*id);
            w.string("key", key)?;
        }
        Message::MultiPutRequest { id, pairs } => {
            w = Writer::new(name, TAG_MULTI_PUT_REQUEST);
            w.i32(*id);
            w.pairs(pairs)?;
        }
        Message::MultiGetRequest { id, keys } => {
            w = Writer::new(name, TAG_MULTI_GET_REQUEST);
            w.i32(*id);
            w.len("keys", keys.len())?;
            for key in keys {
                w.string("key", key)?;
            }
        }
        Message::GetWhenRequest {
            id,
            key,
            key_cond,
            value_cond,
        } => {
            w = Writer::new(name, TAG_GET_WHEN_REQUEST);
            w.i32(*id);
            w.string("key", key)?;
            w.string("key_cond", key_cond)?;
            w.bytes("value_cond", value_cond)?;
        }
        Message::PutResponse { request_id } => {
            w = Writer::new(name, TAG_PUT_RESPONSE);
            w.i32(*request_id);
        }
        Message::GetResponse { request_id, value } => {
            w = Writer::new(name, TAG_GET_RESPONSE);
            w.i32(*request_id);
            w.optional_bytes("value", value.as_deref())?;
        }
        Message::MultiGetResponse { request_id, pairs } => {
            w = Writer::new(name, TAG_MULTI_GET_RESPONSE);
            w.i32(*request_id);
            w.pairs(pairs)?;
        }
        Message::AuthRequest { username, password } => {
            w = Writer::new(name, TAG_AUTH_REQUEST);
            w.string("username", username)?;
            w.string("password", password)?;
        }
        Message::AuthResponse { status } => {
            w = Writer::new(name, TAG_AUTH_RESPONSE);
            w.i32(status.code());
        }
        Message::ErrorResponse {
            request_id,
            message,
        } => {
            w = Writer::new(name, TAG_ERROR_RESPONSE);
            w.i32(*request_id);
            w.string("message", message)?;
        }
    }
    Ok(w.finish())
}

/// Encodes a message into a complete frame, length prefix included.
///
/// # Errors
///
/// Returns an error if the message cannot be encoded.
pub fn frame(message: &Message) -> ProtocolResult<Vec<u8>> {
    let body = encode(message)?;
    let length = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        length: body.len(),
        limit: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Writes one framed message and flushes.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> ProtocolResult<()> {
    writer.write_all(&frame(message)?)?;
    writer.flush()?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

/// Reads big-endian fields from a frame body.
struct Reader<'a> {
    message: &'static str,
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(ProtocolError::Truncated {
                message: self.message,
                offset: self.offset,
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn i32(&mut self) -> ProtocolResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn len(&mut self, field: &'static str) -> ProtocolResult<usize> {
        let len = self.i32()?;
        usize::try_from(len)
            .map_err(|_| ProtocolError::invalid_field(self.message, field, format!("negative length {len}")))
    }

    fn string(&mut self, field: &'static str) -> ProtocolResult<String> {
        let b = self.take(2)?;
        let len = usize::from(u16::from_be_bytes([b[0], b[1]]));
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::invalid_field(self.message, field, e.to_string()))
    }

    fn bytes(&mut self, field: &'static str) -> ProtocolResult<Value> {
        let len = self.len(field)?;
        Ok(self.take(len)?.to_vec())
    }

    fn optional_bytes(&mut self, field: &'static str) -> ProtocolResult<Option<Value>> {
        match self.i32()? {
            -1 => Ok(None),
            len => {
                let len = usize::try_from(len).map_err(|_| {
                    ProtocolError::invalid_field(self.message, field, format!("negative length {len}"))
                })?;
                Ok(Some(self.take(len)?.to_vec()))
            }
        }
    }

    /// Element count of a collection, capped by what the remaining bytes
    /// could possibly hold so a bogus count cannot trigger a huge allocation.
    fn count(&mut self, field: &'static str, min_element_len: usize) -> ProtocolResult<usize> {
        let count = self.len(field)?;
        let remaining = self.data.len() - self.offset;
        if count > remaining / min_element_len {
            return Err(ProtocolError::Truncated {
                message: self.message,
                offset: self.offset,
            });
        }
        Ok(count)
    }

    fn pairs(&mut self) -> ProtocolResult<HashMap<Key, Value>> {
        // Smallest pair: empty key (2 bytes) and empty value (4 bytes).
        let count = self.count("pairs", 6)?;
        let mut pairs = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = self.string("key")?;
            let value = self.bytes("value")?;
            pairs.insert(key, value);
        }
        Ok(pairs)
    }

    fn keys(&mut self) -> ProtocolResult<HashSet<Key>> {
        let count = self.count("keys", 2)?;
        let mut keys = HashSet::with_capacity(count);
        for _ in 0..count {
            keys.insert(self.string("key")?);
        }
        Ok(keys)
    }

    fn finish(self) -> ProtocolResult<()> {
        let count = self.data.len() - self.offset;
        if count == 0 {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                message: self.message,
                count,
            })
        }
    }
}

/// Decodes a frame body (tag and payload) into a message.
///
/// # Errors
///
/// Returns an error if the body is empty, the tag is unknown, or the payload
/// does not match the message layout.
pub fn decode(body: &[u8]) -> ProtocolResult<Message> {
    let (&tag, payload) = body.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let message = match tag {
        TAG_PUT_REQUEST => "PutRequest",
        TAG_GET_REQUEST => "GetRequest",
        TAG_MULTI_PUT_REQUEST => "MultiPutRequest",
        TAG_MULTI_GET_REQUEST => "MultiGetRequest",
        TAG_GET_WHEN_REQUEST => "GetWhenRequest",
        TAG_PUT_RESPONSE => "PutResponse",
        TAG_GET_RESPONSE => "GetResponse",
        TAG_MULTI_GET_RESPONSE => "MultiGetResponse",
        TAG_AUTH_REQUEST => "AuthRequest",
        TAG_AUTH_RESPONSE => "AuthResponse",
        TAG_ERROR_RESPONSE => "ErrorResponse",
        _ => return Err(ProtocolError::UnknownTag { tag }),
    };

    let mut r = Reader {
        message,
        data: payload,
        offset: 0,
    };

    let decoded = match tag {
        TAG_PUT_REQUEST => Message::PutRequest {
            id: r.i32()?,
            key: r.string("key")?,
            value: r.bytes("value")?,
        },
        TAG_GET_REQUEST => Message::GetRequest {
            id: r.i32()?,
            key: r.string("key")?,
        },
        TAG_MULTI_PUT_REQUEST => Message::MultiPutRequest {
            id: r.i32()?,
            pairs: r.pairs()?,
        },
        TAG_MULTI_GET_REQUEST => Message::MultiGetRequest {
            id: r.i32()?,
            keys: r.keys()?,
        },
        TAG_GET_WHEN_REQUEST => Message::GetWhenRequest {
            id: r.i32()?,
            key: r.string("key")?,
            key_cond: r.string("key_cond")?,
            value_cond: r.bytes("value_cond")?,
        },
        TAG_PUT_RESPONSE => Message::PutResponse {
            request_id: r.i32()?,
        },
        TAG_GET_RESPONSE => Message::GetResponse {
            request_id: r.i32()?,
            value: r.optional_bytes("value")?,
        },
        TAG_MULTI_GET_RESPONSE => Message::MultiGetResponse {
            request_id: r.i32()?,
            pairs: r.pairs()?,
        },
        TAG_AUTH_REQUEST => Message::AuthRequest {
            username: r.string("username")?,
            password: r.string("password")?,
        },
        TAG_AUTH_RESPONSE => {
            let code = r.i32()?;
            let status = AuthStatus::from_code(code).ok_or_else(|| {
                ProtocolError::invalid_field(message, "status", format!("unknown code {code}"))
            })?;
            Message::AuthResponse { status }
        }
        _ => Message::ErrorResponse {
            request_id: r.i32()?,
            message: r.string("message")?,
        },
    };

    r.finish()?;
    Ok(decoded)
}

/// Checks a frame's announced length against the limit.
pub(crate) fn check_frame_length(length: usize, limit: usize) -> ProtocolResult<()> {
    if length == 0 {
        Err(ProtocolError::EmptyFrame)
    } else if length > limit {
        Err(ProtocolError::FrameTooLarge { length, limit })
    } else {
        Ok(())
    }
}

/// Reads and decodes one framed message.
///
/// An end of stream before the first header byte surfaces as an
/// [`io::ErrorKind::UnexpectedEof`](std::io::ErrorKind::UnexpectedEof) error;
/// see [`ProtocolError::is_eof`].
///
/// # Errors
///
/// Returns an error if reading fails, the frame is too large, or the body
/// cannot be decoded.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_size: usize) -> ProtocolResult<Message> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let length = u32::from_be_bytes(header) as usize;
    check_frame_length(length, max_frame_size)?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    decode(&body)
}
