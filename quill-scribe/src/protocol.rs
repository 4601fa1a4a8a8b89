//! Framed binary codec for the collector's `Log` call.
//!
//! Every message travels in a frame prefixed by its 4-byte big-endian
//! length. Calls are written with the non-strict header
//! (`i32 name_len, name, u8 type, i32 seq_id`); replies are accepted in
//! either the strict or non-strict form.

use crate::error::DeliveryError;
use bytes::{Buf, BufMut, BytesMut};

pub const METHOD_LOG: &str = "Log";

/// Frames larger than this are rejected instead of allocated.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const MAX_SKIP_DEPTH: usize = 64;

// ── Message and field types ──────────────────────────────────────

pub mod message_type {
    pub const CALL: u8 = 1;
    pub const REPLY: u8 = 2;
    pub const EXCEPTION: u8 = 3;
    pub const ONEWAY: u8 = 4;
}

mod ttype {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

/// Collector verdict for one `Log` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    TryLater,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::TryLater => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ResultCode::Ok),
            1 => Some(ResultCode::TryLater),
            _ => None,
        }
    }
}

/// One `(category, message)` pair as decoded by a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: String,
    pub message: String,
}

/// A decoded `Log` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCall {
    pub seq_id: i32,
    pub entries: Vec<LogEntry>,
}

// ── Client side ──────────────────────────────────────────────────

/// Frame body bytes of a single-entry `Log` call, excluding both strings.
const LOG_CALL_OVERHEAD: usize = 36;

/// Encode a framed `Log` call carrying a single entry.
///
/// Calls whose frame would exceed [`MAX_FRAME_LEN`] are refused and leave
/// `buf` empty.
pub fn encode_log_call(
    buf: &mut BytesMut,
    seq_id: i32,
    category: &str,
    message: &str,
) -> Result<(), DeliveryError> {
    buf.clear();
    let len = LOG_CALL_OVERHEAD
        .saturating_add(category.len())
        .saturating_add(message.len());
    if len > MAX_FRAME_LEN {
        return Err(DeliveryError::MessageTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }
    buf.reserve(len + 4);
    buf.put_u32(0);

    put_string(buf, METHOD_LOG.as_bytes());
    buf.put_u8(message_type::CALL);
    buf.put_i32(seq_id);

    // Log_args { 1: list<LogEntry> messages }
    put_field_header(buf, ttype::LIST, 1);
    buf.put_u8(ttype::STRUCT);
    buf.put_i32(1);
    put_field_header(buf, ttype::STRING, 1);
    put_string(buf, category.as_bytes());
    put_field_header(buf, ttype::STRING, 2);
    put_string(buf, message.as_bytes());
    buf.put_u8(ttype::STOP);
    buf.put_u8(ttype::STOP);

    patch_frame_len(buf);
    Ok(())
}

/// Decode a reply frame body (length prefix already stripped).
pub fn decode_log_reply(frame: &[u8], expected_seq: i32) -> Result<ResultCode, DeliveryError> {
    let mut r = Reader::new(frame);
    let header = r.message_header()?;
    if header.seq_id != expected_seq {
        return Err(DeliveryError::Protocol(format!(
            "sequence mismatch: expected {expected_seq}, got {}",
            header.seq_id
        )));
    }
    match header.message_type {
        message_type::REPLY => {}
        message_type::EXCEPTION => {
            return Err(DeliveryError::Application(r.application_exception()?));
        }
        other => {
            return Err(DeliveryError::Protocol(format!("unexpected message type {other}")));
        }
    }
    if header.name != METHOD_LOG {
        return Err(DeliveryError::Protocol(format!("wrong method name {:?}", header.name)));
    }

    // Log_result { 0: ResultCode success }
    let mut success = None;
    loop {
        let (kind, id) = r.field_header()?;
        match (kind, id) {
            (ttype::STOP, _) => break,
            (ttype::I32, 0) => success = Some(r.i32()?),
            _ => r.skip(kind, 0)?,
        }
    }

    let code = success.ok_or_else(|| DeliveryError::Application("Log failed: unknown result".into()))?;
    ResultCode::from_code(code)
        .ok_or_else(|| DeliveryError::Protocol(format!("unknown result code {code}")))
}

// ── Collector side ───────────────────────────────────────────────

/// Decode a `Log` call frame body (length prefix already stripped).
pub fn decode_log_call(frame: &[u8]) -> Result<LogCall, DeliveryError> {
    let mut r = Reader::new(frame);
    let header = r.message_header()?;
    if header.message_type != message_type::CALL && header.message_type != message_type::ONEWAY {
        return Err(DeliveryError::Protocol(format!(
            "expected a call, got message type {}",
            header.message_type
        )));
    }
    if header.name != METHOD_LOG {
        return Err(DeliveryError::Protocol(format!("unknown method {:?}", header.name)));
    }

    let mut entries = Vec::new();
    loop {
        let (kind, id) = r.field_header()?;
        match (kind, id) {
            (ttype::STOP, _) => break,
            (ttype::LIST, 1) => {
                let (elem, size) = r.collection_header()?;
                for _ in 0..size {
                    if elem == ttype::STRUCT {
                        entries.push(r.log_entry()?);
                    } else {
                        r.skip(elem, 0)?;
                    }
                }
            }
            _ => r.skip(kind, 0)?,
        }
    }

    Ok(LogCall {
        seq_id: header.seq_id,
        entries,
    })
}

/// Encode a framed strict-header reply for `Log`.
pub fn encode_log_reply(buf: &mut BytesMut, seq_id: i32, code: ResultCode) {
    buf.clear();
    buf.put_u32(0);

    buf.put_u32(VERSION_1 | u32::from(message_type::REPLY));
    put_string(buf, METHOD_LOG.as_bytes());
    buf.put_i32(seq_id);

    put_field_header(buf, ttype::I32, 0);
    buf.put_i32(code.code());
    buf.put_u8(ttype::STOP);

    patch_frame_len(buf);
}

/// Read the 4-byte frame length prefix.
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, DeliveryError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DeliveryError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }
    Ok(len)
}

// ── Encoding helpers ─────────────────────────────────────────────

fn put_field_header(buf: &mut BytesMut, kind: u8, id: i16) {
    buf.put_u8(kind);
    buf.put_i16(id);
}

fn put_string(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.put_slice(bytes);
}

fn patch_frame_len(buf: &mut BytesMut) {
    let len = (buf.len() - 4) as u32;
    buf[..4].copy_from_slice(&len.to_be_bytes());
}

// ── Decoding ─────────────────────────────────────────────────────

struct MessageHeader {
    name: String,
    message_type: u8,
    seq_id: i32,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), DeliveryError> {
        if self.buf.remaining() < n {
            return Err(DeliveryError::Protocol(format!(
                "truncated frame: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DeliveryError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn i16(&mut self) -> Result<i16, DeliveryError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    fn i32(&mut self) -> Result<i32, DeliveryError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn length(&mut self) -> Result<usize, DeliveryError> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| DeliveryError::Protocol(format!("negative length {len}")))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DeliveryError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self) -> Result<String, DeliveryError> {
        let len = self.length()?;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DeliveryError::Protocol("string is not valid UTF-8".into()))
    }

    fn message_header(&mut self) -> Result<MessageHeader, DeliveryError> {
        let first = self.i32()?;
        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(DeliveryError::Protocol(format!("bad protocol version {word:#010x}")));
            }
            let message_type = (word & 0xff) as u8;
            let name = self.string()?;
            let seq_id = self.i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        } else {
            let bytes = self.bytes(first as usize)?;
            let name = String::from_utf8(bytes.to_vec())
                .map_err(|_| DeliveryError::Protocol("method name is not valid UTF-8".into()))?;
            let message_type = self.u8()?;
            let seq_id = self.i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        }
    }

    fn field_header(&mut self) -> Result<(u8, i16), DeliveryError> {
        let kind = self.u8()?;
        if kind == ttype::STOP {
            return Ok((kind, 0));
        }
        Ok((kind, self.i16()?))
    }

    fn collection_header(&mut self) -> Result<(u8, usize), DeliveryError> {
        let elem = self.u8()?;
        let size = self.length()?;
        Ok((elem, size))
    }

    fn log_entry(&mut self) -> Result<LogEntry, DeliveryError> {
        let mut entry = LogEntry {
            category: String::new(),
            message: String::new(),
        };
        loop {
            let (kind, id) = self.field_header()?;
            match (kind, id) {
                (ttype::STOP, _) => break,
                (ttype::STRING, 1) => entry.category = self.string()?,
                (ttype::STRING, 2) => entry.message = self.string()?,
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(entry)
    }

    /// TApplicationException { 1: string message, 2: i32 type }
    fn application_exception(&mut self) -> Result<String, DeliveryError> {
        let mut message = String::new();
        let mut kind_code = None;
        loop {
            let (kind, id) = self.field_header()?;
            match (kind, id) {
                (ttype::STOP, _) => break,
                (ttype::STRING, 1) => message = self.string()?,
                (ttype::I32, 2) => kind_code = Some(self.i32()?),
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(match kind_code {
            Some(code) => format!("{message} (type {code})"),
            None => message,
        })
    }

    fn skip(&mut self, kind: u8, depth: usize) -> Result<(), DeliveryError> {
        if depth > MAX_SKIP_DEPTH {
            return Err(DeliveryError::Protocol("nesting too deep".into()));
        }
        match kind {
            ttype::BOOL | ttype::BYTE => self.bytes(1).map(drop),
            ttype::I16 => self.bytes(2).map(drop),
            ttype::I32 => self.bytes(4).map(drop),
            ttype::DOUBLE | ttype::I64 => self.bytes(8).map(drop),
            ttype::STRING => {
                let len = self.length()?;
                self.bytes(len).map(drop)
            }
            ttype::STRUCT => loop {
                let (field, _) = self.field_header()?;
                if field == ttype::STOP {
                    return Ok(());
                }
                self.skip(field, depth + 1)?;
            },
            ttype::MAP => {
                let key = self.u8()?;
                let value = self.u8()?;
                let size = self.length()?;
                for _ in 0..size {
                    self.skip(key, depth + 1)?;
                    self.skip(value, depth + 1)?;
                }
                Ok(())
            }
            ttype::SET | ttype::LIST => {
                let (elem, size) = self.collection_header()?;
                for _ in 0..size {
                    self.skip(elem, depth + 1)?;
                }
                Ok(())
            }
            other => Err(DeliveryError::Protocol(format!("unknown field type {other}"))),
        }
    }
}
