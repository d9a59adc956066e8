//! Request and reply frames
//!
//! ## Field encoding
//!
//! ```text
//! integers: big-endian, fixed width
//! string:   [Length: i16][UTF-8 bytes]
//!           a missing string is [1][0x00]
//! Xid:      [FormatId: i32][GtridLen: i32][Gtrid][BqualLen: i32][Bqual]
//! ```
//!
//! A reply starts with a completion status (`i16`). Zero means success and the
//! operation's payload follows. Anything else is the id of the first remote
//! exception and the rest of the frame is the exception chain (see
//! [`crate::exception`]).

use crate::exception::decode_exception_chain;
use crate::segment::Segment;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use corelink_core::{CommsError, CommsResult, Xid};
use std::io::{Cursor, Read};

/// Completion status of a successful reply
pub const SI_NO_EXCEPTION: i16 = 0;

/// Outbound frame body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFrame {
    buf: Vec<u8>,
}

impl RequestFrame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a byte
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a boolean as a single byte (0/1)
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    /// Append a big-endian `i16`
    pub fn put_i16(&mut self, value: i16) -> &mut Self {
        let mut b = [0u8; 2];
        BigEndian::write_i16(&mut b, value);
        self.buf.extend_from_slice(&b);
        self
    }

    /// Append a big-endian `i32`
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        let mut b = [0u8; 4];
        BigEndian::write_i32(&mut b, value);
        self.buf.extend_from_slice(&b);
        self
    }

    /// Append raw bytes without a length prefix
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a length-prefixed (`i32`) byte slice
    pub fn put_slice(&mut self, bytes: &[u8]) -> CommsResult<&mut Self> {
        let len = i32::try_from(bytes.len()).map_err(|_| {
            CommsError::IncorrectCall(format!("slice of {} bytes is too large", bytes.len()))
        })?;
        self.put_i32(len);
        Ok(self.put_bytes(bytes))
    }

    /// Append a string as `i16` length + UTF-8
    pub fn put_string(&mut self, value: &str) -> CommsResult<&mut Self> {
        let len = i16::try_from(value.len()).map_err(|_| {
            CommsError::IncorrectCall(format!("string of {} bytes is too long", value.len()))
        })?;
        self.put_i16(len);
        Ok(self.put_bytes(value.as_bytes()))
    }

    /// Append an optional string; `None` is written as a single NUL byte
    pub fn put_optional_string(&mut self, value: Option<&str>) -> CommsResult<&mut Self> {
        match value {
            Some(s) => self.put_string(s),
            None => {
                self.put_i16(1);
                Ok(self.put_u8(0))
            }
        }
    }

    /// Append an Xid structure
    pub fn put_xid(&mut self, xid: &Xid) -> &mut Self {
        // Xid components are bounded to 64 bytes on construction
        self.put_i32(xid.format_id());
        self.put_i32(xid.global_transaction_id().len() as i32);
        self.put_bytes(xid.global_transaction_id());
        self.put_i32(xid.branch_qualifier().len() as i32);
        self.put_bytes(xid.branch_qualifier())
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the frame, returning the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Inbound reply frame
#[derive(Debug)]
pub struct ReplyFrame {
    segment: Segment,
    cursor: Cursor<Vec<u8>>,
}

impl ReplyFrame {
    /// Wrap the bytes of a reply received for `segment`
    pub fn new(segment: Segment, bytes: Vec<u8>) -> Self {
        Self {
            segment,
            cursor: Cursor::new(bytes),
        }
    }

    /// Build a successful reply carrying `payload`
    pub fn success(segment: Segment, payload: &[u8]) -> Self {
        let mut frame = RequestFrame::new();
        frame.put_i16(SI_NO_EXCEPTION).put_bytes(payload);
        Self::new(segment, frame.into_bytes())
    }

    /// Segment this reply answers
    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    /// Read the completion status and fail with the decoded remote exception
    /// if it is not [`SI_NO_EXCEPTION`].
    ///
    /// A reply tagged with a different segment than `expected` is a protocol
    /// error.
    pub fn check_completion(&mut self, expected: Segment) -> CommsResult<()> {
        if self.segment != expected {
            return Err(CommsError::Protocol(format!(
                "segment mismatch: expected {}, received {}",
                expected, self.segment
            )));
        }
        let status = self.get_i16()?;
        if status == SI_NO_EXCEPTION {
            return Ok(());
        }
        Err(decode_exception_chain(self, status))
    }

    /// Read a byte
    pub fn get_u8(&mut self) -> CommsResult<u8> {
        self.cursor.read_u8().map_err(CommsError::from)
    }

    /// Read a boolean byte
    pub fn get_bool(&mut self) -> CommsResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Read a big-endian `i16`
    pub fn get_i16(&mut self) -> CommsResult<i16> {
        self.cursor
            .read_i16::<BigEndian>()
            .map_err(CommsError::from)
    }

    /// Read a big-endian `i32`
    pub fn get_i32(&mut self) -> CommsResult<i32> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(CommsError::from)
    }

    /// Read exactly `len` bytes
    pub fn get_bytes(&mut self, len: usize) -> CommsResult<Vec<u8>> {
        if len > self.remaining() {
            return Err(CommsError::Protocol(format!(
                "field of {} bytes exceeds the {} bytes left in the frame",
                len,
                self.remaining()
            )));
        }
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out)?;
        Ok(out)
    }

    /// Read an `i16`-length-prefixed UTF-8 string
    pub fn get_string(&mut self) -> CommsResult<String> {
        let len = self.get_i16()?;
        if len < 0 {
            return Err(CommsError::Protocol(format!(
                "negative string length {}",
                len
            )));
        }
        let bytes = self.get_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| CommsError::Protocol(format!("string is not UTF-8: {}", e)))
    }

    /// Read an Xid structure
    pub fn get_xid(&mut self) -> CommsResult<Xid> {
        let format_id = self.get_i32()?;
        let gtrid_len = self.get_length("global transaction id")?;
        let gtrid = self.get_bytes(gtrid_len)?;
        let bqual_len = self.get_length("branch qualifier")?;
        let bqual = self.get_bytes(bqual_len)?;
        Xid::new(format_id, &gtrid, &bqual)
            .map_err(|e| CommsError::Protocol(format!("malformed Xid: {}", e)))
    }

    fn get_length(&mut self, what: &str) -> CommsResult<usize> {
        let len = self.get_i32()?;
        usize::try_from(len)
            .map_err(|_| CommsError::Protocol(format!("negative {} length {}", what, len)))
    }
}
