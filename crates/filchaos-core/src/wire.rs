//! Hand-rolled protobuf and length-prefix encoding.
//!
//! The engine forges frames for protocols it does not own, including frames
//! no protobuf library would ever emit (wrong wire types, lying lengths), so
//! encoding is done by hand.

use crate::constants::MAX_ENVELOPE_SIZE;
use crate::error::FuzzError;

/// Protobuf wire type for varints.
pub const WIRE_VARINT: u8 = 0;
/// Protobuf wire type for length-delimited fields.
pub const WIRE_LEN: u8 = 2;

/// Append `v` as an unsigned LEB128 varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode a leading unsigned varint, returning the value and its encoded length.
pub fn read_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in data.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Minimal protobuf message builder.
#[derive(Debug, Default, Clone)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a field key. Any wire type is accepted, valid or not.
    pub fn key(&mut self, field: u32, wire_type: u8) -> &mut Self {
        put_uvarint(&mut self.buf, (u64::from(field) << 3) | u64::from(wire_type & 0x07));
        self
    }

    /// Write a bare varint with no key.
    pub fn varint(&mut self, v: u64) -> &mut Self {
        put_uvarint(&mut self.buf, v);
        self
    }

    pub fn varint_field(&mut self, field: u32, v: u64) -> &mut Self {
        self.key(field, WIRE_VARINT).varint(v)
    }

    pub fn bool_field(&mut self, field: u32, v: bool) -> &mut Self {
        self.varint_field(field, u64::from(v))
    }

    pub fn bytes_field(&mut self, field: u32, data: &[u8]) -> &mut Self {
        self.key(field, WIRE_LEN).varint(data.len() as u64);
        self.buf.extend_from_slice(data);
        self
    }

    /// Embed an already-encoded sub-message.
    pub fn message_field(&mut self, field: u32, body: &ProtoWriter) -> &mut Self {
        self.bytes_field(field, &body.buf)
    }

    /// Append raw bytes with no framing at all.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Prefix `body` with its uvarint length, the framing used by identify and gossipsub.
pub fn delimit(body: &[u8]) -> Result<Vec<u8>, FuzzError> {
    check_size(body)?;
    let mut out = Vec::with_capacity(body.len() + 10);
    put_uvarint(&mut out, body.len() as u64);
    out.extend_from_slice(body);
    Ok(out)
}

/// Prefix `body` with a uvarint length that does not match it.
pub fn delimit_with_claim(body: &[u8], claimed: u64) -> Result<Vec<u8>, FuzzError> {
    check_size(body)?;
    let mut out = Vec::with_capacity(body.len() + 10);
    put_uvarint(&mut out, claimed);
    out.extend_from_slice(body);
    Ok(out)
}

/// Prefix `body` with a 4-byte big-endian length (msgio framing).
pub fn msgio_delimit(body: &[u8]) -> Result<Vec<u8>, FuzzError> {
    check_size(body)?;
    let len = u32::try_from(body.len())
        .map_err(|_| FuzzError::Encode(format!("{} bytes overflow a u32 prefix", body.len())))?;
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

fn check_size(body: &[u8]) -> Result<(), FuzzError> {
    if body.len() > MAX_ENVELOPE_SIZE {
        return Err(FuzzError::Encode(format!(
            "envelope of {} bytes exceeds {MAX_ENVELOPE_SIZE}",
            body.len()
        )));
    }
    Ok(())
}
