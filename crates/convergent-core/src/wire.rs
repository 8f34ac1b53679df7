//! Byte-level framing shared by every higher-level encoding in this crate.
//!
//! Every encoded unit is `tag: u8, len: u32 (big-endian), payload: [u8; len]`.
//! Higher layers (the value codec, the state-update envelope, the clock)
//! build on this single primitive rather than inventing their own framing.

use crate::error::CrdtError;

/// One-byte tags identifying the category of an encoded unit.
pub mod tag {
    pub const PACKABLE: u8 = b'p';
    pub const LIST: u8 = b'l';
    pub const SET: u8 = b'e';
    pub const TUPLE: u8 = b't';
    pub const BYTES: u8 = b'b';
    pub const BYTEARRAY: u8 = b'a';
    pub const STR: u8 = b's';
    pub const INT: u8 = b'i';
    pub const FLOAT: u8 = b'f';
}

/// Appends `tag`, a 4-byte big-endian length, then `payload` to `out`.
pub fn write_tagged(tag: u8, payload: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Reads one tagged unit from the front of `data`.
///
/// Returns `(tag, payload, bytes_consumed)`. Does not copy the payload.
pub fn read_tagged(data: &[u8]) -> Result<(u8, &[u8], usize), CrdtError> {
    if data.len() < 5 {
        return Err(CrdtError::type_invalid("truncated tagged value: need at least 5 bytes"));
    }
    let tag = data[0];
    let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
    let start = 5;
    let end = start
        .checked_add(len)
        .ok_or_else(|| CrdtError::type_invalid("tagged value length overflow"))?;
    if data.len() < end {
        return Err(CrdtError::type_invalid("truncated tagged value: payload shorter than length prefix"));
    }
    Ok((tag, &data[start..end], end))
}

/// Hex-encodes bytes using lowercase digits, matching the class-name
/// prefix convention used by packable objects on the wire.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn hex_decode(s: &str) -> Result<Vec<u8>, CrdtError> {
    if s.len() % 2 != 0 {
        return Err(CrdtError::type_invalid("odd-length hex string"));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char)
            .to_digit(16)
            .ok_or_else(|| CrdtError::type_invalid("invalid hex digit"))?;
        let lo = (chunk[1] as char)
            .to_digit(16)
            .ok_or_else(|| CrdtError::type_invalid("invalid hex digit"))?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_tagged_value() {
        let mut buf = Vec::new();
        write_tagged(tag::STR, b"hello", &mut buf);
        let (t, payload, consumed) = read_tagged(&buf).unwrap();
        assert_eq!(t, tag::STR);
        assert_eq!(payload, b"hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf = Vec::new();
        write_tagged(tag::STR, b"hello", &mut buf);
        buf.truncate(buf.len() - 1);
        assert!(read_tagged(&buf).is_err());
    }

    #[test]
    fn hex_round_trips() {
        let bytes = vec![0u8, 1, 255, 16, 9];
        let hex = hex_encode(&bytes);
        assert_eq!(hex_decode(&hex).unwrap(), bytes);
    }
}
