//! On-disk frames for the push log and the delete-marker log.
//!
//! Both logs are ASCII-decimal framed so they stay inspectable with ordinary
//! text tooling, and the fixed field widths let the marker log be read from
//! its tail with a single seek.
//!
//! Push record (22-byte header, then payload):
//!
//! ```text
//! ┌───────────┬─────┬───────────┬─────┬─────────────────────┐
//! │ len %010d │ ' ' │ crc %010d │ ' ' │ payload (len bytes) │
//! └───────────┴─────┴───────────┴─────┴─────────────────────┘
//! ```
//!
//! The stored payload always ends with the framing newline appended by the
//! writer, so `len >= 1` for every valid record and `crc` covers the caller
//! bytes plus that newline.
//!
//! Delete marker (fixed 43 bytes, one per consumed record):
//!
//! ```text
//! crc_off %010d ' ' offset %020d ' ' crc_push %010d '\n'
//! ```
//!
//! `offset` is the push-log byte position immediately after the consumed
//! record and `crc_off` covers its 8-byte big-endian encoding.

use std::io::Read;

use crate::{Error, Result};

/// Push-record header: two 10-digit decimal fields plus two separators.
pub const HEADER_SIZE: usize = 22;
/// Delete-marker frame size.
pub const MARKER_SIZE: usize = 43;

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC over the big-endian encoding of a push-log offset.
pub fn offset_crc(offset: u64) -> u32 {
    crc32(&offset.to_be_bytes())
}

/// Encode a push record for a caller payload.
///
/// The framing newline is appended here; `len` and `crc` describe the stored
/// payload (caller bytes plus newline).
///
/// # Errors
///
/// - `Error::EmptyPayload`: the caller supplied zero bytes
pub fn encode_push(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }
    let stored_len = payload.len() + 1;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.update(b"\n");
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(HEADER_SIZE + stored_len);
    frame.extend_from_slice(format!("{stored_len:010} {crc:010} ").as_bytes());
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    Ok(frame)
}

/// Decode a push-record header from the reader's current position.
///
/// Returns `Ok(None)` when the reader is exactly at end-of-file (the natural
/// record boundary); a partial header is a `ShortRead`.
pub fn decode_header(reader: &mut impl Read) -> Result<Option<(usize, u32)>> {
    let mut buf = [0u8; HEADER_SIZE];
    let got = read_full(reader, &mut buf)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(Error::ShortRead {
            expected: HEADER_SIZE,
            got,
        });
    }
    let stored_len = parse_field(&buf[0..10], "push header length not decimal")?;
    let crc = parse_field(&buf[11..21], "push header crc not decimal")?;
    let crc = u32::try_from(crc).map_err(|_| Error::Corrupt("push header crc out of range"))?;
    Ok(Some((stored_len as usize, crc)))
}

/// Read a stored payload of `len` bytes and verify it against `expected_crc`.
pub fn decode_payload(reader: &mut impl Read, len: usize, expected_crc: u32) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)?;
    if got < len {
        return Err(Error::ShortRead { expected: len, got });
    }
    let crc = crc32(&payload);
    if crc != expected_crc {
        return Err(Error::CrcMismatch {
            expected: expected_crc,
            got: crc,
        });
    }
    Ok(payload)
}

/// Encode a delete marker for the record ending at `offset`.
pub fn encode_marker(offset: u64, crc_push: u32) -> [u8; MARKER_SIZE] {
    let mut frame = [0u8; MARKER_SIZE];
    let text = format!("{:010} {offset:020} {crc_push:010}\n", offset_crc(offset));
    frame.copy_from_slice(text.as_bytes());
    frame
}

/// Decode a delete marker, verifying its own CRC over the offset.
pub fn decode_marker(frame: &[u8; MARKER_SIZE]) -> Result<(u64, u32)> {
    let crc_off = parse_field(&frame[0..10], "delete marker crc not decimal")?;
    let crc_off =
        u32::try_from(crc_off).map_err(|_| Error::Corrupt("delete marker crc out of range"))?;
    let offset = parse_field(&frame[11..31], "delete marker offset not decimal")?;
    let crc_push = parse_field(&frame[32..42], "delete marker push crc not decimal")?;
    let crc_push =
        u32::try_from(crc_push).map_err(|_| Error::Corrupt("delete marker push crc out of range"))?;

    let expected = offset_crc(offset);
    if crc_off != expected {
        return Err(Error::CrcMismatch {
            expected,
            got: crc_off,
        });
    }
    Ok((offset, crc_push))
}

fn parse_field(field: &[u8], context: &'static str) -> Result<u64> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or(Error::Corrupt(context))
}

/// Fill `buf` from the reader, tolerating partial reads. Returns the number
/// of bytes actually read; less than `buf.len()` means end-of-file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(filled)
}
