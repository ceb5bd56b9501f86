// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! EBML primitives and incremental tag extraction.
//!
//! Everything here operates on plain byte slices so the engine can parse an
//! arbitrarily chunked producer stream: each reader either yields a value
//! with the number of bytes it consumed, or `Ok(None)` when the slice ends
//! mid-encoding. Malformed input is a hard error, distinct from "need more
//! bytes".

use bytes::BufMut;

use crate::error::RelayKitError;
use crate::ids;
use crate::Result;

/// Sentinel for the "unknown size" length encoding.
///
/// Tags carrying this size continue until the next tag at the same level.
pub const SIZE_UNKNOWN: u64 = u64::MAX;

/// Hard cap on a complete sized top-level tag (header plus body).
///
/// Guards the parse buffer against malformed or hostile length fields.
pub const MAX_TAG_LEN: usize = 1024 * 1024;

/// Reads a variable-length element id.
///
/// The position of the most significant 1-bit of the first byte gives the
/// id's total length; the marker bit is kept in the returned value, matching
/// the on-wire form. Returns `Ok(None)` when the slice ends mid-id.
pub fn read_id(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let len = first.leading_zeros() as usize + 1;
    // Matroska ids fit four bytes; a longer prefix cannot start a valid id.
    if len > 4 {
        return Err(RelayKitError::MalformedEbml);
    }
    if buf.len() < len {
        return Ok(None);
    }
    let mut id = 0u32;
    for &byte in &buf[..len] {
        id = (id << 8) | u32::from(byte);
    }
    Ok(Some((id, len)))
}

/// Reads a variable-length unsigned integer (a length field).
///
/// Unlike ids, the marker bit is cleared in the returned value. The eight
/// all-ones encodings (`0xFF`, `0x7FFF`, ..) decode to [`SIZE_UNKNOWN`].
/// Returns `Ok(None)` when the slice ends mid-integer.
pub fn read_vint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first == 0 {
        return Err(RelayKitError::MalformedEbml);
    }
    let len = first.leading_zeros() as usize + 1;
    if buf.len() < len {
        return Ok(None);
    }
    let mut value = u64::from(first) ^ (1u64 << (8 - len));
    for &byte in &buf[1..len] {
        value = (value << 8) | u64::from(byte);
    }
    if value == (1u64 << (7 * len)) - 1 {
        return Ok(Some((SIZE_UNKNOWN, len)));
    }
    Ok(Some((value, len)))
}

/// Reads a fixed-width big-endian unsigned integer spanning the whole slice.
pub fn read_uint(buf: &[u8]) -> Result<u64> {
    if buf.len() > 8 {
        return Err(RelayKitError::MalformedEbml);
    }
    let mut value = 0u64;
    for &byte in buf {
        value = (value << 8) | u64::from(byte);
    }
    Ok(value)
}

/// Appends a fixed-width big-endian unsigned integer.
///
/// Values wider than `width` bytes are truncated to the low-order bytes;
/// callers pick a width that fits.
pub fn put_uint(out: &mut impl BufMut, value: u64, width: usize) {
    debug_assert!(width <= 8);
    for shift in (0..width).rev() {
        out.put_u8((value >> (shift * 8)) as u8);
    }
}

/// Appends a raw element id in its on-wire form.
pub fn put_id(out: &mut impl BufMut, id: u32) {
    put_uint(out, u64::from(id), id_len(id));
}

/// Number of bytes an id occupies on the wire.
pub const fn id_len(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// A parsed EBML tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// The element id, marker bit included.
    pub id: u32,
    /// Declared body size, or [`SIZE_UNKNOWN`].
    pub size: u64,
    /// Bytes consumed by the id plus the length field.
    pub header_len: usize,
}

impl Tag {
    /// Parses a tag header (id then length) from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the slice ends inside the header.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let Some((id, id_bytes)) = read_id(buf)? else {
            return Ok(None);
        };
        let Some((size, size_bytes)) = read_vint(&buf[id_bytes..])? else {
            return Ok(None);
        };
        Ok(Some(Self { id, size, header_len: id_bytes + size_bytes }))
    }

    /// Whether the tag was declared with an unknown size.
    pub const fn is_unknown_size(&self) -> bool {
        self.size == SIZE_UNKNOWN
    }
}

/// A complete top-level tag together with the bytes it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSpan {
    pub tag: Tag,
    /// Bytes this tag consumes from the top-level stream. For the container
    /// tags whose children re-enter the top-level loop this covers only the
    /// header.
    pub len: usize,
}

/// Extracts the next complete top-level tag from the front of `buf`.
///
/// Segment, Tracks, and Cluster span only their header here; their children
/// are handed back to the caller as subsequent top-level tags. That re-entry
/// is what makes indeterminate-length containers parseable from an unbounded
/// stream. Every other tag must be fully buffered and is rejected above
/// [`MAX_TAG_LEN`].
///
/// Returns `Ok(None)` when `buf` holds an incomplete tag.
pub fn next_tag(buf: &[u8]) -> Result<Option<TagSpan>> {
    let Some(tag) = Tag::parse(buf)? else {
        return Ok(None);
    };
    if matches!(tag.id, ids::SEGMENT | ids::TRACKS | ids::CLUSTER) {
        return Ok(Some(TagSpan { tag, len: tag.header_len }));
    }
    if tag.is_unknown_size() {
        // Only the container tags above may run on without a size.
        return Err(RelayKitError::MalformedEbml);
    }
    let total = tag.header_len as u64 + tag.size;
    if total > MAX_TAG_LEN as u64 {
        return Err(RelayKitError::BlockTooLarge);
    }
    if total > buf.len() as u64 {
        return Ok(None);
    }
    Ok(Some(TagSpan { tag, len: total as usize }))
}

/// Rewrites a non-canonical unknown-size length field to `0xFF` in place.
///
/// `header` must be exactly the tag's header bytes. The freed trailing bytes
/// of the old length encoding become a Void tag sized to consume them, so
/// the byte count of the header never changes. Decoders that accept only the
/// one-byte unknown-size form require this.
///
/// Returns `true` when the header was rewritten. Headers without room for a
/// Void (fewer than two freed bytes) are left untouched.
pub fn canonicalize_unknown_size(header: &mut [u8], tag: &Tag) -> bool {
    debug_assert_eq!(header.len(), tag.header_len);
    debug_assert!(tag.is_unknown_size());
    let id_bytes = id_len(tag.id);
    let size_bytes = tag.header_len - id_bytes;
    if size_bytes == 1 {
        // Already the canonical 0xFF form.
        return false;
    }
    if size_bytes < 3 {
        // One freed byte cannot hold a Void header.
        return false;
    }
    let before = header.len();
    header[id_bytes] = 0xFF;
    header[id_bytes + 1] = 0xEC; // Void
    #[allow(clippy::cast_possible_truncation)]
    {
        header[id_bytes + 2] = 0x80 | (size_bytes as u8 - 3);
    }
    // Whatever trails the Void header is its body; contents are irrelevant.
    debug_assert_eq!(header.len(), before);
    tracing::trace!("canonicalized unknown size on tag {:#010x}", tag.id);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_parsing() {
        assert_eq!(read_id(&[0x82]).unwrap(), Some((0x82, 1)));
        assert_eq!(read_id(&[0x40, 0x02]).unwrap(), Some((0x4002, 2)));
        assert_eq!(read_id(&[0x2A, 0xD7, 0xB1]).unwrap(), Some((0x2A_D7B1, 3)));
        assert_eq!(read_id(&[0x1A, 0x45, 0xDF, 0xA3]).unwrap(), Some((0x1A45_DFA3, 4)));
    }

    #[test]
    fn element_id_needs_more() {
        assert_eq!(read_id(&[]).unwrap(), None);
        assert_eq!(read_id(&[0x40]).unwrap(), None);
        assert_eq!(read_id(&[0x1A, 0x45, 0xDF]).unwrap(), None);
    }

    #[test]
    fn element_id_rejects_invalid_prefix() {
        assert_eq!(read_id(&[0x00]).unwrap_err(), RelayKitError::MalformedEbml);
        // A five-byte id prefix is outside the Matroska range.
        assert_eq!(read_id(&[0x08, 0, 0, 0, 2]).unwrap_err(), RelayKitError::MalformedEbml);
    }

    #[test]
    fn vint_parsing_clears_marker() {
        assert_eq!(read_vint(&[0x82]).unwrap(), Some((2, 1)));
        assert_eq!(read_vint(&[0x40, 0x02]).unwrap(), Some((2, 2)));
        assert_eq!(read_vint(&[0x20, 0x00, 0x02]).unwrap(), Some((2, 3)));
        assert_eq!(
            read_vint(&[0x01, 0, 0, 0, 0, 0, 0, 0x02]).unwrap(),
            Some((2, 8))
        );
    }

    #[test]
    fn vint_unknown_size_encodings() {
        assert_eq!(read_vint(&[0xFF]).unwrap(), Some((SIZE_UNKNOWN, 1)));
        assert_eq!(read_vint(&[0x7F, 0xFF]).unwrap(), Some((SIZE_UNKNOWN, 2)));
        assert_eq!(read_vint(&[0x3F, 0xFF, 0xFF]).unwrap(), Some((SIZE_UNKNOWN, 3)));
        assert_eq!(
            read_vint(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            Some((SIZE_UNKNOWN, 8))
        );
        // Near-misses stay ordinary values.
        assert_eq!(read_vint(&[0x7F, 0xFE]).unwrap(), Some((0x3FFE, 2)));
    }

    #[test]
    fn vint_zero_byte_is_malformed() {
        assert_eq!(read_vint(&[0x00]).unwrap_err(), RelayKitError::MalformedEbml);
    }

    #[test]
    fn fixed_uint_parsing() {
        assert_eq!(read_uint(&[]).unwrap(), 0);
        assert_eq!(read_uint(&[0x0F, 0x42, 0x40]).unwrap(), 1_000_000);
        assert_eq!(read_uint(&[0, 0, 0, 0, 0, 0, 0, 42]).unwrap(), 42);
        assert!(read_uint(&[0; 9]).is_err());
    }

    #[test]
    fn fixed_uint_round_trip() {
        let mut out = Vec::new();
        put_uint(&mut out, 0x0102_0304, 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(read_uint(&out).unwrap(), 0x0102_0304);
    }

    #[test]
    fn id_writer_matches_wire_form() {
        let mut out = Vec::new();
        put_id(&mut out, ids::CLUSTER);
        put_id(&mut out, ids::TIMECODE);
        assert_eq!(out, [0x1F, 0x43, 0xB6, 0x75, 0xE7]);
    }

    #[test]
    fn tag_header_parsing() {
        let tag = Tag::parse(&[0xA3, 0x8E]).unwrap().unwrap();
        assert_eq!(tag, Tag { id: ids::SIMPLE_BLOCK, size: 14, header_len: 2 });

        // Header split across a chunk boundary.
        assert_eq!(Tag::parse(&[0x1A, 0x45, 0xDF, 0xA3]).unwrap(), None);
    }

    #[test]
    fn next_tag_spans_container_headers_only() {
        let segment = [0x18, 0x53, 0x80, 0x67, 0xFF, 0xAA, 0xBB];
        let span = next_tag(&segment).unwrap().unwrap();
        assert_eq!(span.tag.id, ids::SEGMENT);
        assert!(span.tag.is_unknown_size());
        assert_eq!(span.len, 5);
    }

    #[test]
    fn next_tag_waits_for_full_body() {
        let block = [0xA3, 0x84, 0x81, 0x00];
        assert_eq!(next_tag(&block).unwrap(), None);
        let block = [0xA3, 0x84, 0x81, 0x00, 0x00, 0x80];
        let span = next_tag(&block).unwrap().unwrap();
        assert_eq!(span.len, 6);
    }

    #[test]
    fn next_tag_rejects_oversized_bodies() {
        // Declared body just under the 3-byte vint ceiling, well past 1 MiB.
        let huge = [0xA3, 0x3F, 0xFF, 0xFE];
        assert_eq!(next_tag(&huge).unwrap_err(), RelayKitError::BlockTooLarge);
    }

    #[test]
    fn next_tag_rejects_unknown_size_outside_containers() {
        let info = [0x15, 0x49, 0xA9, 0x66, 0xFF];
        assert_eq!(next_tag(&info).unwrap_err(), RelayKitError::MalformedEbml);
    }

    #[test]
    fn canonicalize_three_byte_unknown_size() {
        let mut header = [0x18, 0x53, 0x80, 0x67, 0x3F, 0xFF, 0xFF];
        let tag = Tag::parse(&header).unwrap().unwrap();
        assert!(canonicalize_unknown_size(&mut header, &tag));
        assert_eq!(header, [0x18, 0x53, 0x80, 0x67, 0xFF, 0xEC, 0x80]);
    }

    #[test]
    fn canonicalize_eight_byte_unknown_size() {
        let mut header = [0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let tag = Tag::parse(&header).unwrap().unwrap();
        assert!(canonicalize_unknown_size(&mut header, &tag));
        assert_eq!(&header[..8], &[0x18, 0x53, 0x80, 0x67, 0xFF, 0xEC, 0x85, 0xFF]);
        // The Void body is five bytes of leftovers; total length unchanged.
        assert_eq!(header.len(), 12);
    }

    #[test]
    fn canonicalize_leaves_canonical_and_cramped_headers() {
        let mut header = [0x18, 0x53, 0x80, 0x67, 0xFF];
        let tag = Tag::parse(&header).unwrap().unwrap();
        assert!(!canonicalize_unknown_size(&mut header, &tag));

        // Two-byte encoding frees a single byte: no room for a Void header.
        let mut header = [0x18, 0x53, 0x80, 0x67, 0x7F, 0xFF];
        let tag = Tag::parse(&header).unwrap().unwrap();
        assert!(!canonicalize_unknown_size(&mut header, &tag));
        assert_eq!(header, [0x18, 0x53, 0x80, 0x67, 0x7F, 0xFF]);
    }
}
