// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Hand-assembled WebM fragments and viewer harnesses for the integration
//! tests. Byte layouts mirror what live encoders emit: indeterminate
//! Segment lengths, one-byte track numbers, big-endian relative timecodes.

#![allow(dead_code)] // not every test binary uses every helper

use bytes::Bytes;
use relaykit_engine::ViewerSink;
use tokio::sync::mpsc;

/// Wraps `body` in a tag with a one-byte length field.
pub fn tag(id: &[u8], body: &[u8]) -> Vec<u8> {
    assert!(body.len() <= 126, "one-byte length field only");
    let mut out = id.to_vec();
    out.push(0x80 | u8::try_from(body.len()).unwrap());
    out.extend_from_slice(body);
    out
}

/// A minimal EBML (DocType) header tag. Captured verbatim by the engine.
pub fn ebml_header() -> Vec<u8> {
    // EBMLVersion = 1
    tag(&[0x1A, 0x45, 0xDF, 0xA3], &[0x42, 0x86, 0x81, 0x01])
}

/// A Segment open with an indeterminate length spread over `width` bytes.
pub fn segment_open(width: usize) -> Vec<u8> {
    let mut out = vec![0x18, 0x53, 0x80, 0x67];
    match width {
        1 => out.push(0xFF),
        2 => out.extend_from_slice(&[0x7F, 0xFF]),
        3 => out.extend_from_slice(&[0x3F, 0xFF, 0xFF]),
        8 => out.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
        other => panic!("unsupported length width {other}"),
    }
    out
}

/// An Info tag declaring the given timecode scale.
pub fn info(scale: u64) -> Vec<u8> {
    let mut body = vec![0x2A, 0xD7, 0xB1, 0x84];
    body.extend_from_slice(&u32::try_from(scale).unwrap().to_be_bytes());
    tag(&[0x15, 0x49, 0xA9, 0x66], &body)
}

/// An Info tag declaring a 1 ms scale plus a four-byte float Duration.
pub fn info_with_duration() -> Vec<u8> {
    let mut body = vec![0x2A, 0xD7, 0xB1, 0x84];
    body.extend_from_slice(&1_000_000u32.to_be_bytes());
    body.extend_from_slice(&[0x44, 0x89, 0x84]);
    body.extend_from_slice(&4200.0f32.to_be_bytes());
    tag(&[0x15, 0x49, 0xA9, 0x66], &body)
}

/// A video TrackEntry with pixel dimensions.
pub fn track_entry_video(track: u8, width: u16, height: u16) -> Vec<u8> {
    let mut video = tag(&[0xB0], &width.to_be_bytes());
    video.extend(tag(&[0xBA], &height.to_be_bytes()));
    let mut body = tag(&[0xD7], &[track]);
    body.extend(tag(&[0xE0], &video));
    tag(&[0xAE], &body)
}

/// An audio TrackEntry.
pub fn track_entry_audio(track: u8) -> Vec<u8> {
    let mut body = tag(&[0xD7], &[track]);
    body.extend(tag(&[0xE1], &[]));
    tag(&[0xAE], &body)
}

/// A sized Tracks tag holding the given entries.
pub fn tracks(entries: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = entries.concat();
    tag(&[0x16, 0x54, 0xAE, 0x6B], &body)
}

/// A sized Tracks tag holding one video track entry.
pub fn tracks_with_video(track: u8, width: u16, height: u16) -> Vec<u8> {
    tracks(&[track_entry_video(track, width, height)])
}

/// A Cluster open with the canonical indeterminate length.
pub fn cluster_open() -> Vec<u8> {
    vec![0x1F, 0x43, 0xB6, 0x75, 0xFF]
}

/// A cluster Timecode tag with an eight-byte value.
pub fn timecode(value: u64) -> Vec<u8> {
    tag(&[0xE7], &value.to_be_bytes())
}

/// A SimpleBlock for `track` at cluster-relative time `rel`.
pub fn simple_block(track: u8, rel: u16, keyframe: bool, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0x80 | track];
    body.extend_from_slice(&rel.to_be_bytes());
    body.push(if keyframe { 0x80 } else { 0x00 });
    body.extend_from_slice(payload);
    tag(&[0xA3], &body)
}

/// A BlockGroup for `track`; non-keyframes carry a ReferenceBlock.
pub fn block_group(track: u8, rel: u16, keyframe: bool, payload: &[u8]) -> Vec<u8> {
    let mut inner = vec![0x80 | track];
    inner.extend_from_slice(&rel.to_be_bytes());
    inner.push(0x00);
    inner.extend_from_slice(payload);
    let mut body = tag(&[0xA1], &inner);
    if !keyframe {
        body.extend(tag(&[0xFB], &[0x01]));
    }
    tag(&[0xA0], &body)
}

/// The Cluster + Timecode wrapper the engine emits before each block.
pub fn cluster_wrapper(timecode: u64) -> Vec<u8> {
    let mut out = vec![0x1F, 0x43, 0xB6, 0x75, 0xFF, 0xE7, 0x88];
    out.extend_from_slice(&timecode.to_be_bytes());
    out
}

/// A full happy-path stream: header, indeterminate Segment, Info, one video
/// track, one cluster at timecode zero, and one keyframe block.
pub fn happy_path_stream(block_payload: &[u8]) -> Vec<u8> {
    let mut input = ebml_header();
    input.extend(segment_open(8));
    input.extend(info(1_000_000));
    input.extend(tracks_with_video(1, 640, 480));
    input.extend(cluster_open());
    input.extend(timecode(0));
    input.extend(simple_block(1, 0, true, block_payload));
    input
}

/// A bounded viewer sink plus the receiving end for assertions.
pub fn viewer(capacity: usize) -> (Box<dyn ViewerSink>, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Box::new(tx), rx)
}

/// Collects everything currently queued on a viewer channel.
pub fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        chunks.push(chunk);
    }
    chunks
}

/// Flattens drained chunks into one byte stream.
pub fn concat(chunks: &[Bytes]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}
