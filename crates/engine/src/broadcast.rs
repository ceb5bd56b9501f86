// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One live stream: producer pipeline, rewrite state, and viewer fan-out.
//!
//! A [`Broadcast`] consumes the producer's WebM bytes incrementally,
//! captures the stream header and track definitions, rewrites what live
//! playback requires (no duration, canonical unknown sizes, monotonic
//! cluster timecodes), and distributes each block to every viewer whose
//! delivery state permits it. The producer never waits on a viewer: sinks
//! are fed with non-blocking sends, and a full sink degrades that viewer
//! until the next keyframe on the affected track.
//!
//! All mutable state sits behind one coarse mutex. The producer is the only
//! writer of the parse and cache state; viewer bookkeeping shares the same
//! lock so fan-out iteration and connect/disconnect serialize.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use relaykit_core::ebml::{self, Tag, TagSpan};
use relaykit_core::{ids, RelayKitError, Result};

use crate::config::RegistryConfig;
use crate::constants::{CLUSTER_WRAPPER_LEN, MAX_TRACKS};
use crate::metrics::BroadcastMetrics;
use crate::viewer::{ViewerId, ViewerSink, ViewerState};

/// Timecode bookkeeping, all in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
struct TimeState {
    /// Highest timecode ever emitted. Never decreases.
    last: u64,
    /// Current cluster timecode on the shifted timeline.
    recv: u64,
    /// Relative timecode of the previously dispatched block.
    sent: u64,
    /// Correction added to received timecodes to keep output monotonic.
    shift: u64,
}

struct BroadcastState {
    closed: bool,
    /// Remaining grace ticks once the producer has detached.
    closing: Option<u32>,
    writer_attached: bool,
    producer_failed: bool,

    has_video: bool,
    has_audio: bool,
    width: u32,
    height: u32,

    /// The entire EBML (DocType) tag, captured once per stream lifetime.
    header: Bytes,
    /// Segment open + Info + Tracks accumulation for the current epoch.
    /// Replaced wholesale on every append: sinks may still hold the old blob.
    tracks: Bytes,
    /// Unparsed tail of producer input.
    buffer: BytesMut,

    time: TimeState,

    viewers: HashMap<ViewerId, ViewerState>,
    next_viewer: u64,
}

/// One named live stream.
pub struct Broadcast {
    name: String,
    grace_ticks: u32,
    state: Mutex<BroadcastState>,
    metrics: BroadcastMetrics,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcast {
    /// Creates an unnamed broadcast with default grace tuning.
    pub fn new() -> Self {
        Self::with_name("broadcast", RegistryConfig::default().grace_ticks())
    }

    /// Creates a named broadcast whose grace window lasts `grace_ticks`
    /// registry ticks.
    pub fn with_name(name: &str, grace_ticks: u32) -> Self {
        Self {
            name: name.to_string(),
            grace_ticks,
            state: Mutex::new(BroadcastState {
                closed: false,
                closing: None,
                writer_attached: false,
                producer_failed: false,
                has_video: false,
                has_audio: false,
                width: 0,
                height: 0,
                header: Bytes::new(),
                tracks: Bytes::new(),
                buffer: BytesMut::new(),
                time: TimeState::default(),
                viewers: HashMap::new(),
                next_viewer: 0,
            }),
            metrics: BroadcastMetrics::new(name),
        }
    }

    // Mutex poisoning is a fatal error - allows expect() for this common pattern
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state.lock().expect("broadcast state mutex poisoned")
    }

    /// Consumes a chunk of producer input.
    ///
    /// On success the whole chunk is consumed, wherever tag boundaries fall.
    /// A hard error poisons this producer attempt: further writes fail until
    /// [`reset`](Self::reset) or a writer reconnection.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation error that terminated this producer,
    /// or [`RelayKitError::ProducerFailed`] once poisoned.
    pub fn write(&self, chunk: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        if state.closed || state.producer_failed {
            return Err(RelayKitError::ProducerFailed);
        }
        state.buffer.extend_from_slice(chunk);
        loop {
            let span = match ebml::next_tag(&state.buffer) {
                Ok(Some(span)) => span,
                Ok(None) => break,
                Err(err) => {
                    state.producer_failed = true;
                    tracing::warn!("producer for {} failed: {err}", self.name);
                    return Err(err);
                },
            };
            match state.dispatch(span) {
                Ok(Some((distributed, dropped))) => {
                    self.metrics.record_dispatch(distributed, dropped);
                },
                Ok(None) => {},
                Err(err) => {
                    state.producer_failed = true;
                    tracing::warn!("producer for {} failed: {err}", self.name);
                    return Err(err);
                },
            }
        }
        Ok(chunk.len())
    }

    /// Discards buffered partial input and clears the poisoned flag. Used
    /// when a producer reconnects and restarts its stream from a tag
    /// boundary.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.producer_failed = false;
    }

    /// Detaches the producer and arms the grace window. Viewers keep their
    /// subscriptions; if no producer reacquires the stream before the grace
    /// elapses, the registry finalizes it.
    pub fn close(&self) {
        let mut state = self.lock();
        state.writer_attached = false;
        if !state.closed && state.closing.is_none() {
            state.closing = Some(self.grace_ticks);
            tracing::debug!("{}: grace window armed ({} ticks)", self.name, self.grace_ticks);
        }
    }

    /// Subscribes a sink to this broadcast.
    ///
    /// `skip_headers` lets a viewer migrated from another broadcast with
    /// identical track definitions avoid a redundant header delivery.
    pub fn connect(&self, sink: Box<dyn ViewerSink>, skip_headers: bool) -> ViewerId {
        let mut state = self.lock();
        let id = ViewerId(state.next_viewer);
        state.next_viewer += 1;
        if state.closed {
            sink.try_send(Bytes::new());
            return id;
        }
        state.viewers.insert(id, ViewerState::new(sink, skip_headers));
        self.metrics.record_viewers(state.viewers.len());
        tracing::debug!("{}: viewer {id:?} connected (skip_headers={skip_headers})", self.name);
        id
    }

    /// Removes a viewer. Its sink receives the end-of-stream chunk and is
    /// dropped.
    pub fn disconnect(&self, id: ViewerId) {
        let mut state = self.lock();
        if let Some(viewer) = state.viewers.remove(&id) {
            viewer.sink.try_send(Bytes::new());
            self.metrics.record_viewers(state.viewers.len());
            tracing::debug!("{}: viewer {id:?} disconnected", self.name);
        }
    }

    /// Whether the broadcast has been finalized and evicted.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether the current segment declares a video track.
    pub fn has_video(&self) -> bool {
        self.lock().has_video
    }

    /// Whether the current segment declares an audio track.
    pub fn has_audio(&self) -> bool {
        self.lock().has_audio
    }

    /// Video width in pixels, zero until a video track is seen.
    pub fn width(&self) -> u32 {
        self.lock().width
    }

    /// Video height in pixels, zero until a video track is seen.
    pub fn height(&self) -> u32 {
        self.lock().height
    }

    /// Claims producer exclusivity, reusing a broadcast inside its grace
    /// window. Residual partial input from the previous attempt is dropped.
    pub(crate) fn attach_writer(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed || state.writer_attached {
            return Err(RelayKitError::AlreadyLive);
        }
        if state.closing.take().is_some() {
            tracing::debug!("{}: producer reconnected within grace", self.name);
        }
        state.writer_attached = true;
        state.producer_failed = false;
        state.buffer.clear();
        Ok(())
    }

    /// Advances the grace countdown by one registry tick. Returns true when
    /// the window has elapsed.
    pub(crate) fn tick(&self) -> bool {
        let mut state = self.lock();
        match state.closing {
            Some(remaining) if remaining <= 1 => {
                state.closing = Some(0);
                true
            },
            Some(remaining) => {
                state.closing = Some(remaining - 1);
                false
            },
            None => false,
        }
    }

    /// Finalizes the broadcast unless a producer reconnected since the grace
    /// check. Every viewer receives the end-of-stream chunk and is dropped.
    pub(crate) fn finalize_if_idle(&self) -> bool {
        let mut state = self.lock();
        if state.writer_attached || state.closing.is_none() {
            return false;
        }
        state.closed = true;
        state.closing = None;
        for (_, viewer) in state.viewers.drain() {
            viewer.sink.try_send(Bytes::new());
        }
        self.metrics.record_viewers(0);
        tracing::info!("{}: broadcast finalized", self.name);
        true
    }
}

impl BroadcastState {
    /// Routes one extracted tag. Returns fan-out counts for block tags.
    fn dispatch(&mut self, span: TagSpan) -> Result<Option<(u64, u64)>> {
        let tag = span.tag;
        match tag.id {
            // No seeking and no buffered past: drop indexes and filler.
            ids::SEEK_HEAD | ids::CHAPTERS | ids::CUES | ids::VOID | ids::TAGS
            | ids::PREV_SIZE => {
                self.buffer.advance(span.len);
            },
            ids::EBML => {
                let data = self.buffer.split_to(span.len).freeze();
                if self.header.is_empty() {
                    tracing::debug!("captured {} byte stream header", data.len());
                    self.header = data;
                }
                // Duplicates from reconnecting producers are dropped.
            },
            ids::SEGMENT => {
                if tag.is_unknown_size() {
                    ebml::canonicalize_unknown_size(&mut self.buffer[..span.len], &tag);
                }
                let open = self.buffer.split_to(span.len).freeze();
                self.begin_segment(open);
            },
            ids::INFO => {
                let mut data = self.buffer.split_to(span.len);
                rewrite_info(&mut data[tag.header_len..])?;
                self.append_tracks(&data);
            },
            ids::TRACKS => {
                if tag.is_unknown_size() {
                    ebml::canonicalize_unknown_size(&mut self.buffer[..span.len], &tag);
                }
                let data = self.buffer.split_to(span.len);
                self.append_tracks(&data);
            },
            ids::TRACK_ENTRY => {
                let data = self.buffer.split_to(span.len);
                self.scan_track_entry(&data[tag.header_len..])?;
                self.append_tracks(&data);
            },
            ids::CLUSTER => {
                // A marker only: the engine wraps each block in its own
                // synthesized cluster.
                self.buffer.advance(span.len);
            },
            ids::TIMECODE => {
                let data = self.buffer.split_to(span.len);
                let value = ebml::read_uint(&data[tag.header_len..])?;
                self.time.recv = value + self.time.shift;
            },
            ids::SIMPLE_BLOCK | ids::BLOCK_GROUP => {
                let data = self.buffer.split_to(span.len).freeze();
                return self.dispatch_block(&tag, data).map(Some);
            },
            other => return Err(RelayKitError::UnknownTag(other)),
        }
        Ok(None)
    }

    /// A new Segment resets derived metadata, restarts the track cache with
    /// the (canonicalized) Segment open bytes, and forces every viewer back
    /// through header delivery and keyframe gating.
    fn begin_segment(&mut self, open: Bytes) {
        tracing::debug!("new segment: resetting track metadata and timecode shift");
        self.has_video = false;
        self.has_audio = false;
        self.width = 0;
        self.height = 0;
        self.time.shift = 0;
        self.tracks = open;
        for viewer in self.viewers.values_mut() {
            viewer.restart();
        }
    }

    /// Publishes a new track-cache blob. The old blob stays valid for any
    /// sink still reading it.
    fn append_tracks(&mut self, chunk: &[u8]) {
        let mut next = BytesMut::with_capacity(self.tracks.len() + chunk.len());
        next.extend_from_slice(&self.tracks);
        next.extend_from_slice(chunk);
        self.tracks = next.freeze();
    }

    /// Walks a TrackEntry body for the metadata the relay exposes.
    fn scan_track_entry(&mut self, body: &[u8]) -> Result<()> {
        let mut off = 0;
        while off < body.len() {
            let (child, total) = sized_child(&body[off..])?;
            let payload = &body[off + child.header_len..off + total];
            match child.id {
                ids::TRACK_NUMBER => {
                    let track = ebml::read_uint(payload)?;
                    if track >= MAX_TRACKS {
                        return Err(RelayKitError::TooManyTracks(track));
                    }
                },
                ids::AUDIO => self.has_audio = true,
                ids::VIDEO => {
                    self.has_video = true;
                    self.scan_video(payload)?;
                },
                _ => {},
            }
            off += total;
        }
        Ok(())
    }

    fn scan_video(&mut self, body: &[u8]) -> Result<()> {
        let mut off = 0;
        while off < body.len() {
            let (child, total) = sized_child(&body[off..])?;
            let payload = &body[off + child.header_len..off + total];
            match child.id {
                ids::PIXEL_WIDTH => {
                    self.width = u32::try_from(ebml::read_uint(payload)?)
                        .map_err(|_| RelayKitError::MalformedEbml)?;
                },
                ids::PIXEL_HEIGHT => {
                    self.height = u32::try_from(ebml::read_uint(payload)?)
                        .map_err(|_| RelayKitError::MalformedEbml)?;
                },
                _ => {},
            }
            off += total;
        }
        Ok(())
    }

    /// Rewrites one block tag's timing and fans it out.
    ///
    /// Returns `(distributed, dropped)` viewer counts.
    #[allow(clippy::cognitive_complexity)] // Fan-out with per-viewer gating requires multiple paths
    fn dispatch_block(&mut self, tag: &Tag, data: Bytes) -> Result<(u64, u64)> {
        let block = parse_block(tag, &data)?;
        let rel = u64::from(block.rel);

        // Output timecodes never regress, across segments and producer
        // restarts alike: push the received timeline forward instead.
        let mut timecode = self.time.recv + rel;
        if timecode < self.time.last {
            self.time.shift += self.time.last - timecode;
            self.time.recv = self.time.last - rel;
            timecode = self.time.last;
            tracing::debug!("timecode regression: shift raised to {}", self.time.shift);
        }
        self.time.last = timecode;

        let wrapper = cluster_wrapper(self.time.recv);
        let header = self.header.clone();
        let tracks = self.tracks.clone();
        let prev_sent = self.time.sent;
        #[allow(clippy::cast_possible_truncation)]
        let track_bit = 1u32 << (block.track as u32);

        let mut distributed = 0u64;
        let mut dropped = 0u64;

        for viewer in self.viewers.values_mut() {
            if !viewer.skip_headers {
                // Nothing to start a decoder with until both caches exist.
                if header.is_empty() || tracks.is_empty() {
                    dropped += 1;
                    continue;
                }
                if !viewer.sink.try_send(header.clone()) || !viewer.sink.try_send(tracks.clone())
                {
                    // Retried wholesale on the next block.
                    dropped += 1;
                    continue;
                }
                viewer.skip_headers = true;
                viewer.skip_cluster = false;
            }
            if block.keyframe {
                viewer.seen_keyframes |= track_bit;
            }
            if viewer.seen_keyframes & track_bit == 0 {
                dropped += 1;
                continue;
            }
            if !viewer.skip_cluster || rel != prev_sent {
                viewer.skip_cluster = viewer.sink.try_send(wrapper.clone());
            }
            if viewer.skip_cluster && viewer.sink.try_send(data.clone()) {
                distributed += 1;
            } else {
                // Degraded: this track resynchronizes at its next keyframe.
                viewer.seen_keyframes &= !track_bit;
                dropped += 1;
            }
        }
        self.time.sent = rel;
        Ok((distributed, dropped))
    }
}

/// Parsed timing facts of one block-carrying tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockFacts {
    track: u64,
    rel: u16,
    keyframe: bool,
}

/// Parses a child tag that must be fully contained in `body`.
fn sized_child(body: &[u8]) -> Result<(Tag, usize)> {
    let child = Tag::parse(body)?.ok_or(RelayKitError::MalformedEbml)?;
    if child.is_unknown_size() {
        return Err(RelayKitError::MalformedEbml);
    }
    let total = child.header_len + child.size as usize;
    if total > body.len() {
        return Err(RelayKitError::MalformedEbml);
    }
    Ok((child, total))
}

/// Validates an Info body: the timecode scale must be 1 ms, and any declared
/// Duration is blanked with a Void of identical span (live streams have no
/// duration). Byte count is preserved.
fn rewrite_info(body: &mut [u8]) -> Result<()> {
    let mut off = 0;
    while off < body.len() {
        let (child, total) = sized_child(&body[off..])?;
        match child.id {
            ids::TIMECODE_SCALE => {
                let scale = ebml::read_uint(&body[off + child.header_len..off + total])?;
                if scale != 1_000_000 {
                    return Err(RelayKitError::InvalidTimecodeScale(scale));
                }
            },
            ids::DURATION => {
                let span =
                    u8::try_from(total).map_err(|_| RelayKitError::DurationTooLarge(total))?;
                if span > 0x80 {
                    return Err(RelayKitError::DurationTooLarge(total));
                }
                body[off] = 0xEC; // Void
                body[off + 1] = 0x80 | (span - 2);
                tracing::debug!("voided {total} byte duration tag");
            },
            _ => {},
        }
        off += total;
    }
    Ok(())
}

/// Extracts track, relative timecode, and keyframe flag from a SimpleBlock
/// or BlockGroup tag.
fn parse_block(tag: &Tag, data: &[u8]) -> Result<BlockFacts> {
    let body = &data[tag.header_len..];
    match tag.id {
        ids::SIMPLE_BLOCK => parse_block_payload(body, None),
        ids::BLOCK_GROUP => {
            let mut payload: Option<&[u8]> = None;
            let mut referenced = false;
            let mut off = 0;
            while off < body.len() {
                let (child, total) = sized_child(&body[off..])?;
                match child.id {
                    ids::BLOCK => payload = Some(&body[off + child.header_len..off + total]),
                    ids::REFERENCE_BLOCK => {
                        if ebml::read_uint(&body[off + child.header_len..off + total])? != 0 {
                            referenced = true;
                        }
                    },
                    _ => {},
                }
                off += total;
            }
            let payload = payload.ok_or(RelayKitError::BlockGroupMissingBlock)?;
            // A group block is a keyframe exactly when nothing references
            // another block.
            parse_block_payload(payload, Some(!referenced))
        },
        _ => Err(RelayKitError::MalformedEbml),
    }
}

fn parse_block_payload(payload: &[u8], group_keyframe: Option<bool>) -> Result<BlockFacts> {
    let Some((track, track_len)) = ebml::read_vint(payload)? else {
        return Err(RelayKitError::MalformedEbml);
    };
    if track >= MAX_TRACKS {
        return Err(RelayKitError::InvalidTrack(track));
    }
    let Some(&flags) = payload.get(track_len + 2) else {
        return Err(RelayKitError::MalformedEbml);
    };
    // Block timecodes are read as unsigned; negative offsets are not
    // supported.
    let rel = u16::from_be_bytes([payload[track_len], payload[track_len + 1]]);
    let keyframe = group_keyframe.unwrap_or(flags & 0x80 != 0);
    Ok(BlockFacts { track, rel, keyframe })
}

/// Builds the 15-byte Cluster + Timecode wrapper emitted before each block.
fn cluster_wrapper(timecode: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(CLUSTER_WRAPPER_LEN);
    ebml::put_id(&mut buf, ids::CLUSTER);
    buf.put_u8(0xFF); // canonical unknown size
    ebml::put_id(&mut buf, ids::TIMECODE);
    buf.put_u8(0x88); // eight byte timecode
    ebml::put_uint(&mut buf, timecode, 8);
    debug_assert_eq!(buf.len(), CLUSTER_WRAPPER_LEN);
    buf.freeze()
}
