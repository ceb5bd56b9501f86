// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Matroska/WebM element ids recognized by the relay.
//!
//! Ids keep their leading marker bit, matching how they appear on the wire.
//! Only the subset the relay dispatches on is listed; any other id at the
//! top level is a hard error.

/// EBML header (DocType) tag.
pub const EBML: u32 = 0x1A45_DFA3;

/// Segment container. Children are parsed at the top level.
pub const SEGMENT: u32 = 0x1853_8067;

/// SeekHead index. Dropped: the relay never seeks.
pub const SEEK_HEAD: u32 = 0x114D_9B74;

/// Segment information container.
pub const INFO: u32 = 0x1549_A966;

/// Timecode scale in nanoseconds per tick. Must be 1000000 (1 ms).
pub const TIMECODE_SCALE: u32 = 0x002A_D7B1;

/// Declared stream duration. Voided: live streams have none.
pub const DURATION: u32 = 0x4489;

/// Track definitions container. Children are parsed at the top level.
pub const TRACKS: u32 = 0x1654_AE6B;

/// A single track definition.
pub const TRACK_ENTRY: u32 = 0xAE;

/// Track number within a track entry.
pub const TRACK_NUMBER: u32 = 0xD7;

/// Video settings within a track entry.
pub const VIDEO: u32 = 0xE0;

/// Audio settings within a track entry.
pub const AUDIO: u32 = 0xE1;

/// Pixel width within video settings.
pub const PIXEL_WIDTH: u32 = 0xB0;

/// Pixel height within video settings.
pub const PIXEL_HEIGHT: u32 = 0xBA;

/// Cluster container. Children are parsed at the top level.
pub const CLUSTER: u32 = 0x1F43_B675;

/// Cluster timecode.
pub const TIMECODE: u32 = 0xE7;

/// Size of the previous cluster. Dropped.
pub const PREV_SIZE: u32 = 0xAB;

/// Block with inline keyframe flag.
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Block wrapper carrying reference information.
pub const BLOCK_GROUP: u32 = 0xA0;

/// The block inside a block group.
pub const BLOCK: u32 = 0xA1;

/// Reference to another block; absence (or zero) marks a keyframe.
pub const REFERENCE_BLOCK: u32 = 0xFB;

/// Filler tag.
pub const VOID: u32 = 0xEC;

/// Cueing index. Dropped: the relay never seeks.
pub const CUES: u32 = 0x1C53_BB6B;

/// Chapter definitions. Dropped.
pub const CHAPTERS: u32 = 0x1043_A770;

/// Tagging metadata. Dropped.
pub const TAGS: u32 = 0x1254_C367;
