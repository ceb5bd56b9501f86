// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Default tuning values for the engine and registry.

/// Seconds a closed broadcast lingers before eviction, awaiting a producer
/// reconnection.
pub const DEFAULT_GRACE_TIMEOUT_SECS: u32 = 10;

/// Milliseconds between registry housekeeping ticks.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Track numbers must fit the per-viewer keyframe bitmask.
pub const MAX_TRACKS: u64 = 32;

/// Size of a synthesized Cluster wrapper: four id bytes, the canonical
/// unknown-size byte, the Timecode id, its length byte, and an eight byte
/// timecode.
pub const CLUSTER_WRAPPER_LEN: usize = 15;
