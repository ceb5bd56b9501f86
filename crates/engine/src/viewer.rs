// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-viewer delivery state and the sink seam.
//!
//! A viewer walks, per track, through three states: awaiting headers,
//! awaiting a keyframe, streaming. The states are encoded in two bits and a
//! bitmask rather than an enum because the producer pipeline flips them on
//! every block. A slow viewer is degraded (blocks skipped, resynchronized at
//! the next keyframe), never a source of producer backpressure.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Where viewer chunks go.
///
/// Implementations must not block: the producer pipeline calls this under
/// the broadcast lock. Returning `false` (full or gone) makes the engine
/// skip the current chunk for this viewer and resynchronize later.
///
/// An empty chunk is the end-of-stream signal.
pub trait ViewerSink: Send {
    /// Queue a chunk without blocking.
    fn try_send(&self, chunk: Bytes) -> bool;
}

/// The standard sink: a bounded tokio channel. A full or closed channel
/// reports `false`, which is exactly the degraded-viewer signal.
impl ViewerSink for mpsc::Sender<Bytes> {
    fn try_send(&self, chunk: Bytes) -> bool {
        mpsc::Sender::try_send(self, chunk).is_ok()
    }
}

/// Opaque handle identifying one subscription to a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(pub(crate) u64);

/// Delivery state for one viewer.
pub(crate) struct ViewerState {
    pub(crate) sink: Box<dyn ViewerSink>,
    /// Once true, headers and tracks are not resent on subsequent blocks.
    pub(crate) skip_headers: bool,
    /// True while the previously sent block shares the current cluster's
    /// timecode, so no new Cluster wrapper is needed.
    pub(crate) skip_cluster: bool,
    /// Bitmask of tracks for which a keyframe has been delivered.
    pub(crate) seen_keyframes: u32,
}

impl ViewerState {
    pub(crate) fn new(sink: Box<dyn ViewerSink>, skip_headers: bool) -> Self {
        Self { sink, skip_headers, skip_cluster: false, seen_keyframes: 0 }
    }

    /// Forget header delivery, forcing headers, tracks, and a fresh keyframe
    /// wait on the next eligible block. Used when a new Segment replaces the
    /// track definitions mid-stream.
    pub(crate) fn restart(&mut self) {
        self.skip_headers = false;
        self.skip_cluster = false;
        self.seen_keyframes = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bounded_channel_reports_fullness() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);
        assert!(ViewerSink::try_send(&tx, Bytes::from_static(b"a")));
        assert!(!ViewerSink::try_send(&tx, Bytes::from_static(b"b")));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
        assert!(ViewerSink::try_send(&tx, Bytes::from_static(b"b")));
    }

    #[test]
    fn closed_channel_reports_failure() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(rx);
        assert!(!ViewerSink::try_send(&tx, Bytes::new()));
    }

    #[test]
    fn restart_clears_delivery_state() {
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        let mut viewer = ViewerState::new(Box::new(tx), true);
        viewer.skip_cluster = true;
        viewer.seen_keyframes = 0b101;
        viewer.restart();
        assert!(!viewer.skip_headers);
        assert!(!viewer.skip_cluster);
        assert_eq!(viewer.seen_keyframes, 0);
    }
}
