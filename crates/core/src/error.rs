// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for RelayKit.
//!
//! A hard error poisons the current producer attempt: the engine refuses
//! further writes until the producer resets or reconnects. Viewers are never
//! disconnected by a producer-side error.

use thiserror::Error;

/// Main error type for RelayKit operations.
///
/// Parse-recoverable states ("need more bytes") are not represented here;
/// the extractor signals those with `Ok(None)`. Every variant below is a
/// hard error for the producer attempt that triggered it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayKitError {
    /// The byte stream is not valid EBML.
    ///
    /// Examples:
    /// - A zero first byte where an id or length is expected
    /// - An indeterminate length on a tag that must be sized
    /// - A child tag overrunning its parent's body
    #[error("malformed EBML input")]
    MalformedEbml,

    /// A sized top-level tag claims a body larger than the 1 MiB cap.
    #[error("tag exceeds the maximum accepted size")]
    BlockTooLarge,

    /// The stream declares a timecode scale other than 1 ms.
    #[error("unsupported timecode scale {0} (only 1000000 is accepted)")]
    InvalidTimecodeScale(u64),

    /// A Duration tag spans more bytes than a short Void can cover.
    #[error("duration tag of {0} bytes cannot be voided in place")]
    DurationTooLarge(usize),

    /// A track entry declares a track number outside 0..32.
    #[error("track number {0} exceeds the 32 track limit")]
    TooManyTracks(u64),

    /// A block references a track number outside 0..32.
    #[error("block references invalid track {0}")]
    InvalidTrack(u64),

    /// A block group ended without carrying a block.
    #[error("block group carries no block")]
    BlockGroupMissingBlock,

    /// A tag the relay does not recognize appeared at the top level.
    #[error("unrecognized tag {0:#010x} at the top level")]
    UnknownTag(u32),

    /// A second writer tried to acquire a stream outside its grace window.
    #[error("stream already has a live producer")]
    AlreadyLive,

    /// A previous write failed; the producer must reset or reconnect.
    #[error("producer failed; reset required before further writes")]
    ProducerFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayKitError::InvalidTimecodeScale(5_000_000);
        assert_eq!(err.to_string(), "unsupported timecode scale 5000000 (only 1000000 is accepted)");

        let err = RelayKitError::UnknownTag(0x1C53_BB6B);
        assert_eq!(err.to_string(), "unrecognized tag 0x1c53bb6b at the top level");
    }

    #[test]
    fn test_errors_compare() {
        assert_eq!(RelayKitError::MalformedEbml, RelayKitError::MalformedEbml);
        assert_ne!(RelayKitError::InvalidTrack(3), RelayKitError::InvalidTrack(4));
    }
}
