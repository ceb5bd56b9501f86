// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RelayKit Engine - live WebM broadcasting without a buffer of the past.
//!
//! One producer pushes an unbounded WebM stream into a named broadcast;
//! any number of viewers subscribe and receive a rewritten stream that
//! ordinary media players accept: headers first, every first block per
//! track a keyframe, cluster timecodes monotonic for the whole lifetime of
//! the stream, no declared duration.
//!
//! ## Modules
//!
//! - [`broadcast`]: per-stream parse, rewrite, and fan-out engine
//! - [`viewer`]: the sink seam and per-viewer delivery state
//! - [`registry`]: name → broadcast map, producer exclusivity, idle
//!   eviction with a reconnect grace window
//! - [`config`]: registry tuning
//! - [`constants`]: default tuning values
//!
//! ## Quick start
//!
//! ```ignore
//! use relaykit_engine::{Registry, RegistryConfig};
//! use tokio::sync::mpsc;
//!
//! let registry = Registry::new(RegistryConfig::default());
//!
//! // Producer side (one per stream name):
//! let writer = registry.acquire_writer("studio-a")?;
//! writer.write(&incoming_chunk)?;
//!
//! // Viewer side:
//! let reader = registry.open_reader("studio-a").unwrap();
//! let (tx, mut rx) = mpsc::channel(64);
//! let viewer = reader.connect(Box::new(tx), false);
//! // rx yields ready-to-serve WebM chunks; an empty chunk is EOF.
//! ```

pub mod broadcast;
pub mod config;
pub mod constants;
mod metrics;
pub mod registry;
pub mod viewer;

// Convenience re-exports for the types embedding servers touch.
pub use broadcast::Broadcast;
pub use config::RegistryConfig;
pub use registry::{EvictHook, ReaderHandle, Registry, WriterHandle};
pub use relaykit_core::RelayKitError;
pub use viewer::{ViewerId, ViewerSink};
