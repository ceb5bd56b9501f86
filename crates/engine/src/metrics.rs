// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Telemetry for the fan-out path and the registry.
//!
//! Labels are pre-built once per broadcast so the per-block hot path never
//! allocates.

use opentelemetry::metrics::{Counter, Gauge};
use opentelemetry::KeyValue;

/// Per-broadcast fan-out counters.
pub(crate) struct BroadcastMetrics {
    /// Blocks successfully delivered to a viewer (wrapper plus body).
    blocks_distributed: Counter<u64>,
    /// Blocks skipped for a viewer: sink full, headers pending, or keyframe
    /// gating.
    blocks_dropped: Counter<u64>,
    /// Currently connected viewers.
    viewers_active: Gauge<u64>,
    labels: [KeyValue; 1],
}

impl BroadcastMetrics {
    pub(crate) fn new(stream: &str) -> Self {
        let meter = opentelemetry::global::meter("relaykit_engine");
        let blocks_distributed = meter
            .u64_counter("broadcast.blocks_distributed")
            .with_description("Number of blocks successfully delivered to viewers")
            .build();
        let blocks_dropped = meter
            .u64_counter("broadcast.blocks_dropped")
            .with_description("Number of blocks skipped for slow or unsynchronized viewers")
            .build();
        let viewers_active = meter
            .u64_gauge("broadcast.viewers_active")
            .with_description("Number of currently connected viewers")
            .build();

        let labels = [KeyValue::new("stream", stream.to_string())];
        viewers_active.record(0, &labels);

        Self { blocks_distributed, blocks_dropped, viewers_active, labels }
    }

    pub(crate) fn record_dispatch(&self, distributed: u64, dropped: u64) {
        if distributed > 0 {
            self.blocks_distributed.add(distributed, &self.labels);
        }
        if dropped > 0 {
            self.blocks_dropped.add(dropped, &self.labels);
        }
    }

    pub(crate) fn record_viewers(&self, count: usize) {
        self.viewers_active.record(count as u64, &self.labels);
    }
}

/// Registry-wide gauges.
pub(crate) struct RegistryMetrics {
    broadcasts_active: Gauge<u64>,
}

impl RegistryMetrics {
    pub(crate) fn new() -> Self {
        let meter = opentelemetry::global::meter("relaykit_engine");
        let broadcasts_active = meter
            .u64_gauge("registry.broadcasts_active")
            .with_description("Number of broadcasts currently registered")
            .build();
        Self { broadcasts_active }
    }

    pub(crate) fn record_broadcasts(&self, count: usize) {
        self.broadcasts_active.record(count as u64, &[]);
    }
}
