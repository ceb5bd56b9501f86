// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Registry configuration.
//!
//! Deserializable with any serde format the embedding server uses for its
//! own configuration; every field has a default so an empty document is a
//! valid config.

use serde::Deserialize;

use crate::constants::{DEFAULT_GRACE_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_MS};

/// Tuning for the broadcast registry and its housekeeping ticker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Seconds a closed broadcast lingers awaiting producer reconnection.
    pub grace_timeout_secs: u32,
    /// Milliseconds between housekeeping ticks.
    pub tick_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_timeout_secs: DEFAULT_GRACE_TIMEOUT_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl RegistryConfig {
    /// Grace window expressed in housekeeping ticks, never less than one.
    pub fn grace_ticks(&self) -> u32 {
        let ms = u64::from(self.grace_timeout_secs) * 1_000;
        #[allow(clippy::cast_possible_truncation)]
        {
            (ms / self.tick_interval_ms.max(1)).max(1) as u32
        }
    }
}
