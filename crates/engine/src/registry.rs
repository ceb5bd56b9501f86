// SPDX-FileCopyrightText: © 2025 RelayKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The process-wide name → broadcast map.
//!
//! The registry owns every live [`Broadcast`], enforces producer
//! exclusivity per name, and runs the housekeeping ticker that walks
//! grace windows and evicts abandoned streams. Producers hold a
//! [`WriterHandle`]; dropping it (or calling [`WriterHandle::close`]) arms
//! the broadcast's grace window so a crashed encoder can reconnect without
//! tearing its viewers down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use relaykit_core::Result;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcast;
use crate::config::RegistryConfig;
use crate::metrics::RegistryMetrics;
use crate::viewer::{ViewerId, ViewerSink};

/// Callback invoked with the stream name right before a broadcast is
/// evicted, so higher layers can log or notify.
pub type EvictHook = Box<dyn Fn(&str) + Send + Sync>;

struct RegistryInner {
    broadcasts: Mutex<HashMap<String, Arc<Broadcast>>>,
    config: RegistryConfig,
    evict_hook: Option<EvictHook>,
    cancel: CancellationToken,
    metrics: RegistryMetrics,
}

impl RegistryInner {
    // Mutex poisoning is a fatal error - allows expect() for this common pattern
    #[allow(clippy::expect_used)]
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Broadcast>>> {
        self.broadcasts.lock().expect("registry map mutex poisoned")
    }
}

/// Name → broadcast lookup with producer exclusivity and idle eviction.
///
/// Must be created inside a tokio runtime: construction spawns the
/// housekeeping ticker. Dropping the registry stops the ticker.
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates a registry and starts its housekeeping ticker.
    pub fn new(config: RegistryConfig) -> Self {
        Self::build(config, None)
    }

    /// Like [`new`](Self::new), with a callback fired before each eviction.
    pub fn with_eviction_hook(config: RegistryConfig, hook: EvictHook) -> Self {
        Self::build(config, Some(hook))
    }

    fn build(config: RegistryConfig, evict_hook: Option<EvictHook>) -> Self {
        let inner = Arc::new(RegistryInner {
            broadcasts: Mutex::new(HashMap::new()),
            config,
            evict_hook,
            cancel: CancellationToken::new(),
            metrics: RegistryMetrics::new(),
        });
        tokio::spawn(Self::run_ticker(Arc::clone(&inner)));
        Self { inner }
    }

    async fn run_ticker(inner: Arc<RegistryInner>) {
        let period = Duration::from_millis(inner.config.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                _ = interval.tick() => Self::sweep(&inner),
            }
        }
        tracing::debug!("registry ticker stopped");
    }

    /// Walks grace countdowns and evicts elapsed broadcasts.
    fn sweep(inner: &RegistryInner) {
        let expiring: Vec<(String, Arc<Broadcast>)> = {
            let map = inner.map();
            map.iter()
                .filter(|(_, broadcast)| broadcast.tick())
                .map(|(name, broadcast)| (name.clone(), Arc::clone(broadcast)))
                .collect()
        };
        for (name, broadcast) in expiring {
            if let Some(hook) = &inner.evict_hook {
                hook(&name);
            }
            // Re-checked under the broadcast lock: a producer may have
            // reconnected since the grace check.
            let mut map = inner.map();
            if broadcast.finalize_if_idle() {
                map.remove(&name);
                inner.metrics.record_broadcasts(map.len());
                tracing::info!("evicted broadcast {name}");
            }
        }
    }

    /// Claims exclusive producer access to `name`, creating the broadcast on
    /// first use. A broadcast inside its grace window is reused: viewers
    /// keep their subscriptions and the duplicate stream header the
    /// reconnecting encoder sends is dropped.
    ///
    /// # Errors
    ///
    /// [`relaykit_core::RelayKitError::AlreadyLive`] when another producer
    /// holds the name outside its grace window.
    pub fn acquire_writer(&self, name: &str) -> Result<WriterHandle> {
        let broadcast = {
            let mut map = self.inner.map();
            let broadcast = map.entry(name.to_string()).or_insert_with(|| {
                tracing::info!("creating broadcast {name}");
                Arc::new(Broadcast::with_name(name, self.inner.config.grace_ticks()))
            });
            let broadcast = Arc::clone(broadcast);
            self.inner.metrics.record_broadcasts(map.len());
            broadcast
        };
        broadcast.attach_writer()?;
        Ok(WriterHandle { broadcast, released: false })
    }

    /// Looks up a broadcast for viewing.
    pub fn open_reader(&self, name: &str) -> Option<ReaderHandle> {
        let map = self.inner.map();
        map.get(name).map(|broadcast| ReaderHandle { broadcast: Arc::clone(broadcast) })
    }

    /// Names of all currently registered broadcasts.
    pub fn names(&self) -> Vec<String> {
        self.inner.map().keys().cloned().collect()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Exclusive producer access to one broadcast.
///
/// Dropping the handle detaches the producer and arms the grace window.
pub struct WriterHandle {
    broadcast: Arc<Broadcast>,
    released: bool,
}

impl WriterHandle {
    /// Feeds producer bytes to the broadcast.
    ///
    /// # Errors
    ///
    /// Propagates the engine's parse and validation errors; see
    /// [`Broadcast::write`].
    pub fn write(&self, chunk: &[u8]) -> Result<usize> {
        self.broadcast.write(chunk)
    }

    /// Drops buffered partial input after a producer-side restart.
    pub fn reset(&self) {
        self.broadcast.reset();
    }

    /// The broadcast this handle feeds, for observables.
    pub fn broadcast(&self) -> &Broadcast {
        &self.broadcast
    }

    /// Ends this producer attempt and arms the grace window.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.broadcast.close();
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Viewer-side access to one broadcast.
pub struct ReaderHandle {
    broadcast: Arc<Broadcast>,
}

impl ReaderHandle {
    /// Subscribes a sink; see [`Broadcast::connect`].
    pub fn connect(&self, sink: Box<dyn ViewerSink>, skip_headers: bool) -> ViewerId {
        self.broadcast.connect(sink, skip_headers)
    }

    /// Removes a viewer; its sink receives the end-of-stream chunk.
    pub fn disconnect(&self, id: ViewerId) {
        self.broadcast.disconnect(id);
    }

    /// The underlying broadcast, for observables.
    pub fn broadcast(&self) -> &Broadcast {
        &self.broadcast
    }
}
