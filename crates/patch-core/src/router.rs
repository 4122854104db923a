//! Router: the central event loop
//!
//! Owns the mapping table, descriptor registry, event queue, and backend
//! instances, and drives the single-threaded processing cycle: wait for
//! descriptor readiness, dispatch input to backends, then drain the event
//! queue (including any cascades the drain itself produces) to quiescence
//! before waiting again.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::backend::{Backend, RouterCtx};
use crate::channel::{BackendId, ChannelEvent, ChannelId, ChannelValue};
use crate::error::RouterError;
use crate::mapping::MappingTable;
use crate::multiplex::Multiplexer;
use crate::queue::EventQueue;
use crate::registry::{FdRegistry, ManagedFd};

/// Cooperative shutdown flag
///
/// Cloned into signal handlers and observed by the router once per loop
/// iteration; setting it is the only work allowed in signal context.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative shutdown
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying atomic, for signal-handler registration
    pub fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Wait timeout used when no backend requests a poll interval
    pub idle_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1),
        }
    }
}

/// Lifecycle state of the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Processing events
    Running,
    /// Torn down; terminal
    Stopped,
}

struct BackendEntry {
    name: String,
    backend: Box<dyn Backend>,
}

/// The routing core
pub struct Router {
    config: RouterConfig,
    backends: Vec<BackendEntry>,
    map: MappingTable,
    registry: FdRegistry,
    events: EventQueue,
    shutdown: ShutdownFlag,
    state: RouterState,
    torn_down: bool,
}

impl Router {
    /// Create a router with default configuration
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            backends: Vec::new(),
            map: MappingTable::new(),
            registry: FdRegistry::new(),
            events: EventQueue::new(),
            shutdown: ShutdownFlag::new(),
            state: RouterState::Running,
            torn_down: false,
        }
    }

    /// Register a backend instance under a unique name
    pub fn add_backend(&mut self, name: impl Into<String>, backend: Box<dyn Backend>) -> BackendId {
        let name = name.into();
        let id = BackendId(self.backends.len() as u32);
        info!(backend = %name, id = id.0, "registered backend instance");
        self.backends.push(BackendEntry { name, backend });
        id
    }

    /// Resolve a backend instance by name
    pub fn backend_id(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|entry| entry.name == name)
            .map(|idx| BackendId(idx as u32))
    }

    /// Resolve a channel specification against a named backend
    pub fn channel(&mut self, backend: &str, spec: &str) -> Result<ChannelId, RouterError> {
        let id = self
            .backend_id(backend)
            .ok_or_else(|| RouterError::UnknownBackend(backend.to_string()))?;
        let entry = &mut self.backends[id.0 as usize];
        let token = entry
            .backend
            .channel(spec)
            .map_err(|source| RouterError::InvalidChannel {
                backend: entry.name.clone(),
                source,
            })?;
        Ok(ChannelId::new(id, token))
    }

    /// Add a mapping edge from `from` to `to`
    pub fn map_channel(&mut self, from: ChannelId, to: ChannelId) -> Result<(), RouterError> {
        self.map.map_channel(from, to)
    }

    /// Register or unregister a descriptor on behalf of a named backend
    pub fn manage_fd(
        &mut self,
        fd: RawFd,
        backend: &str,
        manage: bool,
        token: u64,
    ) -> Result<(), RouterError> {
        let id = self
            .backend_id(backend)
            .ok_or_else(|| RouterError::UnknownBackend(backend.to_string()))?;
        self.registry.manage(fd, id, manage, token)
    }

    /// Submit a channel event for propagation
    ///
    /// Expands the source through the mapping table; an event on an unmapped
    /// channel is a no-op (sink-only channel).
    pub fn channel_event(
        &mut self,
        channel: ChannelId,
        value: ChannelValue,
    ) -> Result<(), RouterError> {
        let Self { map, events, .. } = self;
        events.enqueue(map.lookup(channel), value)
    }

    /// The shutdown flag observed by the event loop
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Number of mapped source channels
    pub fn mapping_count(&self) -> usize {
        self.map.len()
    }

    /// Number of managed descriptors
    pub fn descriptor_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Number of events pending in the active buffer
    pub fn pending_events(&self) -> usize {
        self.events.pending()
    }

    /// Start all backend instances
    pub fn start(&mut self) -> Result<(), RouterError> {
        info!("starting {} backend instances", self.backends.len());
        let Self {
            backends,
            map,
            events,
            registry,
            ..
        } = self;
        for (idx, entry) in backends.iter_mut().enumerate() {
            let mut ctx = RouterCtx::new(BackendId(idx as u32), map, events, registry);
            entry
                .backend
                .start(&mut ctx)
                .map_err(|source| RouterError::BackendStart {
                    backend: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Run the event loop until shutdown is requested or a fatal error
    /// occurs, then tear down in order
    ///
    /// Teardown runs on every exit path; the returned error is the fatal
    /// condition that stopped the loop.
    pub fn run(&mut self, mux: &mut dyn Multiplexer) -> Result<(), RouterError> {
        let result = self.run_inner(mux);
        if let Err(e) = &result {
            error!("fatal error, stopping: {e}");
        }
        self.teardown();
        result
    }

    fn run_inner(&mut self, mux: &mut dyn Multiplexer) -> Result<(), RouterError> {
        self.start()?;
        debug!(
            "entering event loop with {} managed descriptors",
            self.registry.active_count()
        );
        while !self.shutdown.is_requested() {
            self.run_once(mux)?;
        }
        info!("shutdown requested");
        Ok(())
    }

    /// Run one loop iteration: wait, dispatch input, drain
    ///
    /// Exposed for deterministic single-step testing; [`Router::run`] is the
    /// production entry point.
    pub fn run_once(&mut self, mux: &mut dyn Multiplexer) -> Result<(), RouterError> {
        let set = self.registry.snapshot();
        let timeout = self.wait_timeout();
        let ready = mux.wait(&set, timeout).map_err(RouterError::IoWait)?;
        if !ready.is_empty() {
            debug!("{} descriptors signaled", ready.len());
        }
        self.handle_input(&ready)?;
        self.drain()
    }

    /// Minimum poll interval requested by the backends
    fn wait_timeout(&self) -> Duration {
        self.backends
            .iter()
            .filter_map(|entry| entry.backend.poll_interval())
            .min()
            .unwrap_or(self.config.idle_timeout)
    }

    /// Hand each backend its ready descriptors
    ///
    /// Every backend runs each iteration, with a possibly empty ready set,
    /// so interval-driven backends get their timed work.
    fn handle_input(&mut self, ready: &[ManagedFd]) -> Result<(), RouterError> {
        let Self {
            backends,
            map,
            events,
            registry,
            ..
        } = self;
        for (idx, entry) in backends.iter_mut().enumerate() {
            let id = BackendId(idx as u32);
            let own: Vec<ManagedFd> = ready
                .iter()
                .filter(|fd| fd.backend == id)
                .copied()
                .collect();
            let mut ctx = RouterCtx::new(id, map, events, registry);
            entry
                .backend
                .handle_ready(&own, &mut ctx)
                .map_err(|source| RouterError::BackendHandle {
                    backend: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Drain the event queue to quiescence
    ///
    /// Swaps the active and standby buffers and delivers the collected batch
    /// to the owning backends; events submitted during delivery land in the
    /// newly active buffer and are delivered in the next round. A cyclic
    /// mapping graph never reaches quiescence; cycle detection is a
    /// configuration-time responsibility, not the core's.
    pub fn drain(&mut self) -> Result<(), RouterError> {
        while self.events.pending() > 0 {
            debug!(
                "swapping event collectors, {} events pending",
                self.events.pending()
            );
            let batch = self.events.rotate();
            let result = self.notify_backends(&batch);
            self.events.restore(batch);
            result?;
        }
        Ok(())
    }

    /// Deliver one batch to the backends owning its destination channels
    ///
    /// Each backend receives its entries in batch order, in one call per
    /// round. Duplicate destinations within the batch are preserved.
    fn notify_backends(&mut self, batch: &[ChannelEvent]) -> Result<(), RouterError> {
        let Self {
            backends,
            map,
            events,
            registry,
            ..
        } = self;
        for (idx, entry) in backends.iter_mut().enumerate() {
            let id = BackendId(idx as u32);
            let own: Vec<ChannelEvent> = batch
                .iter()
                .filter(|event| event.channel.backend() == id)
                .copied()
                .collect();
            if own.is_empty() {
                continue;
            }
            let mut ctx = RouterCtx::new(id, map, events, registry);
            entry
                .backend
                .apply(&own, &mut ctx)
                .map_err(|source| RouterError::BackendNotify {
                    backend: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Tear down in fixed order; idempotent, runs on every exit path
    ///
    /// Order: stop backends (they unregister their descriptors), clear the
    /// mapping table, close and release the descriptor registry, release the
    /// event buffers, then drop the backend instances. Later steps must not
    /// run while backends might still reference the earlier state.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.state = RouterState::Stopped;

        {
            let Self {
                backends,
                map,
                events,
                registry,
                ..
            } = self;
            for (idx, entry) in backends.iter_mut().enumerate() {
                let id = BackendId(idx as u32);
                let mut ctx = RouterCtx::new(id, map, events, registry);
                entry.backend.stop(&mut ctx);
                registry.warn_leftover(id, &entry.name);
            }
        }

        self.map.clear();
        self.registry.close_all();
        self.events.clear();
        self.backends.clear();
        info!("router torn down");
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
