//! Backend interface
//!
//! A backend implements one control protocol's I/O and exposes its endpoints
//! as channels. The router drives backends through this trait and hands them
//! a [`RouterCtx`] whenever they are allowed to call back into the core,
//! either to enqueue channel events or to register descriptors for
//! multiplexing.

use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::channel::{BackendId, ChannelEvent, ChannelId, ChannelValue};
use crate::error::{BackendError, RouterError};
use crate::mapping::MappingTable;
use crate::queue::EventQueue;
use crate::registry::{FdRegistry, ManagedFd};

/// Core surface handed to backends
///
/// Borrows the router's mapping table, event queue, and descriptor registry,
/// so a backend can enqueue cascade events while an output batch is being
/// delivered to it. All calls are synchronous and run on the router's single
/// thread of control.
pub struct RouterCtx<'a> {
    backend: BackendId,
    map: &'a MappingTable,
    queue: &'a mut EventQueue,
    registry: &'a mut FdRegistry,
}

impl<'a> RouterCtx<'a> {
    pub(crate) fn new(
        backend: BackendId,
        map: &'a MappingTable,
        queue: &'a mut EventQueue,
        registry: &'a mut FdRegistry,
    ) -> Self {
        Self {
            backend,
            map,
            queue,
            registry,
        }
    }

    /// The identity of the backend this context was handed to
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// Build one of this backend's channel identities from its token
    pub fn channel(&self, token: u64) -> ChannelId {
        ChannelId::new(self.backend, token)
    }

    /// Submit a channel event for propagation
    ///
    /// Expands the source channel through the mapping table and enqueues one
    /// event per destination. An event on a channel without a mapping entry
    /// is a valid no-op (sink-only channel).
    pub fn channel_event(
        &mut self,
        channel: ChannelId,
        value: ChannelValue,
    ) -> Result<(), RouterError> {
        self.queue.enqueue(self.map.lookup(channel), value)
    }

    /// Register (`manage = true`) or unregister (`manage = false`) one of
    /// this backend's descriptors with the event loop
    ///
    /// The token is backend-private and returned verbatim with readiness
    /// notifications. A backend that keeps its own handle to the descriptor
    /// must unregister it in [`Backend::stop`]; descriptors still registered
    /// after stop are closed by the registry at teardown.
    pub fn manage_fd(&mut self, fd: RawFd, manage: bool, token: u64) -> Result<(), RouterError> {
        self.registry.manage(fd, self.backend, manage, token)
    }
}

/// A protocol backend instance
pub trait Backend {
    /// Bring up the backend's I/O; typically registers descriptors
    fn start(&mut self, ctx: &mut RouterCtx<'_>) -> Result<(), BackendError>;

    /// Shut the backend down; must unregister any descriptors it still owns
    fn stop(&mut self, ctx: &mut RouterCtx<'_>);

    /// Minimum interval at which the backend wants to run timed work
    ///
    /// The event loop waits for the minimum across all backends; `None`
    /// means the backend is purely readiness-driven.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Resolve a channel specification to a backend-allocated token
    fn channel(&mut self, spec: &str) -> Result<u64, BackendError>;

    /// Handle input readiness
    ///
    /// Called once per loop iteration with the subset of this backend's
    /// descriptors that are ready for reading, possibly empty, so
    /// interval-driven backends can do timed work. Input events are
    /// submitted through [`RouterCtx::channel_event`].
    fn handle_ready(
        &mut self,
        ready: &[ManagedFd],
        ctx: &mut RouterCtx<'_>,
    ) -> Result<(), BackendError>;

    /// Apply an output batch to this backend's channels
    ///
    /// Entries arrive in routing order. The same channel may occur more than
    /// once within a single batch when several source events map to it in
    /// one cascade round; backends must apply the entries in order (or
    /// coalesce deliberately) rather than treat this as an error. Applying
    /// an event may submit further events, which are delivered in the next
    /// cascade round.
    fn apply(
        &mut self,
        batch: &[ChannelEvent],
        ctx: &mut RouterCtx<'_>,
    ) -> Result<(), BackendError>;
}

/// Constructor for a backend type, resolved by name from the configuration
///
/// Factories take the place of loadable protocol plugins: the daemon
/// registers the factories it was built with, and the configuration layer
/// matches `[[instance]]` tables against them by backend type.
pub trait BackendFactory {
    /// The backend type name instances refer to
    fn backend_type(&self) -> &str;

    /// Create an instance with the given name and options
    fn create(
        &self,
        instance: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Backend>, BackendError>;
}
