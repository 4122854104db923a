//! Patchbay routing core
//!
//! This crate provides the routing heart of the patchbay protocol hub: it
//! connects heterogeneous control-protocol endpoints exposed by independent
//! backends by forwarding value changes on one channel to any number of
//! mapped destination channels, cascading until no further events are
//! pending.
//!
//! # Architecture
//!
//! The [`Router`] owns four cooperating pieces and runs them as sequential
//! phases of a single-threaded loop:
//!
//! - **[`MappingTable`]**: directed adjacency from source channels to
//!   ordered, deduplicated destination sets
//! - **[`FdRegistry`]**: OS descriptors backends register for readiness
//!   multiplexing, with slot reuse under connection churn
//! - **[`EventQueue`]**: a ping-pong buffer pair so cascades produced while
//!   a batch is being delivered never corrupt the batch in flight
//! - **[`Multiplexer`]**: the abstract readiness wait; [`PollMultiplexer`]
//!   implements it over `poll(2)`
//!
//! Because every phase runs on one logical thread of control, none of the
//! shared structures need locking. Shutdown is cooperative: a
//! [`ShutdownFlag`] set from signal context is observed once per iteration,
//! after the in-flight drain cycle has completed.
//!
//! # Example
//!
//! ```rust,no_run
//! use patch_core::{PollMultiplexer, Router};
//!
//! let mut router = Router::new();
//! // register backend instances, then build the mapping graph
//! // (normally done by the configuration layer)
//!
//! let mut mux = PollMultiplexer::new();
//! if let Err(e) = router.run(&mut mux) {
//!     eprintln!("router failed: {e}");
//! }
//! ```

pub mod backend;
pub mod channel;
pub mod error;
pub mod mapping;
pub mod multiplex;
pub mod queue;
pub mod registry;
pub mod router;

// Re-export backend-facing types
pub use backend::{Backend, BackendFactory, RouterCtx};

// Re-export identity and event types
pub use channel::{BackendId, ChannelEvent, ChannelId, ChannelValue};

// Re-export core structures
pub use error::{BackendError, RouterError};
pub use mapping::MappingTable;
pub use multiplex::{Multiplexer, PollMultiplexer};
pub use queue::EventQueue;
pub use registry::{FdRegistry, ManagedFd};
pub use router::{Router, RouterConfig, RouterState, ShutdownFlag};
