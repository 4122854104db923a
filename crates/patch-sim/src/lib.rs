//! Patchbay simulation backend
//!
//! This crate provides a loopback backend for exercising the routing core
//! without protocol hardware:
//!
//! - **LoopbackBackend**: named channels, an injection pipe as a real
//!   multiplexed descriptor, and an observable log of applied batches
//! - **LoopbackInjector**: feeds input events into the pipe from outside the
//!   router
//! - **LoopbackFactory**: config-driven instantiation
//!
//! # Example
//!
//! ```rust,no_run
//! use patch_core::{PollMultiplexer, Router};
//! use patch_sim::LoopbackBackend;
//!
//! let mut backend = LoopbackBackend::new("hub").unwrap();
//! let mut injector = backend.take_injector().unwrap();
//! let log = backend.log();
//!
//! let mut router = Router::new();
//! router.add_backend("hub", Box::new(backend));
//!
//! let fader = router.channel("hub", "fader").unwrap();
//! let dimmer = router.channel("hub", "dimmer").unwrap();
//! router.map_channel(fader, dimmer).unwrap();
//!
//! router.start().unwrap();
//! injector.send("fader", 0.8).unwrap();
//! router.run_once(&mut PollMultiplexer::new()).unwrap();
//! assert_eq!(log.batches(), vec![vec![("dimmer".to_string(), 0.8)]]);
//! ```

pub mod loopback;

pub use loopback::{LoopbackBackend, LoopbackFactory, LoopbackInjector, LoopbackLog};
