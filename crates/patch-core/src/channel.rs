//! Channel identity and value types
//!
//! Channels are opaque to the core: a backend allocates a token for every
//! addressable endpoint it exposes, and the core only ever compares the
//! resulting identities. Values are copied through the routing graph
//! unchanged; their semantics belong to the owning backends.

use std::fmt;

/// Unique identifier for a backend instance registered with the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(pub u32);

impl BackendId {
    /// Get the raw handle value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Stable opaque identity of a channel endpoint
///
/// A channel identity is the pair of the owning backend and a token the
/// backend allocated for the endpoint. The core never interprets the token;
/// it only needs value equality for mapping lookups and batch routing, so a
/// channel the backend has forgotten about can never alias another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    backend: BackendId,
    token: u64,
}

impl ChannelId {
    /// Create a channel identity from an owning backend and its token
    pub fn new(backend: BackendId, token: u64) -> Self {
        Self { backend, token }
    }

    /// The backend owning this channel
    pub fn backend(&self) -> BackendId {
        self.backend
    }

    /// The backend-allocated token
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend.0, self.token)
    }
}

/// Value carried by a channel event
///
/// Construction clamps into the 0.0..=1.0 range, so every value in flight is
/// normalised; past construction the value crosses the routing graph
/// unchanged. What a given value means on a channel belongs to the owning
/// backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValue {
    /// Normalised value
    pub normalised: f64,
}

impl ChannelValue {
    /// Create a value, clamping into the normalised range
    pub fn new(normalised: f64) -> Self {
        Self {
            normalised: normalised.clamp(0.0, 1.0),
        }
    }
}

/// One pending event: a destination channel and the value to deliver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelEvent {
    /// Destination channel
    pub channel: ChannelId,
    /// Value to deliver
    pub value: ChannelValue,
}
