//! Double-buffered event queue
//!
//! Two growable event buffers used in active/standby (ping-pong) roles.
//! Events always land in the active buffer; when a batch is delivered the
//! roles swap, so cascades produced while the batch is being applied collect
//! in the other buffer instead of corrupting the batch in flight. Buffers
//! grow monotonically and are only released at teardown.

use crate::channel::{ChannelEvent, ChannelId, ChannelValue};
use crate::error::RouterError;

/// Ping-pong event queue
#[derive(Debug, Default)]
pub struct EventQueue {
    pool: [Vec<ChannelEvent>; 2],
    active: usize,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event per destination to the active buffer
    ///
    /// On growth failure the active buffer's logical count is reset to zero
    /// and the error is fatal. A destination that is mapped from several
    /// sources may end up in the buffer more than once; the batch is
    /// delivered as-is, duplicates included.
    pub fn enqueue(
        &mut self,
        destinations: &[ChannelId],
        value: ChannelValue,
    ) -> Result<(), RouterError> {
        if destinations.is_empty() {
            return Ok(());
        }

        let active = &mut self.pool[self.active];
        if let Err(e) = active.try_reserve(destinations.len()) {
            active.clear();
            return Err(e.into());
        }
        active.extend(
            destinations
                .iter()
                .map(|&channel| ChannelEvent { channel, value }),
        );
        Ok(())
    }

    /// Number of events pending in the active buffer
    pub fn pending(&self) -> usize {
        self.pool[self.active].len()
    }

    /// Swap buffer roles and take the collected batch
    ///
    /// The previously standby buffer (empty, but retaining its grown
    /// capacity) becomes active; the caller delivers the returned batch and
    /// hands the buffer back through [`EventQueue::restore`].
    pub(crate) fn rotate(&mut self) -> Vec<ChannelEvent> {
        let batch = std::mem::take(&mut self.pool[self.active]);
        self.active ^= 1;
        batch
    }

    /// Return a delivered batch buffer to the standby slot
    ///
    /// Resets the logical count while keeping the allocation for the next
    /// swap.
    pub(crate) fn restore(&mut self, mut batch: Vec<ChannelEvent>) {
        batch.clear();
        self.pool[self.active ^ 1] = batch;
    }

    /// Release both buffers
    pub fn clear(&mut self) {
        self.pool = Default::default();
    }
}
