//! Managed descriptor registry
//!
//! Tracks the OS descriptors backends hand to the core for readiness
//! multiplexing. Each slot associates a descriptor with its owning backend
//! and a backend-private token; unused slots are reused before the registry
//! grows, which keeps it compact under connection churn without a separate
//! free list.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use tracing::{debug, warn};

use crate::channel::BackendId;
use crate::error::RouterError;

/// One managed descriptor entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedFd {
    /// The OS descriptor to watch for read readiness
    pub fd: RawFd,
    /// Backend instance owning the descriptor
    pub backend: BackendId,
    /// Backend-private token identifying the connection
    pub token: u64,
}

/// Registry of descriptors multiplexed by the event loop
///
/// The registry owns the close responsibility for every descriptor still
/// managed at teardown. A backend that keeps its own handle to a registered
/// descriptor must unregister it in [`Backend::stop`] so the handle's own
/// drop remains the only close.
///
/// [`Backend::stop`]: crate::backend::Backend::stop
#[derive(Debug, Default)]
pub struct FdRegistry {
    slots: Vec<Option<ManagedFd>>,
}

impl FdRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or unregister a descriptor for a backend
    ///
    /// Registering an already-managed `(fd, backend)` pair is a no-change
    /// success, as is unregistering a pair that was never registered. New
    /// registrations reuse the first unused slot before growing the registry
    /// by one.
    pub fn manage(
        &mut self,
        fd: RawFd,
        backend: BackendId,
        manage: bool,
        token: u64,
    ) -> Result<(), RouterError> {
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot {
                if entry.fd == fd && entry.backend == backend {
                    if !manage {
                        debug!(fd, backend = backend.0, "unregistered descriptor");
                        *slot = None;
                    }
                    return Ok(());
                }
            }
        }

        if !manage {
            return Ok(());
        }

        let entry = ManagedFd { fd, backend, token };
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(entry);
            return Ok(());
        }

        self.slots.try_reserve(1)?;
        self.slots.push(Some(entry));
        Ok(())
    }

    /// Ordered snapshot of the active entries, for building the wait set
    pub fn snapshot(&self) -> Vec<ManagedFd> {
        self.slots.iter().flatten().copied().collect()
    }

    /// Number of active (managed) entries
    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Total number of slots, including unused ones
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Close every still-managed descriptor and release the registry
    pub fn close_all(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        for entry in slots.into_iter().flatten() {
            debug!(fd = entry.fd, backend = entry.backend.0, "closing managed descriptor");
            // Safety: the registry holds the close responsibility for every
            // descriptor still registered at this point.
            let owned = unsafe { OwnedFd::from_raw_fd(entry.fd) };
            drop(owned);
        }
    }

    /// Warn about descriptors a backend left registered past its stop call
    pub(crate) fn warn_leftover(&self, backend: BackendId, name: &str) {
        let leftover = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| entry.backend == backend)
            .count();
        if leftover > 0 {
            warn!(
                backend = name,
                leftover, "backend left descriptors registered; registry will close them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;
    use std::mem::ManuallyDrop;
    use std::os::fd::IntoRawFd;

    #[test]
    fn test_register_then_unregister_clears_slot() {
        let mut registry = FdRegistry::new();

        registry.manage(5, BackendId(0), true, 1).unwrap();
        assert_eq!(registry.active_count(), 1);

        registry.manage(5, BackendId(0), false, 0).unwrap();
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.slot_count(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut registry = FdRegistry::new();

        registry.manage(5, BackendId(0), true, 1).unwrap();
        registry.manage(5, BackendId(0), true, 2).unwrap();

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.slot_count(), 1);
        // the original token survives the duplicate registration
        assert_eq!(registry.snapshot()[0].token, 1);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut registry = FdRegistry::new();
        registry.manage(9, BackendId(2), false, 0).unwrap();
        assert_eq!(registry.slot_count(), 0);
    }

    #[test]
    fn test_same_fd_different_backend_gets_own_slot() {
        let mut registry = FdRegistry::new();

        registry.manage(5, BackendId(0), true, 1).unwrap();
        registry.manage(5, BackendId(1), true, 2).unwrap();

        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_freed_slot_is_reused_before_growth() {
        let mut registry = FdRegistry::new();

        registry.manage(5, BackendId(0), true, 1).unwrap();
        registry.manage(6, BackendId(0), true, 2).unwrap();
        registry.manage(5, BackendId(0), false, 0).unwrap();

        registry.manage(7, BackendId(0), true, 3).unwrap();

        assert_eq!(registry.slot_count(), 2);
        assert_eq!(registry.snapshot()[0].fd, 7);
    }

    #[test]
    fn test_close_all_closes_managed_descriptors() {
        let (read, write) = nix::unistd::pipe().unwrap();
        // hand both ends to the registry so nothing closes them twice
        let read_fd = read.into_raw_fd();
        let write_fd = write.into_raw_fd();

        let mut registry = FdRegistry::new();
        registry.manage(read_fd, BackendId(0), true, 1).unwrap();
        registry.manage(write_fd, BackendId(0), true, 2).unwrap();

        registry.close_all();

        assert_eq!(registry.slot_count(), 0);
        // reading from the closed descriptor must fail with EBADF
        let mut stale = ManuallyDrop::new(unsafe { File::from_raw_fd(read_fd) });
        let mut buf = [0u8; 1];
        assert!(stale.read(&mut buf).is_err());
    }
}
