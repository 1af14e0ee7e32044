// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoint registry.
//!
//! A syncpoint is a monotonically increasing 32-bit counter. Hardware
//! increments syncpoints as submitted work completes; software only ever asks
//! whether a counter has reached a given threshold.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hostsync_common::{syncpoint_reached, Error, Result, SyncpointId};

/// Owner of the hardware syncpoint counters.
pub trait SyncpointRegistry: Send + Sync {
    /// Number of syncpoints; valid ids are `0..num_syncpoints()`.
    fn num_syncpoints(&self) -> u32;

    /// Current value of a syncpoint. Out-of-range ids read as 0.
    fn read(&self, id: SyncpointId) -> u32;

    /// Increment a syncpoint from the CPU and return the new value.
    fn increment(&self, id: SyncpointId) -> u32;

    /// Whether syncpoint `id` has reached `threshold`. Never blocks.
    fn is_expired(&self, id: SyncpointId, threshold: u32) -> bool {
        syncpoint_reached(self.read(id), threshold)
    }
}

/// A handle to one syncpoint of a registry.
#[derive(Clone)]
pub struct Syncpoint {
    id: SyncpointId,
    registry: Arc<dyn SyncpointRegistry>,
}

impl Syncpoint {
    /// Bind `id` to `registry`, rejecting out-of-range ids.
    pub fn new(registry: Arc<dyn SyncpointRegistry>, id: SyncpointId) -> Result<Self> {
        if id >= registry.num_syncpoints() {
            return Err(Error::InvalidSyncpoint(id));
        }
        Ok(Self { id, registry })
    }

    pub fn id(&self) -> SyncpointId {
        self.id
    }

    pub fn read(&self) -> u32 {
        self.registry.read(self.id)
    }

    pub fn is_expired(&self, threshold: u32) -> bool {
        self.registry.is_expired(self.id, threshold)
    }
}

impl fmt::Debug for Syncpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Syncpoint").field("id", &self.id).finish()
    }
}

/// In-memory syncpoint counters.
pub struct SyncpointManager {
    values: Box<[AtomicU32]>,
}

impl SyncpointManager {
    pub fn new(num_syncpoints: u32) -> Self {
        // Initialize all syncpoints to 0.
        let values = (0..num_syncpoints).map(|_| AtomicU32::new(0)).collect();
        Self { values }
    }

    /// Raise a syncpoint to at least `value`. Returns the resulting value.
    ///
    /// Used to seed counters (e.g. restoring state); never moves a counter
    /// backwards.
    pub fn set_min(&self, id: SyncpointId, value: u32) -> u32 {
        let Some(slot) = self.values.get(id as usize) else {
            log::warn!("syncpoint: set_min out of range id={}", id);
            return 0;
        };

        let mut current = slot.load(Ordering::Acquire);
        while !syncpoint_reached(current, value) {
            match slot.compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    log::trace!("syncpoint[{}] loaded {}", id, value);
                    return value;
                }
                Err(actual) => current = actual,
            }
        }
        current
    }
}

impl SyncpointRegistry for SyncpointManager {
    fn num_syncpoints(&self) -> u32 {
        self.values.len() as u32
    }

    fn read(&self, id: SyncpointId) -> u32 {
        self.values
            .get(id as usize)
            .map_or(0, |v| v.load(Ordering::Acquire))
    }

    fn increment(&self, id: SyncpointId) -> u32 {
        let Some(slot) = self.values.get(id as usize) else {
            log::warn!("syncpoint: increment out of range id={}", id);
            return 0;
        };

        let new_val = slot.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        log::trace!("syncpoint[{}] incremented to {}", id, new_val);
        new_val
    }
}
