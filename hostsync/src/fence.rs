// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoint-backed fences.
//!
//! A syncpoint fence completes when a syncpoint reaches a threshold. The
//! threshold interrupt is registered once, at creation, and cancelled when
//! the last handle is dropped. The registered action only holds a weak
//! reference to the fence, and cancellation waits out an in-flight action,
//! so no action ever runs against a released fence.
//!
//! Fences made only of syncpoints can also be waited on by a channel in
//! hardware, see [`is_waitable`] and [`emit_wait`].

use std::sync::Arc;

use parking_lot::Mutex;

use hostsync_common::{Error, Result, SyncpointId};

use crate::channel::CommandChannel;
use crate::dma_fence::{Backing, Fence};
use crate::host::Host1x;
use crate::intr::WaiterRef;
use crate::syncpoint::Syncpoint;

pub const DRIVER_NAME: &str = "host1x";

#[derive(Default)]
struct Registration {
    waiter: Option<WaiterRef>,
    /// The dispatcher has run the action; `waiter` is spent but still put.
    fired: bool,
}

/// The syncpoint side of a host1x fence.
pub struct SyncpointFence {
    host: Arc<Host1x>,
    syncpt: Syncpoint,
    threshold: u32,
    timeline_name: String,
    registration: Mutex<Registration>,
}

impl SyncpointFence {
    /// Whether the syncpoint has reached the threshold. Never blocks and has
    /// no side effects.
    pub fn is_satisfied(&self) -> bool {
        self.syncpt.is_expired(self.threshold)
    }

    /// Re-check before a consumer starts waiting. Returns false if there is
    /// nothing to wait for. The interrupt is already registered, so this
    /// never registers anything.
    pub fn arm(&self) -> bool {
        !self.is_satisfied()
    }

    /// Diagnostic label: the syncpoint id.
    pub fn label(&self) -> &str {
        &self.timeline_name
    }

    pub fn syncpoint_id(&self) -> SyncpointId {
        self.syncpt.id()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn host(&self) -> &Arc<Host1x> {
        &self.host
    }

    /// Whether an interrupt registration is still waiting to fire.
    pub fn is_registered(&self) -> bool {
        let reg = self.registration.lock();
        reg.waiter.is_some() && !reg.fired
    }
}

impl Drop for SyncpointFence {
    fn drop(&mut self) {
        let Some(waiter) = self.registration.get_mut().waiter.take() else {
            return;
        };

        let id = self.syncpt.id();
        if let Err(err) = self.host.intr().put_ref(id, waiter) {
            panic!(
                "host1x: failed to cancel waiter {} on syncpoint {}: {}",
                waiter.raw(),
                id,
                err
            );
        }
    }
}

/// Create a fence that signals once syncpoint `id` reaches `threshold`.
///
/// If the syncpoint is already there the fence starts out signaled and no
/// interrupt is registered. Fails with [`Error::InvalidSyncpoint`] for a bad
/// id and [`Error::OutOfMemory`] if the interrupt can't be registered; nothing
/// is left registered on failure.
pub fn create(host: &Arc<Host1x>, id: SyncpointId, threshold: u32) -> Result<Fence> {
    let syncpt = host.syncpoint(id)?;
    let expired = syncpt.is_expired(threshold);

    let fence = Fence::with_backing(
        host.fence_context(id),
        u64::from(threshold),
        Backing::Syncpoint(SyncpointFence {
            host: host.clone(),
            syncpt,
            threshold,
            timeline_name: id.to_string(),
            registration: Mutex::new(Registration::default()),
        }),
    );

    if expired {
        log::trace!("host1x: fence {}:{} already expired", id, threshold);
        fence.signal();
        return Ok(fence);
    }

    let weak = fence.downgrade();
    let waiter = host
        .intr()
        .add_action(
            id,
            threshold,
            Box::new(move || {
                if let Some(fence) = weak.upgrade() {
                    if let Some(f) = fence.as_syncpoint() {
                        f.registration.lock().fired = true;
                    }
                    fence.signal();
                }
            }),
        )
        .map_err(|err| {
            log::warn!("host1x: fence {}:{} registration failed: {}", id, threshold, err);
            // Callers can't tell a failed registration from a failed allocation.
            Error::OutOfMemory
        })?;

    if let Some(f) = fence.as_syncpoint() {
        f.registration.lock().waiter = Some(waiter);
    }

    log::debug!("host1x: fence {}:{} created", id, threshold);
    Ok(fence)
}

/// Check whether `fence` can be waited on by hardware: it is a syncpoint
/// fence, or an array whose members all are (recursively).
pub fn is_waitable(fence: &Fence) -> bool {
    match fence.as_array() {
        Some(array) => array.fences().iter().all(is_waitable),
        None => fence.as_syncpoint().is_some(),
    }
}

/// Insert waits for `fence` into channel `ch` of `host`.
///
/// Members are emitted in stored order, skipping those already satisfied.
/// Fails with [`Error::NotWaitable`] without emitting anything if any member
/// is not a syncpoint fence of `host`, or sits on a syncpoint `ch` can't
/// encode a wait for.
pub fn emit_wait(fence: &Fence, host: &Arc<Host1x>, ch: &dyn CommandChannel) -> Result<()> {
    if !is_waitable(fence) {
        return Err(Error::NotWaitable);
    }

    let leaves = fence.flatten();
    let mut waits = Vec::with_capacity(leaves.len());
    for leaf in &leaves {
        let f = leaf.as_syncpoint().ok_or(Error::NotWaitable)?;
        // Syncpoint ids mean nothing to another host's channels.
        if !Arc::ptr_eq(f.host(), host) {
            return Err(Error::NotWaitable);
        }
        if f.syncpoint_id() > ch.max_wait_syncpoint() {
            log::debug!(
                "host1x: channel {} can't wait on syncpoint {}",
                ch.id(),
                f.syncpoint_id()
            );
            return Err(Error::NotWaitable);
        }
        waits.push(f);
    }

    for f in waits {
        emit_wait_single(f, ch);
    }
    Ok(())
}

fn emit_wait_single(f: &SyncpointFence, ch: &dyn CommandChannel) {
    if f.is_satisfied() {
        return;
    }

    log::trace!(
        "host1x: channel {} waits on syncpoint {} >= {}",
        ch.id(),
        f.syncpoint_id(),
        f.threshold()
    );
    ch.push_wait(f.syncpoint_id(), f.threshold());
}
