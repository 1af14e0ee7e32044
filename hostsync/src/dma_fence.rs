// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generic completion fences.
//!
//! A [`Fence`] is a cheaply clonable, reference-counted handle to a one-shot
//! completion. Once signaled it stays signaled. Consumers can poll it, block
//! on it with an optional timeout, or attach callbacks that run when it
//! signals.
//!
//! What backs a fence is a closed set: a syncpoint threshold, an array of
//! other fences, or any foreign source implementing [`FenceOps`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use hostsync_common::{Error, Result};

use crate::fence::{SyncpointFence, DRIVER_NAME};
use crate::fence_array::FenceArray;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Allocate `num` consecutive fence context ids and return the first.
pub fn context_alloc(num: u64) -> u64 {
    NEXT_CONTEXT.fetch_add(num, Ordering::Relaxed)
}

/// Behaviour of a fence whose completion comes from outside this crate.
pub trait FenceOps: Send + Sync {
    fn driver_name(&self) -> &str;

    fn timeline_name(&self) -> &str;

    /// Called once when the first consumer wants to be notified. Returning
    /// false means the fence is already complete and is signaled at once.
    fn enable_signaling(&self) -> bool {
        true
    }

    /// Non-blocking completion check. The default relies on the source
    /// calling [`Fence::signal`].
    fn signaled(&self) -> bool {
        false
    }
}

/// Callback run (once) when a fence signals.
pub type FenceCallback = Box<dyn FnOnce(&Fence) + Send>;

/// Identifies a callback registered with [`Fence::add_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub(crate) enum Backing {
    Syncpoint(SyncpointFence),
    Array(FenceArray),
    Foreign(Box<dyn FenceOps>),
}

struct FenceState {
    signaling_enabled: bool,
    timestamp: Option<Instant>,
    callbacks: Vec<(CallbackId, FenceCallback)>,
    next_callback: u64,
}

struct FenceInner {
    context: u64,
    seqno: u64,
    /// Latched completion; only ever goes false -> true, under `state`.
    signaled: AtomicBool,
    state: Mutex<FenceState>,
    cond: Condvar,
    backing: Backing,
}

/// Shared handle to a completion.
#[derive(Clone)]
pub struct Fence(Arc<FenceInner>);

/// Non-owning fence handle.
#[derive(Clone)]
pub struct WeakFence(Weak<FenceInner>);

impl WeakFence {
    pub fn upgrade(&self) -> Option<Fence> {
        self.0.upgrade().map(Fence)
    }
}

struct StubOps;

impl FenceOps for StubOps {
    fn driver_name(&self) -> &str {
        "stub"
    }

    fn timeline_name(&self) -> &str {
        "stub"
    }
}

impl Fence {
    pub(crate) fn with_backing(context: u64, seqno: u64, backing: Backing) -> Self {
        Self(Arc::new(FenceInner {
            context,
            seqno,
            signaled: AtomicBool::new(false),
            state: Mutex::new(FenceState {
                signaling_enabled: false,
                timestamp: None,
                callbacks: Vec::new(),
                next_callback: 1,
            }),
            cond: Condvar::new(),
            backing,
        }))
    }

    /// Create a fence backed by a foreign completion source.
    pub fn new(context: u64, seqno: u64, ops: Box<dyn FenceOps>) -> Self {
        Self::with_backing(context, seqno, Backing::Foreign(ops))
    }

    /// An already signaled fence.
    pub fn stub() -> Self {
        let fence = Self::new(0, 0, Box::new(StubOps));
        fence.signal();
        fence
    }

    pub fn context(&self) -> u64 {
        self.0.context
    }

    pub fn seqno(&self) -> u64 {
        self.0.seqno
    }

    pub fn driver_name(&self) -> &str {
        match &self.0.backing {
            Backing::Syncpoint(_) => DRIVER_NAME,
            Backing::Array(_) => "dma_fence_array",
            Backing::Foreign(ops) => ops.driver_name(),
        }
    }

    pub fn timeline_name(&self) -> &str {
        match &self.0.backing {
            Backing::Syncpoint(f) => f.label(),
            Backing::Array(_) => "unbound",
            Backing::Foreign(ops) => ops.timeline_name(),
        }
    }

    /// The syncpoint completion behind this fence, if it is one.
    pub fn as_syncpoint(&self) -> Option<&SyncpointFence> {
        match &self.0.backing {
            Backing::Syncpoint(f) => Some(f),
            _ => None,
        }
    }

    /// The members behind this fence, if it is an array.
    pub fn as_array(&self) -> Option<&FenceArray> {
        match &self.0.backing {
            Backing::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Whether the fence has completed. Latches the signaled state if the
    /// backing reports completion before its notification arrived.
    pub fn is_signaled(&self) -> bool {
        if self.0.signaled.load(Ordering::Acquire) {
            return true;
        }

        let done = match &self.0.backing {
            Backing::Syncpoint(f) => f.is_satisfied(),
            Backing::Array(a) => a.all_signaled(),
            Backing::Foreign(ops) => ops.signaled(),
        };
        if done {
            self.signal();
        }
        done
    }

    /// Mark the fence complete, wake waiters and run callbacks.
    ///
    /// Returns false if it was already signaled.
    pub fn signal(&self) -> bool {
        let callbacks = {
            let mut state = self.0.state.lock();
            if self.0.signaled.load(Ordering::Acquire) {
                return false;
            }
            self.0.signaled.store(true, Ordering::Release);
            state.timestamp = Some(Instant::now());
            std::mem::take(&mut state.callbacks)
        };

        self.0.cond.notify_all();
        for (_, callback) in callbacks {
            callback(self);
        }
        true
    }

    /// When the fence signaled, if it has.
    pub fn timestamp(&self) -> Option<Instant> {
        self.0.state.lock().timestamp
    }

    /// Ask the backing to start delivering a completion notification.
    /// Only the first call has an effect.
    pub fn enable_sw_signaling(&self) {
        {
            let mut state = self.0.state.lock();
            if state.signaling_enabled || self.0.signaled.load(Ordering::Acquire) {
                return;
            }
            state.signaling_enabled = true;
        }

        let keep_waiting = match &self.0.backing {
            Backing::Syncpoint(f) => f.arm(),
            Backing::Array(a) => a.enable_signaling(self),
            Backing::Foreign(ops) => ops.enable_signaling(),
        };
        if !keep_waiting {
            self.signal();
        }
    }

    /// Run `callback` when the fence signals.
    ///
    /// Fails with [`Error::AlreadySignaled`] (dropping the callback) if the
    /// fence has already signaled.
    pub fn add_callback(&self, callback: FenceCallback) -> Result<CallbackId> {
        if self.is_signaled() {
            return Err(Error::AlreadySignaled);
        }
        self.enable_sw_signaling();

        let mut state = self.0.state.lock();
        if self.0.signaled.load(Ordering::Acquire) {
            return Err(Error::AlreadySignaled);
        }
        let id = CallbackId(state.next_callback);
        state.next_callback += 1;
        state.callbacks.push((id, callback));
        Ok(id)
    }

    /// Remove a pending callback. Returns false if it already ran.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.0.state.lock();
        let Some(pos) = state.callbacks.iter().position(|(cb, _)| *cb == id) else {
            return false;
        };
        let removed = state.callbacks.remove(pos);
        drop(state);
        drop(removed);
        true
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.0.state.lock().callbacks.len()
    }

    /// Block until the fence signals. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_signaled() {
            return Ok(());
        }
        self.enable_sw_signaling();

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.0.state.lock();
        while !self.0.signaled.load(Ordering::Acquire) {
            match deadline {
                Some(deadline) => {
                    if self.0.cond.wait_until(&mut state, deadline).timed_out() {
                        drop(state);
                        return if self.is_signaled() {
                            Ok(())
                        } else {
                            Err(Error::Timeout)
                        };
                    }
                }
                None => self.0.cond.wait(&mut state),
            }
        }
        Ok(())
    }

    /// Leaf fences of this fence: itself, or the members of nested arrays
    /// depth-first in stored order.
    pub fn flatten(&self) -> Vec<Fence> {
        let mut leaves = Vec::new();
        self.flatten_into(&mut leaves);
        leaves
    }

    fn flatten_into(&self, leaves: &mut Vec<Fence>) {
        match &self.0.backing {
            Backing::Array(a) => {
                for member in a.fences() {
                    member.flatten_into(leaves);
                }
            }
            _ => leaves.push(self.clone()),
        }
    }

    pub fn downgrade(&self) -> WeakFence {
        WeakFence(Arc::downgrade(&self.0))
    }

    /// Whether two handles refer to the same fence.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("driver", &self.driver_name())
            .field("timeline", &self.timeline_name())
            .field("context", &self.0.context)
            .field("seqno", &self.0.seqno)
            .field("signaled", &self.0.signaled.load(Ordering::Relaxed))
            .finish()
    }
}
