// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoint threshold interrupt dispatch.
//!
//! Actions are registered against a (syncpoint, threshold) pair and run on a
//! dedicated worker thread once the syncpoint reaches the threshold. The
//! worker is woken by [`InterruptDispatcher::handle_syncpoint`], which stands
//! in for the hardware threshold interrupt.
//!
//! Cancelling a registration with [`InterruptDispatcher::put_ref`] waits for
//! an in-flight invocation of that action to return, so once `put_ref`
//! returns the action is guaranteed never to run (again).

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use hostsync_common::{syncpoint_reached, Error, Result, SyncpointId};

use crate::syncpoint::SyncpointRegistry;

/// Callback run once a threshold is reached.
pub type IntrAction = Box<dyn FnOnce() + Send>;

/// Opaque handle to a registered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterRef(u64);

impl WaiterRef {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Service that runs actions when syncpoints cross thresholds.
pub trait InterruptDispatcher: Send + Sync {
    /// Register `action` to run once syncpoint `id` reaches `threshold`.
    fn add_action(
        &self,
        id: SyncpointId,
        threshold: u32,
        action: IntrAction,
    ) -> Result<WaiterRef>;

    /// Cancel a registration. A no-op if the action already ran; if it is
    /// running on another thread, blocks until it returns.
    fn put_ref(&self, id: SyncpointId, waiter: WaiterRef) -> Result<()>;

    /// Notify the dispatcher that syncpoint `id` may have moved.
    fn handle_syncpoint(&self, id: SyncpointId);
}

struct Waiter {
    key: u64,
    threshold: u32,
    action: IntrAction,
}

struct IntrState {
    waitlists: Vec<Vec<Waiter>>,
    next_key: u64,
    /// Actions currently executing, with the thread executing them.
    running: Vec<(u64, ThreadId)>,
}

struct IntrShared {
    registry: Arc<dyn SyncpointRegistry>,
    state: Mutex<IntrState>,
    idle: Condvar,
}

impl IntrShared {
    /// Run every expired action of syncpoint `id` on the calling thread.
    fn process(&self, id: SyncpointId) -> usize {
        let me = thread::current().id();
        let mut fired = 0;

        loop {
            let (key, action) = {
                let mut state = self.state.lock();
                let value = self.registry.read(id);
                let Some(list) = state.waitlists.get_mut(id as usize) else {
                    return fired;
                };
                let Some(pos) = list
                    .iter()
                    .position(|w| syncpoint_reached(value, w.threshold))
                else {
                    break;
                };
                let waiter = list.remove(pos);
                // Marked running under the same lock that removed it, so a
                // concurrent put_ref either finds it queued or sees it running.
                state.running.push((waiter.key, me));
                (waiter.key, waiter.action)
            };

            log::trace!("intr: syncpoint {} firing waiter {}", id, key);
            action();
            fired += 1;

            self.state.lock().running.retain(|&(k, _)| k != key);
            self.idle.notify_all();
        }

        fired
    }
}

enum IntrMessage {
    Syncpoint(SyncpointId),
    Shutdown,
}

/// Threaded interrupt dispatcher.
pub struct Intr {
    shared: Arc<IntrShared>,
    sender: Sender<IntrMessage>,
    worker: Option<JoinHandle<()>>,
}

impl Intr {
    /// Start a dispatcher over `registry` with a named worker thread.
    pub fn new(registry: Arc<dyn SyncpointRegistry>, thread_name: &str) -> Result<Self> {
        let waitlists = (0..registry.num_syncpoints()).map(|_| Vec::new()).collect();
        let shared = Arc::new(IntrShared {
            registry,
            state: Mutex::new(IntrState {
                waitlists,
                next_key: 1,
                running: Vec::new(),
            }),
            idle: Condvar::new(),
        });

        let (sender, receiver) = unbounded();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || Self::work(worker_shared, receiver))
            .map_err(|e| {
                log::error!("intr: failed to spawn worker thread: {}", e);
                Error::DispatcherStopped
            })?;

        Ok(Self {
            shared,
            sender,
            worker: Some(worker),
        })
    }

    fn work(shared: Arc<IntrShared>, receiver: Receiver<IntrMessage>) {
        while let Ok(msg) = receiver.recv() {
            match msg {
                IntrMessage::Syncpoint(id) => {
                    shared.process(id);
                }
                IntrMessage::Shutdown => break,
            }
        }
        log::debug!("intr: worker exiting");
    }

    /// Run expired actions of syncpoint `id` on the calling thread instead of
    /// the worker. Returns the number of actions run.
    pub fn process_syncpoint(&self, id: SyncpointId) -> usize {
        self.shared.process(id)
    }

    /// Number of registrations still waiting on syncpoint `id`.
    pub fn pending(&self, id: SyncpointId) -> usize {
        self.shared
            .state
            .lock()
            .waitlists
            .get(id as usize)
            .map_or(0, Vec::len)
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl InterruptDispatcher for Intr {
    fn add_action(
        &self,
        id: SyncpointId,
        threshold: u32,
        action: IntrAction,
    ) -> Result<WaiterRef> {
        if !self.is_running() {
            return Err(Error::DispatcherStopped);
        }

        let key = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let list = state
                .waitlists
                .get_mut(id as usize)
                .ok_or(Error::InvalidSyncpoint(id))?;
            list.try_reserve(1).map_err(|_| Error::OutOfMemory)?;

            let key = state.next_key;
            state.next_key += 1;
            list.push(Waiter {
                key,
                threshold,
                action,
            });
            key
        };

        log::debug!(
            "intr: waiter {} added on syncpoint {} threshold {}",
            key,
            id,
            threshold
        );

        // An already-passed threshold raises the interrupt immediately.
        if self.shared.registry.is_expired(id, threshold) {
            self.handle_syncpoint(id);
        }

        Ok(WaiterRef(key))
    }

    fn put_ref(&self, id: SyncpointId, waiter: WaiterRef) -> Result<()> {
        let mut state = self.shared.state.lock();
        let list = state
            .waitlists
            .get_mut(id as usize)
            .ok_or(Error::InvalidSyncpoint(id))?;

        if let Some(pos) = list.iter().position(|w| w.key == waiter.0) {
            let removed = list.remove(pos);
            drop(state);
            // Drop the action outside the lock; it may release other fences.
            drop(removed);
            log::debug!("intr: waiter {} cancelled on syncpoint {}", waiter.0, id);
            return Ok(());
        }

        // Cancelling from inside the action itself must not wait on itself.
        let me = thread::current().id();
        while state
            .running
            .iter()
            .any(|&(key, tid)| key == waiter.0 && tid != me)
        {
            self.shared.idle.wait(&mut state);
        }

        Ok(())
    }

    fn handle_syncpoint(&self, id: SyncpointId) {
        if self.sender.send(IntrMessage::Syncpoint(id)).is_err() {
            log::warn!("intr: worker gone, dropping interrupt for syncpoint {}", id);
        }
    }
}

impl Drop for Intr {
    fn drop(&mut self) {
        let _ = self.sender.send(IntrMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            // Dropped from within an action: the worker exits on its own.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::warn!("intr: worker thread panicked");
            }
        }
    }
}
