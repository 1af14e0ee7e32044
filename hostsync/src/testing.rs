// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dispatcher doubles for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use hostsync_common::{Error, Result, SyncpointId};

use crate::intr::{InterruptDispatcher, IntrAction, WaiterRef};
use crate::syncpoint::SyncpointRegistry;

/// Records registrations; actions only run when a test calls [`MockIntr::fire`].
pub(crate) struct MockIntr {
    registry: Arc<dyn SyncpointRegistry>,
    actions: Mutex<Vec<(WaiterRef, SyncpointId, u32, IntrAction)>>,
    next_key: AtomicU64,
    adds: AtomicUsize,
    puts: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockIntr {
    pub(crate) fn new(registry: Arc<dyn SyncpointRegistry>) -> Self {
        Self {
            registry,
            actions: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(1),
            adds: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub(crate) fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub(crate) fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    pub(crate) fn fail_next_add(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Run the expired actions of syncpoint `id` on this thread.
    pub(crate) fn fire(&self, id: SyncpointId) -> usize {
        let expired: Vec<IntrAction> = {
            let mut actions = self.actions.lock();
            let mut expired = Vec::new();
            let mut i = 0;
            while i < actions.len() {
                let (_, sp, threshold, _) = &actions[i];
                if *sp == id && self.registry.is_expired(id, *threshold) {
                    expired.push(actions.remove(i).3);
                } else {
                    i += 1;
                }
            }
            expired
        };

        let count = expired.len();
        for action in expired {
            action();
        }
        count
    }
}

impl InterruptDispatcher for MockIntr {
    fn add_action(
        &self,
        id: SyncpointId,
        threshold: u32,
        action: IntrAction,
    ) -> Result<WaiterRef> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::OutOfMemory);
        }
        let waiter = WaiterRef::from_raw(self.next_key.fetch_add(1, Ordering::SeqCst));
        self.actions.lock().push((waiter, id, threshold, action));
        self.adds.fetch_add(1, Ordering::SeqCst);
        Ok(waiter)
    }

    fn put_ref(&self, _id: SyncpointId, waiter: WaiterRef) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let removed = {
            let mut actions = self.actions.lock();
            actions
                .iter()
                .position(|(w, ..)| *w == waiter)
                .map(|pos| actions.remove(pos))
        };
        drop(removed);
        Ok(())
    }

    fn handle_syncpoint(&self, id: SyncpointId) {
        self.fire(id);
    }
}

/// Counts calls passing through to another dispatcher.
pub(crate) struct CountingIntr {
    inner: Arc<dyn InterruptDispatcher>,
    adds: AtomicUsize,
    puts: AtomicUsize,
}

impl CountingIntr {
    pub(crate) fn new(inner: Arc<dyn InterruptDispatcher>) -> Self {
        Self {
            inner,
            adds: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl InterruptDispatcher for CountingIntr {
    fn add_action(
        &self,
        id: SyncpointId,
        threshold: u32,
        action: IntrAction,
    ) -> Result<WaiterRef> {
        let waiter = self.inner.add_action(id, threshold, action)?;
        self.adds.fetch_add(1, Ordering::SeqCst);
        Ok(waiter)
    }

    fn put_ref(&self, id: SyncpointId, waiter: WaiterRef) -> Result<()> {
        let result = self.inner.put_ref(id, waiter);
        self.puts.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn handle_syncpoint(&self, id: SyncpointId) {
        self.inner.handle_syncpoint(id);
    }
}
