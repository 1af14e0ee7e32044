// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host1x engine instance.
//!
//! Owns the syncpoint registry and interrupt dispatcher, and a range of fence
//! contexts (one per syncpoint). Fences and channels are created through it.

use std::sync::Arc;
use std::time::Duration;

use hostsync_common::{Error, Result, Settings, SyncpointId};

use crate::channel::Channel;
use crate::dma_fence::{context_alloc, Fence};
use crate::fence;
use crate::intr::{InterruptDispatcher, Intr};
use crate::syncpoint::{Syncpoint, SyncpointManager, SyncpointRegistry};

/// A host1x instance.
pub struct Host1x {
    settings: Settings,
    syncpoints: Arc<dyn SyncpointRegistry>,
    intr: Arc<dyn InterruptDispatcher>,
    fence_ctx_base: u64,
}

impl Host1x {
    /// Create a host with in-memory syncpoints and a threaded dispatcher.
    pub fn new(settings: &Settings) -> Result<Arc<Self>> {
        let syncpoints: Arc<dyn SyncpointRegistry> =
            Arc::new(SyncpointManager::new(settings.num_syncpoints));
        let intr = Arc::new(Intr::new(syncpoints.clone(), &settings.intr_thread_name)?);
        Ok(Self::with_parts(settings.clone(), syncpoints, intr))
    }

    /// Create a host over an existing registry and dispatcher.
    pub fn with_parts(
        settings: Settings,
        syncpoints: Arc<dyn SyncpointRegistry>,
        intr: Arc<dyn InterruptDispatcher>,
    ) -> Arc<Self> {
        let fence_ctx_base = context_alloc(u64::from(syncpoints.num_syncpoints()));
        log::debug!(
            "host1x: {} syncpoints, hw version {}, fence contexts from {}",
            syncpoints.num_syncpoints(),
            settings.hw_version,
            fence_ctx_base
        );

        Arc::new(Self {
            settings,
            syncpoints,
            intr,
            fence_ctx_base,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn syncpoints(&self) -> &Arc<dyn SyncpointRegistry> {
        &self.syncpoints
    }

    pub fn intr(&self) -> &Arc<dyn InterruptDispatcher> {
        &self.intr
    }

    pub fn num_syncpoints(&self) -> u32 {
        self.syncpoints.num_syncpoints()
    }

    /// Handle to syncpoint `id`.
    pub fn syncpoint(&self, id: SyncpointId) -> Result<Syncpoint> {
        Syncpoint::new(self.syncpoints.clone(), id)
    }

    /// Fence context used by fences on syncpoint `id`.
    pub fn fence_context(&self, id: SyncpointId) -> u64 {
        self.fence_ctx_base + u64::from(id)
    }

    pub fn syncpt_read(&self, id: SyncpointId) -> Result<u32> {
        Ok(self.syncpoint(id)?.read())
    }

    /// Increment syncpoint `id` from the CPU and deliver its interrupt.
    pub fn syncpt_incr(&self, id: SyncpointId) -> Result<u32> {
        if id >= self.num_syncpoints() {
            return Err(Error::InvalidSyncpoint(id));
        }
        let value = self.syncpoints.increment(id);
        self.intr.handle_syncpoint(id);
        Ok(value)
    }

    /// Block until syncpoint `id` reaches `threshold`, returning its value.
    ///
    /// `None` uses the configured wait timeout.
    pub fn syncpt_wait(
        self: &Arc<Self>,
        id: SyncpointId,
        threshold: u32,
        timeout: Option<Duration>,
    ) -> Result<u32> {
        let fence = self.fence_create(id, threshold)?;
        let timeout = timeout.unwrap_or_else(|| self.settings.wait_timeout());
        fence.wait(Some(timeout))?;
        self.syncpt_read(id)
    }

    /// Create a fence on syncpoint `id` reaching `threshold`.
    pub fn fence_create(self: &Arc<Self>, id: SyncpointId, threshold: u32) -> Result<Fence> {
        fence::create(self, id, threshold)
    }

    /// Open command channel `id` using this host's wait encoding.
    pub fn channel_request(&self, id: u32) -> Channel {
        Channel::new(id, self.settings.wide_waits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandChannel;
    use std::thread;

    fn small() -> Settings {
        Settings {
            num_syncpoints: 8,
            ..Settings::default()
        }
    }

    #[test]
    fn test_syncpt_read_incr() {
        let host = Host1x::new(&small()).unwrap();
        assert_eq!(host.syncpt_read(2).unwrap(), 0);
        assert_eq!(host.syncpt_incr(2).unwrap(), 1);
        assert_eq!(host.syncpt_read(2).unwrap(), 1);
        assert_eq!(host.syncpt_incr(8), Err(Error::InvalidSyncpoint(8)));
        assert_eq!(host.syncpt_read(8), Err(Error::InvalidSyncpoint(8)));
    }

    #[test]
    fn test_fence_contexts_are_distinct() {
        let a = Host1x::new(&small()).unwrap();
        let b = Host1x::new(&small()).unwrap();
        assert_eq!(a.fence_context(3), a.fence_context(0) + 3);
        assert_ne!(a.fence_context(0), b.fence_context(0));
        assert!(a.fence_context(7) < b.fence_context(0) || b.fence_context(7) < a.fence_context(0));
    }

    #[test]
    fn test_syncpt_wait_already_reached() {
        let host = Host1x::new(&small()).unwrap();
        host.syncpt_incr(5).unwrap();
        host.syncpt_incr(5).unwrap();
        assert_eq!(host.syncpt_wait(5, 1, Some(Duration::from_millis(10))), Ok(2));
    }

    #[test]
    fn test_syncpt_wait_timeout() {
        let host = Host1x::new(&small()).unwrap();
        assert_eq!(
            host.syncpt_wait(3, 10, Some(Duration::from_millis(30))),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn test_syncpt_wait_then_increment() {
        let host = Host1x::new(&small()).unwrap();
        let waiter = host.clone();

        let handle = thread::spawn(move || waiter.syncpt_wait(1, 3, Some(Duration::from_secs(2))));

        thread::sleep(Duration::from_millis(20));
        for _ in 0..3 {
            host.syncpt_incr(1).unwrap();
        }

        assert_eq!(handle.join().unwrap(), Ok(3));
    }

    #[test]
    fn test_syncpt_wait_default_timeout() {
        let settings = Settings {
            wait_timeout_ms: 20,
            ..small()
        };
        let host = Host1x::new(&settings).unwrap();
        assert_eq!(host.syncpt_wait(0, 1, None), Err(Error::Timeout));
    }

    #[test]
    fn test_channel_follows_hw_version() {
        let legacy = Host1x::new(&small()).unwrap();
        let ch = legacy.channel_request(4);
        assert_eq!(ch.id(), 4);
        ch.push_wait(1, 2);
        assert_eq!(ch.len(), 2);

        let wide = Host1x::new(&Settings {
            hw_version: 7,
            ..small()
        })
        .unwrap();
        let ch = wide.channel_request(4);
        ch.push_wait(1, 2);
        assert_eq!(ch.len(), 4);
    }
}
