// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use crate::types::{DEFAULT_NUM_SYNCPOINTS, WIDE_WAIT_HW_VERSION};

/// Engine settings, populated from config INI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // Host1x
    pub num_syncpoints: u32,
    pub hw_version: u32,
    pub intr_thread_name: String,

    // Fence
    pub wait_timeout_ms: u64,
}

impl Settings {
    /// Whether channels on this hardware take 32-bit wait thresholds.
    pub fn wide_waits(&self) -> bool {
        self.hw_version >= WIDE_WAIT_HW_VERSION
    }

    /// Timeout used for syncpoint waits that don't specify one.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_syncpoints: DEFAULT_NUM_SYNCPOINTS,
            hw_version: 5,
            intr_thread_name: "host1x-intr".to_string(),
            wait_timeout_ms: 3000,
        }
    }
}
