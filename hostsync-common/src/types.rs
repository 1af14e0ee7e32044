// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Hardware syncpoint index.
pub type SyncpointId = u32;

/// Number of hardware syncpoints on Tegra X1.
pub const DEFAULT_NUM_SYNCPOINTS: u32 = 192;

/// First host1x revision whose channels accept 32-bit wait thresholds.
pub const WIDE_WAIT_HW_VERSION: u32 = 6;

/// Check if a syncpoint value has reached a threshold, handling wrap-around.
/// Uses signed comparison: `(value - threshold) as i32 >= 0`.
#[inline]
pub const fn syncpoint_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syncpoint_reached() {
        assert!(syncpoint_reached(5, 3));
        assert!(syncpoint_reached(3, 3));
        assert!(!syncpoint_reached(2, 3));
    }

    #[test]
    fn test_syncpoint_reached_wraparound() {
        // Value just wrapped past threshold
        assert!(syncpoint_reached(0, u32::MAX));
        assert!(syncpoint_reached(4, u32::MAX - 2));
        assert!(!syncpoint_reached(u32::MAX, 0));
    }
}
