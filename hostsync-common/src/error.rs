// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

use crate::types::SyncpointId;

/// Errors reported by the fence and syncpoint layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid syncpoint id {0}")]
    InvalidSyncpoint(SyncpointId),

    #[error("out of memory")]
    OutOfMemory,

    #[error("interrupt dispatcher is not running")]
    DispatcherStopped,

    #[error("fence cannot be waited on by hardware")]
    NotWaitable,

    #[error("timed out waiting for fence")]
    Timeout,

    #[error("fence already signaled")]
    AlreadySignaled,
}

impl Error {
    /// Linux errno equivalent, for callers that report numeric codes.
    pub const fn errno(&self) -> i32 {
        match self {
            Error::InvalidSyncpoint(_) | Error::NotWaitable => errno::EINVAL,
            Error::OutOfMemory => errno::ENOMEM,
            Error::DispatcherStopped => errno::ENODEV,
            Error::Timeout => errno::EAGAIN,
            Error::AlreadySignaled => errno::ENOENT,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errno values used by [`Error::errno`].
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NotWaitable.errno(), errno::EINVAL);
        assert_eq!(Error::InvalidSyncpoint(200).errno(), errno::EINVAL);
        assert_eq!(Error::Timeout.errno(), errno::EAGAIN);
        assert_eq!(Error::OutOfMemory.errno(), errno::ENOMEM);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::InvalidSyncpoint(7).to_string(),
            "invalid syncpoint id 7"
        );
    }
}
