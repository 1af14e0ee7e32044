// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host1x syncpoint fences.
//!
//! Completion fences backed by hardware syncpoints, joinable into fence
//! arrays, and waitable either from the CPU (through the threshold interrupt
//! dispatcher) or inline by a consuming command channel.

pub mod channel;
pub mod dma_fence;
pub mod fence;
pub mod fence_array;
pub mod host;
pub mod intr;
pub mod syncpoint;

#[cfg(test)]
mod testing;

pub use channel::{Channel, CommandChannel};
pub use dma_fence::{Fence, FenceOps, WeakFence};
pub use fence::{emit_wait, is_waitable, SyncpointFence};
pub use fence_array::FenceArray;
pub use host::Host1x;
pub use intr::{InterruptDispatcher, Intr, IntrAction, WaiterRef};
pub use syncpoint::{Syncpoint, SyncpointManager, SyncpointRegistry};
