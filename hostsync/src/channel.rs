// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host1x command channels.
//!
//! A channel is a stream of 32-bit host1x opcodes executed by hardware. The
//! only instruction this crate emits is the syncpoint wait, which stalls the
//! channel until a syncpoint reaches a threshold.
//!
//! ## Opcode Format (32 bits)
//!
//! | Bits    | Field                         |
//! |---------|-------------------------------|
//! | 31:28   | Opcode                        |
//! | 27:16   | Register offset               |
//! | 15:6    | Class id (SETCLASS only)      |
//! | 5:0     | Register mask (SETCLASS only) |
//!
//! ## Syncpoint Wait Sequences
//!
//! Legacy hardware (before host1x06) takes a 24-bit threshold packed with the
//! syncpoint index:
//!
//! ```text
//! SETCLASS(HOST1X, WAIT_SYNCPT, 1)
//! (id << 24) | (threshold & 0xFFFFFF)
//! ```
//!
//! host1x06 and later load a full 32-bit payload first:
//!
//! ```text
//! SETCLASS(HOST1X, LOAD_SYNCPT_PAYLOAD_32, 1)
//! threshold
//! SETCLASS(HOST1X, WAIT_SYNCPT_32, 1)
//! id
//! ```

use parking_lot::Mutex;

use hostsync_common::SyncpointId;

/// Host1x class id of the host itself.
pub const HOST1X_CLASS_HOST1X: u32 = 0x1;

/// Host class register offsets.
pub const HOST1X_UCLASS_WAIT_SYNCPT: u32 = 0x8;
pub const HOST1X_UCLASS_LOAD_SYNCPT_PAYLOAD_32: u32 = 0x4e;
pub const HOST1X_UCLASS_WAIT_SYNCPT_32: u32 = 0x50;

/// Highest syncpoint index a legacy WAIT_SYNCPT can address.
pub const LEGACY_WAIT_MAX_SYNCPOINT: SyncpointId = 0xFF;

/// Opcode kinds from bits [31:28].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpcodeKind {
    SetClass = 0,
    Incr = 1,
    NonIncr = 2,
    Mask = 3,
    Imm = 4,
    Other,
}

impl OpcodeKind {
    fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::SetClass,
            1 => Self::Incr,
            2 => Self::NonIncr,
            3 => Self::Mask,
            4 => Self::Imm,
            _ => Self::Other,
        }
    }
}

/// A decoded host1x opcode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode(u32);

impl Opcode {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn kind(&self) -> OpcodeKind {
        OpcodeKind::from_raw(self.0 >> 28)
    }

    /// Register offset (bits [27:16]).
    pub fn offset(&self) -> u32 {
        (self.0 >> 16) & 0xFFF
    }

    /// Class id (bits [15:6]), SETCLASS only.
    pub fn class_id(&self) -> u32 {
        (self.0 >> 6) & 0x3FF
    }

    /// Register mask (bits [5:0]), SETCLASS only.
    pub fn mask(&self) -> u32 {
        self.0 & 0x3F
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[inline]
pub const fn opcode_setclass(class_id: u32, offset: u32, mask: u32) -> u32 {
    (offset << 16) | (class_id << 6) | mask
}

#[inline]
pub const fn opcode_nonincr(offset: u32, count: u32) -> u32 {
    (2 << 28) | (offset << 16) | count
}

#[inline]
pub const fn opcode_nop() -> u32 {
    opcode_nonincr(0, 0)
}

/// Data word of a legacy WAIT_SYNCPT.
#[inline]
pub const fn class_host_wait_syncpt(id: SyncpointId, threshold: u32) -> u32 {
    ((id & 0xFF) << 24) | (threshold & 0xFF_FFFF)
}

/// Consumer-side instruction stream that can wait on syncpoints in hardware.
pub trait CommandChannel: Send + Sync {
    /// Channel index, for diagnostics.
    fn id(&self) -> u32;

    /// Highest syncpoint index `push_wait` can encode.
    fn max_wait_syncpoint(&self) -> SyncpointId {
        SyncpointId::MAX
    }

    /// Append a "wait until syncpoint `id` >= `threshold`" instruction.
    fn push_wait(&self, id: SyncpointId, threshold: u32);
}

/// A host1x channel recording its pushbuffer in memory.
pub struct Channel {
    id: u32,
    wide_waits: bool,
    pushbuf: Mutex<Vec<u32>>,
}

impl Channel {
    /// Create a channel; `wide_waits` selects the 32-bit payload wait form.
    pub fn new(id: u32, wide_waits: bool) -> Self {
        Self {
            id,
            wide_waits,
            pushbuf: Mutex::new(Vec::new()),
        }
    }

    /// Append raw opcode words.
    pub fn push(&self, words: &[u32]) {
        self.pushbuf.lock().extend_from_slice(words);
    }

    /// Number of words queued.
    pub fn len(&self) -> usize {
        self.pushbuf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushbuf.lock().is_empty()
    }

    /// Drain the queued words for submission.
    pub fn take_words(&self) -> Vec<u32> {
        std::mem::take(&mut *self.pushbuf.lock())
    }

    /// Decode the syncpoint waits currently queued, in order.
    pub fn pending_waits(&self) -> Vec<(SyncpointId, u32)> {
        decode_waits(&self.pushbuf.lock())
    }
}

impl CommandChannel for Channel {
    fn id(&self) -> u32 {
        self.id
    }

    fn max_wait_syncpoint(&self) -> SyncpointId {
        if self.wide_waits {
            SyncpointId::MAX
        } else {
            LEGACY_WAIT_MAX_SYNCPOINT
        }
    }

    fn push_wait(&self, id: SyncpointId, threshold: u32) {
        log::trace!(
            "channel {}: wait syncpoint {} >= {}",
            self.id,
            id,
            threshold
        );

        if self.wide_waits {
            self.push(&[
                opcode_setclass(HOST1X_CLASS_HOST1X, HOST1X_UCLASS_LOAD_SYNCPT_PAYLOAD_32, 1),
                threshold,
                opcode_setclass(HOST1X_CLASS_HOST1X, HOST1X_UCLASS_WAIT_SYNCPT_32, 1),
                id,
            ]);
        } else {
            if id > LEGACY_WAIT_MAX_SYNCPOINT {
                log::warn!(
                    "channel {}: syncpoint {} does not fit a legacy wait",
                    self.id,
                    id
                );
            }
            if threshold > 0xFF_FFFF {
                log::warn!(
                    "channel {}: threshold {:#x} truncated to 24 bits",
                    self.id,
                    threshold
                );
            }
            self.push(&[
                opcode_setclass(HOST1X_CLASS_HOST1X, HOST1X_UCLASS_WAIT_SYNCPT, 1),
                class_host_wait_syncpt(id, threshold),
            ]);
        }
    }
}

/// Decode (syncpoint, threshold) waits from a host1x opcode stream.
///
/// Only host-class SETCLASS writes are understood; other words are skipped.
pub fn decode_waits(words: &[u32]) -> Vec<(SyncpointId, u32)> {
    let mut waits = Vec::new();
    let mut payload = 0;
    let mut pos = 0;

    while pos < words.len() {
        let op = Opcode::new(words[pos]);
        pos += 1;

        if op.kind() != OpcodeKind::SetClass || op.class_id() != HOST1X_CLASS_HOST1X {
            continue;
        }
        let Some(&data) = words.get(pos) else {
            break;
        };
        pos += 1;

        match op.offset() {
            HOST1X_UCLASS_WAIT_SYNCPT => waits.push((data >> 24, data & 0xFF_FFFF)),
            HOST1X_UCLASS_LOAD_SYNCPT_PAYLOAD_32 => payload = data,
            HOST1X_UCLASS_WAIT_SYNCPT_32 => waits.push((data, payload)),
            _ => {}
        }
    }

    waits
}
