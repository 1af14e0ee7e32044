// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fence arrays: one fence that signals once all of its members have.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::dma_fence::{Backing, CallbackId, Fence};

/// Members of an array fence, fixed at construction.
pub struct FenceArray {
    fences: Vec<Fence>,
    /// Members not yet signaled; only tracked once signaling is enabled.
    pending: AtomicUsize,
    /// Callbacks hooked onto members, by member index.
    hooks: Mutex<Vec<(usize, CallbackId)>>,
}

impl FenceArray {
    /// Create a fence that signals when every fence in `fences` has.
    ///
    /// The array shares ownership of its members. An empty array is
    /// signaled as soon as anyone looks at it.
    pub fn create(fences: Vec<Fence>, context: u64, seqno: u64) -> Fence {
        let pending = AtomicUsize::new(fences.len());
        Fence::with_backing(
            context,
            seqno,
            Backing::Array(FenceArray {
                fences,
                pending,
                hooks: Mutex::new(Vec::new()),
            }),
        )
    }

    pub fn fences(&self) -> &[Fence] {
        &self.fences
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub(crate) fn all_signaled(&self) -> bool {
        self.fences.iter().all(Fence::is_signaled)
    }

    /// Hook a callback onto every member. Returns false when all members had
    /// already signaled.
    pub(crate) fn enable_signaling(&self, array: &Fence) -> bool {
        for (index, member) in self.fences.iter().enumerate() {
            let weak = array.downgrade();
            let hooked = member.add_callback(Box::new(move |_| {
                if let Some(array) = weak.upgrade() {
                    if let Some(inner) = array.as_array() {
                        inner.member_signaled(&array);
                    }
                }
            }));
            match hooked {
                Ok(id) => self.hooks.lock().push((index, id)),
                Err(_) => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        self.pending.load(Ordering::Acquire) != 0
    }

    fn member_signaled(&self, array: &Fence) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            array.signal();
        }
    }
}

impl Drop for FenceArray {
    fn drop(&mut self) {
        // Unhook from members that outlive the array.
        for (index, id) in self.hooks.get_mut().drain(..) {
            if let Some(member) = self.fences.get(index) {
                member.remove_callback(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma_fence::{context_alloc, FenceOps};
    use std::thread;
    use std::time::Duration;

    struct Soft;

    impl FenceOps for Soft {
        fn driver_name(&self) -> &str {
            "soft"
        }

        fn timeline_name(&self) -> &str {
            "soft"
        }
    }

    fn soft(seqno: u64) -> Fence {
        Fence::new(context_alloc(1), seqno, Box::new(Soft))
    }

    #[test]
    fn test_signals_after_all_members() {
        let a = soft(1);
        let b = soft(2);
        let array = FenceArray::create(vec![a.clone(), b.clone()], context_alloc(1), 1);
        array.enable_sw_signaling();

        a.signal();
        assert!(!array.is_signaled());
        b.signal();
        assert!(array.is_signaled());
    }

    #[test]
    fn test_polling_without_enable() {
        let a = soft(1);
        let b = soft(2);
        let array = FenceArray::create(vec![a.clone(), b.clone()], context_alloc(1), 1);

        b.signal();
        assert!(!array.is_signaled());
        a.signal();
        assert!(array.is_signaled());
    }

    #[test]
    fn test_enable_with_members_already_signaled() {
        let a = soft(1);
        let b = soft(2);
        a.signal();
        b.signal();
        let array = FenceArray::create(vec![a, b], context_alloc(1), 1);
        array.enable_sw_signaling();
        assert!(array.timestamp().is_some());
    }

    #[test]
    fn test_empty_array() {
        let array = FenceArray::create(Vec::new(), context_alloc(1), 1);
        assert!(array.as_array().unwrap().is_empty());
        assert!(array.is_signaled());
        assert!(array.flatten().is_empty());
    }

    #[test]
    fn test_wait_on_array() {
        let a = soft(1);
        let b = soft(2);
        let array = FenceArray::create(vec![a.clone(), b.clone()], context_alloc(1), 7);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            a.signal();
            thread::sleep(Duration::from_millis(10));
            b.signal();
        });

        array.wait(Some(Duration::from_secs(2))).unwrap();
        handle.join().unwrap();
        assert_eq!(array.seqno(), 7);
        assert_eq!(array.driver_name(), "dma_fence_array");
        assert_eq!(array.timeline_name(), "unbound");
    }

    #[test]
    fn test_flatten_nested_in_order() {
        let a = soft(1);
        let b = soft(2);
        let c = soft(3);
        let inner = FenceArray::create(vec![b.clone(), c.clone()], context_alloc(1), 1);
        let outer = FenceArray::create(vec![a.clone(), inner], context_alloc(1), 1);

        let leaves = outer.flatten();
        assert_eq!(leaves.len(), 3);
        assert!(leaves[0].ptr_eq(&a));
        assert!(leaves[1].ptr_eq(&b));
        assert!(leaves[2].ptr_eq(&c));
        assert_eq!(outer.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_drop_unhooks_pending_members() {
        let a = soft(1);
        let b = soft(2);
        let array = FenceArray::create(vec![a.clone(), b.clone()], context_alloc(1), 1);
        array.enable_sw_signaling();
        a.signal();
        assert_eq!(a.callback_count(), 0);
        assert_eq!(b.callback_count(), 1);

        drop(array);
        assert_eq!(b.callback_count(), 0);
        assert!(b.signal());
    }

    #[test]
    fn test_members_outlive_array_handles() {
        let a = soft(1);
        let array = FenceArray::create(vec![a.clone()], context_alloc(1), 1);
        let weak_member = a.downgrade();
        drop(a);
        // Still owned by the array.
        assert!(weak_member.upgrade().is_some());
        drop(array);
        assert!(weak_member.upgrade().is_none());
    }
}
