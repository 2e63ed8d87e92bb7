//! Per-producer registry entry
//!
//! Each producer announces the logical position of its in-flight reservation
//! here. The consumer scans every entry to find the lowest one (the
//! watermark) and never reads at or beyond it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sentinel for "no outstanding reservation"
pub(crate) const IDLE: u64 = u64::MAX;

/// Registry entry owned by exactly one producer.
///
/// Lives inline in the ring's control region so that producers in other
/// processes share it through the same mapping. Only its owner writes it;
/// anyone computing the watermark reads it.
#[derive(Debug)]
#[repr(C, align(64))] // One producer per cache line, no false sharing
pub struct ProducerSlot {
    reserved: AtomicU64,
    registered: AtomicBool,
}

impl ProducerSlot {
    pub(crate) const fn new() -> Self {
        Self {
            reserved: AtomicU64::new(IDLE),
            registered: AtomicBool::new(false),
        }
    }

    /// Logical start of the outstanding reservation, if any
    #[inline]
    pub fn reserved_offset(&self) -> Option<u64> {
        match self.reserved.load(Ordering::Acquire) {
            IDLE => None,
            pos => Some(pos),
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.reserved.load(Ordering::Relaxed) == IDLE
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    /// Announce a (candidate) reservation start.
    ///
    /// Release so that a consumer reading this value also sees the payload of
    /// the reservation this producer published before it.
    #[inline(always)]
    pub(crate) fn announce(&self, pos: u64) {
        self.reserved.store(pos, Ordering::Release);
    }

    /// Back to idle. Release pairs with the consumer's acquire load, which is
    /// what makes the payload visible.
    #[inline(always)]
    pub(crate) fn retire(&self) {
        self.reserved.store(IDLE, Ordering::Release);
    }

    /// Raw value for the watermark scan
    #[inline(always)]
    pub(crate) fn load(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }

    pub(crate) fn mark_registered(&self) {
        self.reserved.store(IDLE, Ordering::Relaxed);
        self.registered.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lifecycle() {
        let slot = ProducerSlot::new();
        assert!(!slot.is_registered());
        assert!(slot.is_idle());

        slot.mark_registered();
        assert!(slot.is_registered());

        slot.announce(128);
        assert!(!slot.is_idle());
        assert_eq!(slot.reserved_offset(), Some(128));

        slot.retire();
        assert_eq!(slot.reserved_offset(), None);
    }

    #[test]
    fn test_slot_is_cache_line_sized() {
        assert_eq!(std::mem::align_of::<ProducerSlot>(), 64);
        assert_eq!(std::mem::size_of::<ProducerSlot>(), 64);
    }
}
