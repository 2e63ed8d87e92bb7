//! Lock-free multi-producer single-consumer byte ring
//!
//! Producers reserve contiguous byte ranges with a CAS on `write_pos`, fill
//! them in place, then publish by retiring their registry slot. The single
//! consumer reads up to the watermark, the lowest reservation still in
//! flight, so a slow producer at a low offset hides everything reserved
//! after it even if those later producers already finished.
//!
//! ## Positions
//!
//! `write_pos` and `read_pos` are monotonic `u64` byte counts; the physical
//! offset is `pos % capacity`. A reservation never straddles the physical
//! end. When it would, the producer skips the tail bytes (counted as used
//! space) and stores the logical position where the skip starts in
//! `end_marker`, so the consumer knows the tail holds nothing and jumps to
//! offset 0 once it gets there.
//!
//! ## Memory ordering
//!
//! **Producer (acquire):**
//! 1. Announce candidate start in own slot (Release)
//! 2. Load `read_pos` (Acquire, pairs with consumer's release)
//! 3. CAS `write_pos` (AcqRel); retry with the observed value on failure
//! 4. On a wrap: store `end_marker`, then re-announce the post-skip start
//!
//! **Producer (produce):** store IDLE into own slot (Release), after payload
//! writes.
//!
//! **Consumer (consume):** load `write_pos` (Acquire), scan all slots
//! (Acquire), and only then load `end_marker`. Seeing the slot changes made
//! after a wrap therefore guarantees seeing the marker as well.
//!
//! ## Liveness
//!
//! A producer that acquires and never produces stalls the ring for good: the
//! watermark cannot move past its reservation. There is no timeout based
//! reclamation.

use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, trace};

use super::layout::{CacheLinePadded, RingLayout};
use super::slot::{ProducerSlot, IDLE};
use crate::config::RingConfig;
use crate::error::{Result, RingError};

const MAGIC: u64 = 0x4D50_5343_5249_4E47; // "MPSCRING"
const VERSION: u32 = 1;

/// No wrap in progress
const NO_MARKER: u64 = u64::MAX;

/// Shared control header, placed at the start of the control region
#[repr(C)]
pub(crate) struct RingHeader {
    magic: u64,
    version: u32,
    _reserved: u32,
    capacity: u64,
    max_producers: u64,
    registered: AtomicU64,
    consumer_attached: AtomicBool,
    // Producer side
    write_pos: CacheLinePadded<AtomicU64>,
    // Consumer side
    read_pos: CacheLinePadded<AtomicU64>,
    unreleased: CacheLinePadded<AtomicU64>,
    // Written by a wrapping producer, cleared by the consumer
    end_marker: CacheLinePadded<AtomicU64>,
}

impl RingHeader {
    fn new(config: &RingConfig) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            _reserved: 0,
            capacity: config.capacity as u64,
            max_producers: config.max_producers as u64,
            registered: AtomicU64::new(0),
            consumer_attached: AtomicBool::new(false),
            write_pos: CacheLinePadded::new(AtomicU64::new(0)),
            read_pos: CacheLinePadded::new(AtomicU64::new(0)),
            unreleased: CacheLinePadded::new(AtomicU64::new(0)),
            end_marker: CacheLinePadded::new(AtomicU64::new(NO_MARKER)),
        }
    }
}

/// A physical byte range inside the data storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Point-in-time view of the ring's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub write_pos: u64,
    pub read_pos: u64,
    /// Reserved or unreleased bytes, skipped tail included
    pub used: usize,
    pub registered_producers: usize,
    /// A wrap happened and the consumer has not reached its end marker yet
    pub wrap_pending: bool,
}

/// Handle onto an initialised control region.
///
/// Cheap to copy; every copy refers to the same shared state. Any number of
/// threads (or processes mapping the same region) may act as producers; at
/// most one may call [`consume`](Self::consume) and
/// [`release`](Self::release) at a time, which is why both are `unsafe`.
#[derive(Clone, Copy)]
pub struct SharedRing<'a> {
    header: &'a RingHeader,
    slots: &'a [ProducerSlot],
}

impl<'a> SharedRing<'a> {
    /// Initialise a ring in caller-provided memory.
    ///
    /// `region` must hold at least [`RingLayout::control_size`] bytes aligned
    /// to [`RingLayout::align`]. Cursors start at zero, the registry empty.
    pub fn setup(region: &'a mut [u8], config: RingConfig) -> Result<Self> {
        let layout = RingLayout::new(&config)?;
        check_region(region.as_ptr(), region.len(), &layout)?;

        let base = region.as_mut_ptr();
        // SAFETY: size and alignment checked above, and the exclusive borrow
        // of `region` lasts as long as the returned handle.
        unsafe {
            ptr::write(base as *mut RingHeader, RingHeader::new(&config));
            let slots = base.add(RingLayout::slots_offset()) as *mut ProducerSlot;
            for i in 0..config.max_producers {
                ptr::write(slots.add(i), ProducerSlot::new());
            }
        }

        debug!(
            capacity = config.capacity,
            max_producers = config.max_producers,
            "ring initialised"
        );

        // SAFETY: just initialised.
        Ok(unsafe { Self::from_raw(NonNull::new_unchecked(base)) })
    }

    /// Attach to a region some other party already initialised.
    ///
    /// # Safety
    /// `base` must point to `len` readable and writable bytes that stay
    /// mapped for `'a`, and nobody may run [`setup`](Self::setup) on them
    /// while the handle is alive.
    pub unsafe fn attach(base: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(base).ok_or_else(|| RingError::layout("null region"))?;
        let header_layout = RingLayout::for_producers(0, 0);
        check_region(base.as_ptr(), len, &header_layout)?;

        let header = &*(base.as_ptr() as *const RingHeader);
        if header.magic != MAGIC {
            return Err(RingError::layout(format!(
                "bad magic {:#018x}, region not initialised",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(RingError::layout(format!(
                "version {} unsupported (expected {})",
                header.version, VERSION
            )));
        }

        let config = RingConfig::new(header.capacity as usize, header.max_producers as usize);
        let layout = RingLayout::new(&config)?;
        if len < layout.control_size {
            return Err(RingError::layout(format!(
                "region of {} bytes too small for {} producer slots",
                len, config.max_producers
            )));
        }

        debug!(
            capacity = config.capacity,
            max_producers = config.max_producers,
            "ring attached"
        );
        Ok(Self::from_raw(base))
    }

    /// # Safety
    /// `base` must point to an initialised control region valid for `'a`.
    pub(crate) unsafe fn from_raw(base: NonNull<u8>) -> Self {
        let header = &*(base.as_ptr() as *const RingHeader);
        let slots = slice::from_raw_parts(
            base.as_ptr().add(RingLayout::slots_offset()) as *const ProducerSlot,
            header.max_producers as usize,
        );
        Self { header, slots }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.header.capacity as usize
    }

    #[inline]
    pub fn max_producers(&self) -> usize {
        self.slots.len()
    }

    pub fn registered_producers(&self) -> usize {
        self.header.registered.load(Ordering::Acquire) as usize
    }

    /// Claim the next free registry entry for a new producer.
    ///
    /// Call once per producer before its first [`acquire`](Self::acquire).
    /// Entries are never handed back.
    pub fn register(&self) -> Result<&'a ProducerSlot> {
        let max = self.slots.len() as u64;
        let mut n = self.header.registered.load(Ordering::Relaxed);
        loop {
            if n >= max {
                return Err(RingError::RegistryFull {
                    max_producers: max as usize,
                });
            }
            match self.header.registered.compare_exchange_weak(
                n,
                n + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => n = current,
            }
        }

        let slots: &'a [ProducerSlot] = self.slots;
        let slot = &slots[n as usize];
        slot.mark_registered();
        debug!(index = n, "producer registered");
        Ok(slot)
    }

    /// Reserve `len` contiguous bytes for the producer owning `slot`.
    ///
    /// Fails immediately with `InsufficientSpace` if the ring cannot take
    /// `len` bytes right now, leaving every cursor untouched. On success the
    /// caller writes into the returned span and must follow up with
    /// [`produce`](Self::produce).
    ///
    /// A reservation that has to wrap needs the skipped tail and `len` free
    /// together, so lengths above half the capacity can fail on an empty
    /// ring, depending on where the cursor sits.
    pub fn acquire(&self, slot: &ProducerSlot, len: usize) -> Result<Span> {
        debug_assert!(self.owns(slot), "slot belongs to another ring");
        debug_assert!(slot.is_registered(), "acquire on an unregistered slot");
        debug_assert!(slot.is_idle(), "acquire with a reservation outstanding");

        let header = self.header;
        let capacity = header.capacity;
        let want = len as u64;

        let mut write = header.write_pos.value.load(Ordering::Acquire);
        let (start, next) = loop {
            // Announce before the CAS so a consumer that sees the new
            // write_pos also sees this slot as busy.
            slot.announce(write);

            let read = header.read_pos.value.load(Ordering::Acquire);
            if read > write {
                // Our write_pos is stale; the consumer is already past it.
                write = header.write_pos.value.load(Ordering::Acquire);
                continue;
            }

            let used = write - read;
            let tail = capacity - write % capacity;
            let start = if want <= tail { write } else { write + tail };
            let next = start + want;

            if next - read > capacity {
                slot.retire();
                return Err(RingError::InsufficientSpace {
                    requested: len,
                    available: (capacity - used) as usize,
                });
            }

            match header.write_pos.value.compare_exchange_weak(
                write,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break (start, next),
                Err(current) => write = current,
            }
        };

        if start != write {
            // Only one wrap can be pending: another needs the consumer past
            // this marker first.
            debug_assert_eq!(header.end_marker.value.load(Ordering::Relaxed), NO_MARKER);
            header.end_marker.value.store(write, Ordering::Release);
            slot.announce(start);
            trace!(
                end = write % capacity,
                skipped = start - write,
                len,
                "reservation wrapped to offset 0"
            );
        }

        debug_assert!(next - header.read_pos.value.load(Ordering::Relaxed) <= capacity);
        Ok(Span {
            offset: (start % capacity) as usize,
            len,
        })
    }

    /// Publish the reservation held by `slot`.
    ///
    /// Must come after every payload write into the reserved span.
    #[inline]
    pub fn produce(&self, slot: &ProducerSlot) {
        debug_assert!(self.owns(slot), "slot belongs to another ring");
        debug_assert!(!slot.is_idle(), "produce without an outstanding reservation");
        slot.retire();
    }

    /// Lowest position still being written, or `write_pos` when no
    /// reservation is outstanding. Recomputed on every call.
    pub fn watermark(&self) -> u64 {
        let read = self.header.read_pos.value.load(Ordering::Acquire);
        let write = self.header.write_pos.value.load(Ordering::Acquire);
        self.scan(read, write)
    }

    fn scan(&self, read: u64, write: u64) -> u64 {
        let mut ready = write;
        for slot in self.slots {
            let seen = slot.load();
            // Values below read_pos are stale candidates whose CAS will fail.
            if seen != IDLE && seen >= read {
                ready = ready.min(seen);
            }
        }
        ready
    }

    /// Find the next contiguous run of published bytes.
    ///
    /// Returns `None` when nothing is ready. The span never crosses the
    /// physical end of storage nor a wrap marker; call again after
    /// [`release`](Self::release) for the remainder.
    ///
    /// # Safety
    /// The caller must be the only consumer of this ring, across every
    /// handle and mapping of it, and must not call this while bytes from an
    /// earlier span are still borrowed by a safe [`Consumer`](crate::Consumer).
    pub unsafe fn consume(&self) -> Option<Span> {
        let header = self.header;
        let capacity = header.capacity;

        loop {
            let read = header.read_pos.value.load(Ordering::Relaxed);
            let write = header.write_pos.value.load(Ordering::Acquire);
            if write == read {
                return None;
            }

            let mut ready = self.scan(read, write);

            let end = header.end_marker.value.load(Ordering::Acquire);
            if end == read {
                self.skip_tail(read, end);
                continue;
            }
            if end != NO_MARKER && end > read {
                ready = ready.min(end);
            }
            // Stop at the physical end of this lap
            ready = ready.min(read - read % capacity + capacity);

            if ready <= read {
                return None;
            }

            let len = ready - read;
            header.unreleased.value.store(len, Ordering::Relaxed);
            return Some(Span {
                offset: (read % capacity) as usize,
                len: len as usize,
            });
        }
    }

    /// Hand `len` consumed bytes back to producers.
    ///
    /// # Safety
    /// Same contract as [`consume`](Self::consume). Once released, the bytes
    /// may be overwritten by producers, so nothing may still borrow them.
    ///
    /// Safe code goes through [`ReadGrant`](crate::ReadGrant) instead:
    ///
    /// ```compile_fail
    /// use mpscbuf::{RingBuffer, RingConfig, RingStorage};
    ///
    /// let rb = RingBuffer::new(RingConfig::new(64, 1)).unwrap();
    /// rb.ring().release(4);
    /// ```
    pub unsafe fn release(&self, len: usize) {
        let header = self.header;
        let len = len as u64;

        let unreleased = header.unreleased.value.load(Ordering::Relaxed);
        debug_assert!(
            len <= unreleased,
            "release of {} bytes exceeds the {} consumed",
            len,
            unreleased
        );
        header
            .unreleased
            .value
            .store(unreleased.saturating_sub(len), Ordering::Relaxed);

        let read = header.read_pos.value.load(Ordering::Relaxed) + len;
        let end = header.end_marker.value.load(Ordering::Acquire);
        if end == read {
            self.skip_tail(read, end);
        } else {
            header.read_pos.value.store(read, Ordering::Release);
        }
    }

    /// Consumer reached the wrap marker: drop the skipped tail.
    fn skip_tail(&self, read: u64, end: u64) {
        let capacity = self.header.capacity;
        self.header.end_marker.value.store(NO_MARKER, Ordering::Relaxed);
        let next = read + (capacity - end % capacity);
        self.header.read_pos.value.store(next, Ordering::Release);
        trace!(skipped = next - read, "consumer wrapped to offset 0");
    }

    pub fn stats(&self) -> RingStats {
        let header = self.header;
        let read = header.read_pos.value.load(Ordering::Acquire);
        let write = header.write_pos.value.load(Ordering::Acquire);
        RingStats {
            capacity: header.capacity as usize,
            write_pos: write,
            read_pos: read,
            used: write.saturating_sub(read) as usize,
            registered_producers: self.registered_producers(),
            wrap_pending: header.end_marker.value.load(Ordering::Acquire) != NO_MARKER,
        }
    }

    /// Mark the single consumer as present. Returns false if one already is.
    pub(crate) fn try_attach_consumer(&self) -> bool {
        self.header
            .consumer_attached
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn detach_consumer(&self) {
        self.header.consumer_attached.store(false, Ordering::Release);
    }

    fn owns(&self, slot: &ProducerSlot) -> bool {
        self.slots.as_ptr_range().contains(&(slot as *const ProducerSlot))
    }
}

fn check_region(base: *const u8, len: usize, layout: &RingLayout) -> Result<()> {
    if base as usize % layout.align != 0 {
        return Err(RingError::layout(format!(
            "region at {:p} not aligned to {} bytes",
            base, layout.align
        )));
    }
    if len < layout.control_size {
        return Err(RingError::layout(format!(
            "region of {} bytes too small, need {}",
            len, layout.control_size
        )));
    }
    Ok(())
}
