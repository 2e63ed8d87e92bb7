//! Safe producer and consumer handles over a ring and its data bytes
//!
//! The raw protocol in [`SharedRing`] only deals in offsets. These handles
//! pair it with the data region so callers get `&mut [u8]` / `&[u8]`
//! directly into storage, with the borrow checker enforcing one outstanding
//! grant per handle.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::{debug, warn};

use super::ring::{RingStats, SharedRing, Span};
use super::slot::ProducerSlot;
use crate::error::{Result, RingError};

/// The caller-owned bytes reservations point into
#[derive(Clone, Copy)]
pub struct DataRegion<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _marker: PhantomData<&'a [UnsafeCell<u8>]>,
}

// SAFETY: access to the bytes is partitioned by the ring protocol; a byte is
// written by the one producer holding its reservation, then read by the one
// consumer after publication.
unsafe impl Send for DataRegion<'_> {}
unsafe impl Sync for DataRegion<'_> {}

impl<'a> DataRegion<'a> {
    /// # Safety
    /// `ptr` must point to `len` initialised bytes valid for `'a` and only
    /// ever accessed through rings built on the same control region.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// Caller must hold the reservation for `span`.
    unsafe fn slice_mut<'g>(&self, span: Span) -> &'g mut [u8] {
        debug_assert!(span.range().end <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(span.offset), span.len)
    }

    /// # Safety
    /// Caller must be the consumer and `span` must come from `consume`.
    unsafe fn slice<'g>(&self, span: Span) -> &'g [u8] {
        debug_assert!(span.range().end <= self.len);
        std::slice::from_raw_parts(self.ptr.as_ptr().add(span.offset), span.len)
    }
}

/// Something that owns a ring control region plus its data bytes.
///
/// # Safety
/// `data()` must cover exactly `ring().capacity()` bytes that stay valid for
/// as long as `self` is borrowed.
pub unsafe trait RingStorage {
    fn ring(&self) -> SharedRing<'_>;

    fn data(&self) -> DataRegion<'_>;

    /// Register a new producer
    fn producer(&self) -> Result<Producer<'_>> {
        Producer::register(self.ring(), self.data())
    }

    /// Attach the single consumer; `ConsumerBusy` if one is attached already
    fn consumer(&self) -> Result<Consumer<'_>> {
        Consumer::attach(self.ring(), self.data())
    }

    fn stats(&self) -> RingStats {
        self.ring().stats()
    }
}

/// Writing side, one per producer thread
///
/// Obtained from [`RingStorage::producer`], which pairs the ring with its own
/// data bytes:
///
/// ```compile_fail
/// use mpscbuf::{Producer, RingBuffer, RingConfig, RingStorage};
///
/// let a = RingBuffer::new(RingConfig::new(64, 1)).unwrap();
/// let b = RingBuffer::new(RingConfig::new(64, 1)).unwrap();
/// let _ = Producer::register(a.ring(), b.data());
/// ```
pub struct Producer<'a> {
    ring: SharedRing<'a>,
    data: DataRegion<'a>,
    slot: &'a ProducerSlot,
    stalled: bool,
}

impl<'a> Producer<'a> {
    pub(crate) fn register(ring: SharedRing<'a>, data: DataRegion<'a>) -> Result<Self> {
        if data.len() != ring.capacity() {
            return Err(RingError::layout(format!(
                "data region of {} bytes for a ring of capacity {}",
                data.len(),
                ring.capacity()
            )));
        }
        let slot = ring.register()?;
        Ok(Self {
            ring,
            data,
            slot,
            stalled: false,
        })
    }

    /// Reserve `len` bytes to fill in place.
    pub fn reserve(&mut self, len: usize) -> Result<WriteGrant<'_, 'a>> {
        if self.stalled {
            return Err(RingError::ProducerStalled);
        }
        let span = self.ring.acquire(self.slot, len)?;
        // SAFETY: acquire just granted us `span` exclusively.
        let buf = unsafe { self.data.slice_mut(span) };
        Ok(WriteGrant {
            producer: self,
            buf,
            span,
            committed: false,
        })
    }

    /// Reserve, copy `bytes` in and publish.
    pub fn write(&mut self, bytes: &[u8]) -> Result<Span> {
        let mut grant = self.reserve(bytes.len())?;
        grant.copy_from_slice(bytes);
        let span = grant.span();
        grant.commit();
        Ok(span)
    }

    pub fn ring(&self) -> SharedRing<'a> {
        self.ring
    }
}

/// An outstanding reservation. Call [`commit`](Self::commit) once filled.
///
/// Dropping it uncommitted leaves the reservation in flight: the consumer
/// will never get past it, and this producer refuses further reservations.
#[must_use = "an uncommitted grant stalls the ring"]
pub struct WriteGrant<'p, 'a> {
    producer: &'p mut Producer<'a>,
    buf: &'p mut [u8],
    span: Span,
    committed: bool,
}

impl WriteGrant<'_, '_> {
    pub fn span(&self) -> Span {
        self.span
    }

    /// Publish the bytes written so far to the consumer.
    pub fn commit(mut self) {
        self.producer.ring.produce(self.producer.slot);
        self.committed = true;
    }
}

impl Deref for WriteGrant<'_, '_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.buf
    }
}

impl DerefMut for WriteGrant<'_, '_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.buf
    }
}

impl Drop for WriteGrant<'_, '_> {
    fn drop(&mut self) {
        if !self.committed {
            self.producer.stalled = true;
            warn!(
                offset = self.span.offset,
                len = self.span.len,
                "write grant dropped without commit, ring is stalled at this reservation"
            );
        }
    }
}

/// Reading side. At most one per ring, enforced through the shared header.
pub struct Consumer<'a> {
    ring: SharedRing<'a>,
    data: DataRegion<'a>,
}

impl<'a> Consumer<'a> {
    pub(crate) fn attach(ring: SharedRing<'a>, data: DataRegion<'a>) -> Result<Self> {
        if data.len() != ring.capacity() {
            return Err(RingError::layout(format!(
                "data region of {} bytes for a ring of capacity {}",
                data.len(),
                ring.capacity()
            )));
        }
        if !ring.try_attach_consumer() {
            return Err(RingError::ConsumerBusy);
        }
        debug!("consumer attached");
        Ok(Self { ring, data })
    }

    /// Next contiguous run of published bytes, if any.
    pub fn read(&mut self) -> Option<ReadGrant<'_, 'a>> {
        // SAFETY: the attach flag makes us the only consumer, and the
        // `&mut self` borrow means no earlier grant is still alive.
        let span = unsafe { self.ring.consume() }?;
        // SAFETY: `span` came from consume.
        let buf = unsafe { self.data.slice(span) };
        Some(ReadGrant {
            consumer: self,
            buf,
            span,
            released: false,
        })
    }

    /// Hand every currently readable run to `f` and release it. Returns the
    /// number of bytes drained.
    pub fn drain<F: FnMut(&[u8])>(&mut self, mut f: F) -> usize {
        let mut total = 0;
        while let Some(grant) = self.read() {
            total += grant.len();
            f(&grant[..]);
        }
        total
    }

    pub fn ring(&self) -> SharedRing<'a> {
        self.ring
    }
}

impl Drop for Consumer<'_> {
    fn drop(&mut self) {
        self.ring.detach_consumer();
        debug!("consumer detached");
    }
}

/// Readable bytes. Released in full on drop unless
/// [`release`](Self::release) says otherwise.
pub struct ReadGrant<'c, 'a> {
    consumer: &'c mut Consumer<'a>,
    buf: &'c [u8],
    span: Span,
    released: bool,
}

impl ReadGrant<'_, '_> {
    pub fn span(&self) -> Span {
        self.span
    }

    /// Release only the first `len` bytes; the rest is returned again by the
    /// next read.
    ///
    /// # Panics
    /// If `len` is larger than the grant.
    pub fn release(mut self, len: usize) {
        assert!(
            len <= self.span.len,
            "release of {} bytes from a {} byte grant",
            len,
            self.span.len
        );
        // SAFETY: the grant is taken by value and `buf` is not read again.
        unsafe { self.consumer.ring.release(len) };
        self.released = true;
    }
}

impl Deref for ReadGrant<'_, '_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf
    }
}

impl Drop for ReadGrant<'_, '_> {
    fn drop(&mut self) {
        if !self.released {
            // SAFETY: last use of `buf`; the span is exactly what consume gave.
            unsafe { self.consumer.ring.release(self.span.len) };
        }
    }
}
