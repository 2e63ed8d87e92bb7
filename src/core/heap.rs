//! In-process ring owning its memory
//!
//! Allocation happens once, here, at construction. Nothing on the
//! reserve/read path allocates.

use std::ptr::NonNull;

use super::handle::{DataRegion, RingStorage};
use super::layout::RingLayout;
use super::ring::SharedRing;
use crate::config::RingConfig;
use crate::error::Result;

#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct CacheLine([u8; 64]);

/// Zeroed, cache-line aligned heap bytes addressed through a raw pointer
pub(crate) struct AlignedRegion {
    ptr: NonNull<CacheLine>,
    lines: usize,
    len: usize,
}

// SAFETY: the region is plain bytes; who may touch which byte is decided by
// the ring living inside it.
unsafe impl Send for AlignedRegion {}
unsafe impl Sync for AlignedRegion {}

impl AlignedRegion {
    pub(crate) fn new(len: usize) -> Self {
        let lines = (len + 63) / 64;
        let boxed = vec![CacheLine([0; 64]); lines.max(1)].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<CacheLine>();
        Self {
            ptr,
            lines: lines.max(1),
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: `len` bytes were allocated and zeroed in `new`.
        unsafe { std::slice::from_raw_parts_mut(self.base().as_ptr(), self.len) }
    }
}

impl Drop for AlignedRegion {
    fn drop(&mut self) {
        // SAFETY: rebuilds the box leaked in `new`.
        unsafe {
            let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.lines);
            drop(Box::from_raw(slice));
        }
    }
}

/// Heap-backed ring for threads of one process.
///
/// ```ignore
/// let rb = RingBuffer::new(RingConfig::new(4096, 4))?;
/// let mut producer = rb.producer()?;
/// producer.write(b"hello")?;
///
/// let mut consumer = rb.consumer()?;
/// let grant = consumer.read().unwrap();
/// assert_eq!(&grant[..], b"hello");
/// ```
pub struct RingBuffer {
    control: AlignedRegion,
    data: AlignedRegion,
    config: RingConfig,
}

impl RingBuffer {
    pub fn new(config: RingConfig) -> Result<Self> {
        let layout = RingLayout::new(&config)?;
        let mut control = AlignedRegion::new(layout.control_size);
        SharedRing::setup(control.as_mut_bytes(), config)?;
        let data = AlignedRegion::new(config.capacity);
        Ok(Self {
            control,
            data,
            config,
        })
    }

    /// Default registry size with the given capacity
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(RingConfig::default().with_capacity(capacity))
    }

    pub fn config(&self) -> RingConfig {
        self.config
    }
}

// SAFETY: the data region is exactly `config.capacity` bytes and lives as
// long as `self`.
unsafe impl RingStorage for RingBuffer {
    fn ring(&self) -> SharedRing<'_> {
        // SAFETY: initialised by `setup` in `new`.
        unsafe { SharedRing::from_raw(self.control.base()) }
    }

    fn data(&self) -> DataRegion<'_> {
        // SAFETY: zeroed allocation owned by `self`.
        unsafe { DataRegion::from_raw(self.data.base(), self.data.len()) }
    }
}
