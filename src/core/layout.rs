//! Memory layout of the ring control region
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RingHeader (cursors, end marker, registry n) │
//! ├──────────────────────────────────────────────┤
//! │ ProducerSlot × max_producers (64 B each)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The data bytes live elsewhere, supplied by the caller. Sizes depend on
//! the build (cache line padding, pointer width) so callers must ask for
//! them instead of hard-coding.

use std::mem;

use super::ring::RingHeader;
use super::slot::ProducerSlot;
use crate::config::RingConfig;
use crate::error::Result;

/// Keeps hot cursors on their own cache line (64 bytes on x86-64)
#[repr(C, align(64))]
pub(crate) struct CacheLinePadded<T> {
    pub(crate) value: T,
}

impl<T> CacheLinePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

/// Byte sizes of the two structures a caller places in its own storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    /// One ring control header
    pub ring: usize,
    /// One producer registry entry
    pub slot: usize,
}

/// Sizes of the ring header and of one producer slot.
pub fn describe_sizes() -> Sizes {
    Sizes {
        ring: mem::size_of::<RingHeader>(),
        slot: mem::size_of::<ProducerSlot>(),
    }
}

/// Full placement of one ring described by a [`RingConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Bytes for header plus registry
    pub control_size: usize,
    /// Required alignment of the control region
    pub align: usize,
    /// Data bytes (the ring capacity)
    pub data_size: usize,
}

impl RingLayout {
    pub fn new(config: &RingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::for_producers(config.max_producers, config.capacity))
    }

    pub(crate) fn for_producers(max_producers: usize, capacity: usize) -> Self {
        let sizes = describe_sizes();
        Self {
            control_size: sizes.ring + sizes.slot * max_producers,
            align: mem::align_of::<RingHeader>(),
            data_size: capacity,
        }
    }

    /// Offset of the first registry entry from the start of the region
    pub(crate) const fn slots_offset() -> usize {
        mem::size_of::<RingHeader>()
    }

    /// Control region rounded up to alignment, followed by the data; used
    /// when both share one mapping.
    pub fn combined_size(&self) -> usize {
        self.data_offset() + self.data_size
    }

    pub fn data_offset(&self) -> usize {
        (self.control_size + self.align - 1) & !(self.align - 1)
    }
}
