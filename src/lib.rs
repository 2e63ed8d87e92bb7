//! Lock-free multi-producer single-consumer ring buffer for variable-length
//! records.
//!
//! Many producers reserve contiguous byte ranges concurrently, fill them in
//! place and publish them in any order. One consumer drains fully published
//! bytes in reservation order, never past a range still being written.
//!
//! Layers:
//! - [`SharedRing`]: the raw reserve/produce/consume/release protocol over a
//!   caller-provided control region; hands out offsets only
//! - [`RingBuffer`] / [`MmapRing`]: owners of control and data memory, in
//!   process or in a shared file
//! - [`Producer`] / [`Consumer`]: safe handles giving byte slices into storage
//!
//! A producer that reserves and never publishes stalls the ring permanently;
//! see [`WriteGrant`].

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{RingConfig, MAX_CAPACITY};
pub use crate::core::{
    describe_sizes, Consumer, DataRegion, MmapRing, Producer, ProducerSlot, ReadGrant,
    RingBuffer, RingLayout, RingStats, RingStorage, SharedRing, Sizes, Span, WriteGrant,
};
pub use crate::error::{ErrorKind, Result, RingError};
