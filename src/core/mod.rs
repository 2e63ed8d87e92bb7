//! Core module: lock-free MPSC byte ring
//!
//! Design principles:
//! - Zero-copy: producers write straight into storage, the consumer reads it in place
//! - Lock-free: atomics only, no Mutex/RwLock, no blocking on a full ring
//! - No allocation: the protocol works on memory handed in by the caller

mod handle;
mod heap;
mod layout;
mod mmap_storage;
mod ring;
mod slot;

pub use handle::{Consumer, DataRegion, Producer, ReadGrant, RingStorage, WriteGrant};
pub use heap::RingBuffer;
pub use layout::{describe_sizes, RingLayout, Sizes};
pub use mmap_storage::MmapRing;
pub use ring::{RingStats, SharedRing, Span};
pub use slot::ProducerSlot;
