//! Memory-mapped ring shared between processes
//!
//! One file holds the control region followed by the data bytes:
//! - Every process mapping the file sees the same cursors and registry
//! - Producers in different processes reserve from the same ring
//! - `open` validates the header instead of re-initialising it
//!
//! The consumer flag lives in the file too. A consumer process that dies
//! without detaching leaves it set until the file is re-created.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;

use tracing::debug;

use super::handle::{DataRegion, RingStorage};
use super::layout::RingLayout;
use super::ring::SharedRing;
use crate::config::RingConfig;
use crate::error::{Result, RingError};

/// File-backed ring
pub struct MmapRing {
    // Keeps the mapping alive; ring access goes through `base`
    mmap: MmapMut,
    base: NonNull<u8>,
    layout: RingLayout,
}

// SAFETY: the mapping is shared memory coordinated by the ring protocol.
unsafe impl Send for MmapRing {}
unsafe impl Sync for MmapRing {}

impl MmapRing {
    /// Create (or overwrite) `path` and initialise a fresh ring in it.
    pub fn create<P: AsRef<Path>>(path: P, config: RingConfig) -> Result<Self> {
        let path = path.as_ref();
        let layout = RingLayout::new(&config)?;
        let total_size = layout.combined_size();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| RingError::from_io(e, "create ring file"))?;
        file.set_len(total_size as u64)
            .map_err(|e| RingError::from_io(e, "size ring file"))?;

        // SAFETY: file opened read/write; other mappings of it are expected
        // and coordinated through the ring protocol.
        let mut mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file) }
            .map_err(|e| RingError::from_io(e, "map ring file"))?;

        SharedRing::setup(&mut mmap[..layout.control_size], config)?;
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| RingError::layout("null mapping"))?;

        debug!(path = %path.display(), total_size, "ring file created");
        Ok(Self {
            mmap,
            base,
            layout,
        })
    }

    /// Map an existing ring file created by [`create`](Self::create).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RingError::from_io(e, "open ring file"))?;
        let len = file
            .metadata()
            .map_err(|e| RingError::from_io(e, "stat ring file"))?
            .len() as usize;

        // SAFETY: as in `create`.
        let mut mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|e| RingError::from_io(e, "map ring file"))?;
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| RingError::layout("null mapping"))?;

        // SAFETY: the mapping stays alive inside the returned value.
        let ring = unsafe { SharedRing::attach(base.as_ptr(), len) }?;
        let layout = RingLayout::for_producers(ring.max_producers(), ring.capacity());
        if len < layout.combined_size() {
            return Err(RingError::layout(format!(
                "ring file of {} bytes truncated, need {}",
                len,
                layout.combined_size()
            )));
        }

        debug!(path = %path.display(), capacity = ring.capacity(), "ring file opened");
        Ok(Self {
            mmap,
            base,
            layout,
        })
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// Flush the mapping to disk
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| RingError::from_io(e, "flush ring file"))
    }
}

// SAFETY: the data bytes follow the control region inside the same mapping,
// `layout.data_size` (= capacity) bytes long.
unsafe impl RingStorage for MmapRing {
    fn ring(&self) -> SharedRing<'_> {
        // SAFETY: validated in `create` / `open`.
        unsafe { SharedRing::from_raw(self.base) }
    }

    fn data(&self) -> DataRegion<'_> {
        // SAFETY: in bounds per the size check in `create` / `open`.
        unsafe {
            let ptr = NonNull::new_unchecked(self.base.as_ptr().add(self.layout.data_offset()));
            DataRegion::from_raw(ptr, self.layout.data_size)
        }
    }
}
