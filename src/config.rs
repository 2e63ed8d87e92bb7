//! Ring configuration

use crate::error::{Result, RingError};

/// Largest capacity the position arithmetic accepts.
///
/// Physical offsets are kept within 32 bits; logical positions are `u64`
/// and monotonic, which at 10 GB/s takes decades to overflow.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

/// Setup parameters for one ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Usable data bytes
    pub capacity: usize,
    /// Size of the producer registry, fixed for the ring's lifetime
    pub max_producers: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024,
            max_producers: 16,
        }
    }
}

impl RingConfig {
    pub fn new(capacity: usize, max_producers: usize) -> Self {
        Self {
            capacity,
            max_producers,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_producers(mut self, max_producers: usize) -> Self {
        self.max_producers = max_producers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(RingError::InvalidCapacity {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        if self.max_producers == 0 {
            return Err(RingError::InvalidConfig {
                parameter: "max_producers",
                message: "registry needs at least one slot".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_is_valid() {
        assert!(RingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = RingConfig::default().with_capacity(0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCapacity);

        if let Some(too_big) = MAX_CAPACITY.checked_add(1) {
            let err = RingConfig::default()
                .with_capacity(too_big)
                .validate()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidCapacity);
        }

        let err = RingConfig::default()
            .with_max_producers(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
