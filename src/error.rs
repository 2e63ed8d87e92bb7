//! Error types for ring setup, registration and reservation

/// Result type alias for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Every fallible ring operation reports one of these.
///
/// Misuse of the protocol (producing without a reservation, releasing more
/// than was consumed, acquiring on an unregistered slot) is not represented
/// here: it is a contract violation caught by debug assertions only.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Capacity is zero or does not fit the position arithmetic
    #[error("invalid capacity: {capacity} (must be between 1 and {max})")]
    InvalidCapacity { capacity: usize, max: usize },

    /// Some other configuration value is out of range
    #[error("invalid config: {parameter} - {message}")]
    InvalidConfig {
        parameter: &'static str,
        message: String,
    },

    /// Every registry entry is already claimed by a producer
    #[error("producer registry full: all {max_producers} slots registered")]
    RegistryFull { max_producers: usize },

    /// Not enough free space for the reservation right now
    #[error("insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: usize, available: usize },

    /// The memory handed in cannot hold (or does not contain) a ring
    #[error("invalid layout: {message}")]
    Layout { message: String },

    /// This producer abandoned a reservation earlier; the ring cannot
    /// advance past it
    #[error("producer stalled by an abandoned reservation")]
    ProducerStalled,

    /// Another consumer is already attached to this ring
    #[error("consumer already attached")]
    ConsumerBusy,

    /// I/O errors from file-backed storage
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fieldless classification of [`RingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCapacity,
    InvalidConfig,
    RegistryFull,
    InsufficientSpace,
    InvalidLayout,
    ProducerStalled,
    ConsumerBusy,
    Io,
}

impl RingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCapacity { .. } => ErrorKind::InvalidCapacity,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::RegistryFull { .. } => ErrorKind::RegistryFull,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::Layout { .. } => ErrorKind::InvalidLayout,
            Self::ProducerStalled => ErrorKind::ProducerStalled,
            Self::ConsumerBusy => ErrorKind::ConsumerBusy,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Only a full ring is transient; the caller may retry, drop or back off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientSpace { .. })
    }

    pub(crate) fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
        }
    }

    pub(crate) fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            context: format!("{}: {}", context, source),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = RingError::InsufficientSpace {
            requested: 10,
            available: 3,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
        assert!(err.is_retryable());

        let err = RingError::RegistryFull { max_producers: 4 };
        assert_eq!(err.kind(), ErrorKind::RegistryFull);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = RingError::InvalidCapacity {
            capacity: 0,
            max: 16,
        };
        assert_eq!(
            err.to_string(),
            "invalid capacity: 0 (must be between 1 and 16)"
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = RingError::from_io(io, "open ring file");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("open ring file"));
    }
}
