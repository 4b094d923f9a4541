//! Heap error types

use thiserror::Error;

/// Result type for heap operations
pub type HeapResult<T> = Result<T, HeapError>;

/// Errors raised by the allocator and collector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The OS refused a page mapping or a large allocation failed
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Allocation named a layout that was never registered
    #[error("unknown object layout {0}")]
    UnknownLayout(u16),

    /// An object header or poisoned free slot failed validation
    #[error("heap corruption at {addr:#x}: {reason}")]
    Corruption { addr: usize, reason: &'static str },

    /// The verification trace disagrees with the marking trace
    #[error("heap verification mismatch: marked {marked} objects, traced {traced} (first difference at {first_difference:#x})")]
    VerificationMismatch {
        marked: usize,
        traced: usize,
        first_difference: usize,
    },

    /// An earlier collection hit a fatal error; the heap refuses further work
    #[error("heap is poisoned by an earlier fatal collection error")]
    Poisoned,
}

impl HeapError {
    /// Corruption and verification failures leave the heap unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HeapError::Corruption { .. }
                | HeapError::VerificationMismatch { .. }
                | HeapError::Poisoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(!HeapError::OutOfMemory { requested: 64 }.is_fatal());
        assert!(HeapError::Corruption {
            addr: 0x1000,
            reason: "bad magic"
        }
        .is_fatal());
        assert!(HeapError::VerificationMismatch {
            marked: 3,
            traced: 2,
            first_difference: 0x2000
        }
        .is_fatal());
        assert!(HeapError::Poisoned.is_fatal());
    }

    #[test]
    fn test_display() {
        let e = HeapError::Corruption {
            addr: 0xff0,
            reason: "write after free",
        };
        assert_eq!(e.to_string(), "heap corruption at 0xff0: write after free");
    }
}
