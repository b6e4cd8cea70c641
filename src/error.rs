//! Errors reported by fallible constructors and scratch providers.
//!
//! The multiplication entry points never return these. A violated
//! precondition or an exhausted provider aborts the call with a panic whose
//! message is the error's `Display` text.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GemmError {
    /// A scratch provider could not supply memory.
    AllocationError {
        /// Bytes requested.
        requested_size: usize,
        /// Alignment requested, in bytes.
        requested_alignment: usize,
        message: String,
    },
    /// A scratch request has no valid memory layout.
    LayoutError {
        /// Floats requested.
        capacity: usize,
        message: String,
    },
    /// A matrix view, cache geometry or operand shape is malformed.
    ValidationError { message: String },
}

impl fmt::Display for GemmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GemmError::AllocationError {
                requested_size,
                requested_alignment,
                message,
            } => write!(
                f,
                "scratch of {} bytes ({}-byte aligned) unavailable: {}",
                requested_size, requested_alignment, message
            ),
            GemmError::LayoutError { capacity, message } => {
                write!(f, "no scratch layout for {} floats: {}", capacity, message)
            }
            GemmError::ValidationError { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for GemmError {}

pub type Result<T> = std::result::Result<T, GemmError>;

pub fn allocation_error(bytes: usize, alignment: usize, message: impl Into<String>) -> GemmError {
    GemmError::AllocationError {
        requested_size: bytes,
        requested_alignment: alignment,
        message: message.into(),
    }
}

pub fn layout_error(capacity: usize, message: impl Into<String>) -> GemmError {
    GemmError::LayoutError {
        capacity,
        message: message.into(),
    }
}

pub fn validation_error(message: impl Into<String>) -> GemmError {
    GemmError::ValidationError {
        message: message.into(),
    }
}
