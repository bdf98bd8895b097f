//! Error types for both sides of the boundary
//!
//! `Trap` is what unwinds a module call (a host exception escaping through the
//! module, or the module raising one itself). `BridgeError` is what the facade
//! hands back to host callers once a trap or a returned error has been decoded.

use std::fmt;

use crate::handles::Handle;
use crate::value::HostError;

/// Linear memory access failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Access outside the current memory size
    OutOfBounds { ptr: u32, len: u32, size: usize },
    /// A view was read after the buffer it was created over was replaced
    Detached,
    /// Growth beyond the configured maximum
    OutOfMemory { requested_pages: u32, max_pages: u32 },
    /// Element access not aligned to the view's element width
    Misaligned { ptr: u32, align: u32 },
    /// Shadow stack pushed below zero or popped past its top
    StackOverflow,
    /// `free`/`realloc` on a pointer the allocator never handed out
    UnknownAllocation { ptr: u32 },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfBounds { ptr, len, size } => write!(
                f,
                "memory access out of bounds: {}..{} (memory size {})",
                ptr,
                *ptr as u64 + *len as u64,
                size
            ),
            MemoryError::Detached => write!(f, "memory view is detached (memory has grown)"),
            MemoryError::OutOfMemory { requested_pages, max_pages } => write!(
                f,
                "cannot grow memory to {} pages (maximum {})",
                requested_pages, max_pages
            ),
            MemoryError::Misaligned { ptr, align } => {
                write!(f, "pointer 0x{:08x} is not {}-byte aligned", ptr, align)
            }
            MemoryError::StackOverflow => write!(f, "shadow stack overflow"),
            MemoryError::UnknownAllocation { ptr } => {
                write!(f, "no live allocation at 0x{:08x}", ptr)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// Value conversion failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Strict decode of a module string failed
    InvalidUtf8 { ptr: u32, len: u32, valid_up_to: usize },
    /// Paired buffers (e.g. touch x/y coordinates) disagree in length
    LengthMismatch { left: usize, right: usize },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::InvalidUtf8 { ptr, len, valid_up_to } => write!(
                f,
                "invalid UTF-8 in module string at 0x{:08x} (len {}, valid up to {})",
                ptr, len, valid_up_to
            ),
            MarshalError::LengthMismatch { left, right } => {
                write!(f, "paired buffers differ in length: {} vs {}", left, right)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

/// Unwinds a module call back to the host
#[derive(Debug, Clone)]
pub enum Trap {
    /// The module raised an error with a decoded message
    Throw(HostError),
    /// A host exception the module chose to re-raise; the value is still in the handle table
    Exception(Handle),
    /// A capability was handed a handle of the wrong type
    TypeError(String),
    Memory(MemoryError),
    Marshal(MarshalError),
}

impl From<MemoryError> for Trap {
    fn from(e: MemoryError) -> Self {
        Trap::Memory(e)
    }
}

impl From<MarshalError> for Trap {
    fn from(e: MarshalError) -> Self {
        Trap::Marshal(e)
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::Throw(e) => write!(f, "{}", e),
            Trap::Exception(h) => write!(f, "host exception (handle {})", h.raw()),
            Trap::TypeError(msg) => write!(f, "TypeError: {}", msg),
            Trap::Memory(e) => write!(f, "{}", e),
            Trap::Marshal(e) => write!(f, "{}", e),
        }
    }
}

/// Errors surfaced to host callers of the facade
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The module rejected the graphics context or failed to set up
    Construction(String),
    /// A host exception relayed back through the module
    Relayed(String),
    /// The module call unwound
    Trap(String),
    Memory(MemoryError),
    Marshal(MarshalError),
    /// Method called on an instance whose constructor has not completed
    NotConstructed,
    /// Method called on an instance after `release`
    Released,
    Config(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Construction(msg) => write!(f, "construction failed: {}", msg),
            BridgeError::Relayed(msg) => write!(f, "{}", msg),
            BridgeError::Trap(msg) => write!(f, "module trapped: {}", msg),
            BridgeError::Memory(e) => write!(f, "{}", e),
            BridgeError::Marshal(e) => write!(f, "{}", e),
            BridgeError::NotConstructed => write!(f, "instance is not constructed"),
            BridgeError::Released => write!(f, "instance has been released"),
            BridgeError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<MemoryError> for BridgeError {
    fn from(e: MemoryError) -> Self {
        BridgeError::Memory(e)
    }
}

impl From<MarshalError> for BridgeError {
    fn from(e: MarshalError) -> Self {
        BridgeError::Marshal(e)
    }
}
