//! Crate-wide error taxonomy
//!
//! Individual components (CPU binding, memory binding, CPU kinds, distrib)
//! define their own narrower error enums and convert into [`Error`] via
//! `From`, so call sites that want the coarse taxonomy get it through `?`
//! while call sites that want the precise component error can match on it
//! before conversion.

use crate::{cpu::binding::CpuBindingError, cpukinds::CpuKindQueryError, memory::binding::MemoryBindingError};
use std::fmt;
use thiserror::Error;

/// Coarse error taxonomy shared by every component of this crate
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// Malformed input: empty cpuset where required, unknown type, unknown flag bits
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Named object/attribute/kind does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not implemented on this platform, or not implemented by this
    /// topology's backend set
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// OS refused a binding request
    #[error("denied: {0}")]
    Denied(String),

    /// Mutation attempted while the topology is being iterated in a way that
    /// forbids it
    ///
    /// Only raised in debug builds; the underlying check is compiled out of
    /// release builds, mirroring the "(debug mode only)" qualifier on this
    /// variant.
    #[error("topology is busy: {0}")]
    Busy(String),

    /// Allocation failed
    #[error("out of memory")]
    NoMem,

    /// Operation completed but not exactly as requested
    #[error("partial result: {0}")]
    Partial(String),

    /// A discovery backend returned an error, recovered by skipping it, and
    /// is only surfaced here because *every* backend failed
    #[error("every discovery backend failed: {0}")]
    BackendFailure(String),
}

impl From<CpuBindingError> for Error {
    fn from(e: CpuBindingError) -> Self {
        match &e {
            CpuBindingError::BadObject(_) => Error::Unsupported(e.to_string()),
            CpuBindingError::BadFlags(_) => Error::InvalidArgument(e.to_string()),
            CpuBindingError::BadCpuSet(_, _) => Error::Denied(e.to_string()),
        }
    }
}

impl From<MemoryBindingError> for Error {
    fn from(e: MemoryBindingError) -> Self {
        match &e {
            MemoryBindingError::Unsupported => Error::Unsupported(e.to_string()),
            MemoryBindingError::BadSet => Error::Denied(e.to_string()),
            MemoryBindingError::AllocationFailed => Error::NoMem,
            MemoryBindingError::BadFlags(_) => Error::InvalidArgument(e.to_string()),
            MemoryBindingError::MixedResults => Error::Partial(e.to_string()),
        }
    }
}

impl From<CpuKindQueryError> for Error {
    fn from(e: CpuKindQueryError) -> Self {
        Error::NotFound(e.to_string())
    }
}

/// Error produced by a flag validity check
///
/// Generic over the flag type so that each component can report exactly
/// which flag combination it rejected while still sharing one shape.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlagsError<Flags>(pub Flags);

impl<Flags: fmt::Debug> fmt::Display for FlagsError<Flags> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flags {:?} are not valid in this context", self.0)
    }
}

impl<Flags: fmt::Debug> std::error::Error for FlagsError<Flags> {}
