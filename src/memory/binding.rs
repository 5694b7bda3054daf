//! Memory binding
//!
//! Flags, policies, and error types for [`Topology::set_membind`]/
//! [`Topology::membind`]. See §4.8 of the design for the overall contract;
//! like [`crate::cpu::binding`], the methods live on [`Topology`] rather than
//! on types in this module.

use crate::{binding::BindTarget, bitmap::NodeSet, error::FlagsError, topology::Topology};
use bitflags::bitflags;
use thiserror::Error;

/// Memory binding policy
///
/// Mirrors the four policies `hwloc_membind_policy_t` exposes (dropping
/// `MIXED`, which is only ever a *query* result describing a region bound by
/// several different policies, never a request policy a caller sets).
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum MemoryBindingPolicy {
    /// Reset the binding policy to the system default
    #[default]
    Default,
    /// Allocate memory lazily, on the NUMA node of the thread that first
    /// touches it
    FirstTouch,
    /// Allocate memory on the specified nodes immediately
    Bind,
    /// Spread each allocation across the specified nodes round-robin
    Interleave,
    /// Like `FirstTouch`, but may migrate pages toward the node of later
    /// accesses
    NextTouch,
}

bitflags! {
    /// Memory binding flags
    #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
    pub struct MemoryBindingFlags: u32 {
        /// Apply the policy to all threads of a (possibly multithreaded)
        /// process, rather than just the calling thread
        ///
        /// Mutually exclusive with [`THREAD`](Self::THREAD).
        const PROCESS = 1 << 0;

        /// Apply the policy to the calling thread only
        ///
        /// Mutually exclusive with [`PROCESS`](Self::PROCESS).
        const THREAD = 1 << 1;

        /// Fail rather than fall back to an approximation of the request
        const STRICT = 1 << 2;

        /// Migrate pages already allocated to conform to the new policy
        const MIGRATE = 1 << 3;

        /// Interpret the given set as a node set rather than a CPU set
        ///
        /// Without this flag the set passed to `set_membind`/`membind` is a
        /// [`crate::bitmap::CpuSet`] translated to its covering node set;
        /// with it, the set is already a [`NodeSet`] and used as-is.
        const BY_NODE_SET = 1 << 4;
    }
}

impl Topology {
    /// Set the default memory binding policy for the calling process
    #[doc(alias = "hwloc_set_membind")]
    pub fn set_membind(
        &self,
        set: &NodeSet,
        policy: MemoryBindingPolicy,
        flags: MemoryBindingFlags,
    ) -> Result<(), MemoryBindingError> {
        let target = membind_target(flags)?;
        self.validate_nodeset(set)?;
        self.hooks()
            .set_membind(target, set, policy, flags)
    }

    /// Query the default memory binding policy and node set for the calling
    /// process
    #[doc(alias = "hwloc_get_membind")]
    pub fn membind(
        &self,
        flags: MemoryBindingFlags,
    ) -> Result<(NodeSet, MemoryBindingPolicy), MemoryBindingError> {
        let target = membind_target(flags)?;
        self.hooks().get_membind(target, flags)
    }

    fn validate_nodeset(&self, set: &NodeSet) -> Result<(), MemoryBindingError> {
        if set.is_empty() {
            return Err(MemoryBindingError::BadSet);
        }
        if !set.intersects(self.allowed_nodeset()) {
            return Err(MemoryBindingError::BadSet);
        }
        Ok(())
    }
}

fn membind_target(flags: MemoryBindingFlags) -> Result<BindTarget, MemoryBindingError> {
    if flags.contains(MemoryBindingFlags::PROCESS | MemoryBindingFlags::THREAD) {
        return Err(MemoryBindingError::BadFlags(FlagsError(flags)));
    }
    Ok(if flags.contains(MemoryBindingFlags::THREAD) {
        BindTarget::ThisThread
    } else {
        BindTarget::ThisProcess
    })
}

/// Errors that can occur when binding memory
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MemoryBindingError {
    /// This operation is not implemented on this platform or by this
    /// topology's backend set
    #[error("memory binding is not supported here")]
    Unsupported,

    /// The requested node set is empty or not a subset of `allowed_nodeset`
    #[error("invalid node set for memory binding")]
    BadSet,

    /// Requested flags are not valid in this context
    #[error(transparent)]
    BadFlags(#[from] FlagsError<MemoryBindingFlags>),

    /// The OS failed to allocate memory under the requested policy
    #[error("memory allocation under the requested policy failed")]
    AllocationFailed,

    /// The request was only partially satisfied (some threads of a process
    /// ended up with a binding different from the requested one, and
    /// [`MemoryBindingFlags::STRICT`] was not set)
    #[error("memory binding request was only partially satisfied")]
    MixedResults,
}
