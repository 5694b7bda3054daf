//! CPU binding
//!
//! This module hosts the flags and error types for [`Topology`]'s CPU
//! binding methods (`set_cpubind`, `set_thread_cpubind`, `set_proc_cpubind`,
//! and their `get_*`/`last_cpu_location` counterparts); the methods
//! themselves live on [`Topology`] so callers don't need to import this
//! module to use them.
//!
//! Most of this module's functionality is exposed via methods of the
//! [`Topology`] struct (§4.8 of the design). The module itself only hosts
//! type definitions related to that functionality, mirroring the teacher's
//! own `cpu::binding` layout.

use crate::{
    binding::BindTarget,
    bitmap::CpuSet,
    error::FlagsError,
    topology::Topology,
};
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// CPU binding flags
    ///
    /// Unlike the teacher's C-FFI-bound version, the binding *target*
    /// (current process, a specific thread, a specific PID...) is selected
    /// by calling a different [`Topology`] method rather than by OR-ing a
    /// target flag in here; these bits only refine how that target's
    /// binding is requested.
    #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
    pub struct CpuBindingFlags: u32 {
        /// Request strict binding from the OS
        ///
        /// By default, when the designated CPUs are all busy while other
        /// CPUs are idle, the OS may run the task elsewhere to let it make
        /// progress. Strict binding means the task never runs anywhere but
        /// the designated CPUs, even if that means waiting.
        const STRICT = 1 << 0;

        /// Avoid any effect on memory binding
        ///
        /// On some operating systems, a CPU binding call also binds memory
        /// to the corresponding NUMA node; this flag asks the binding call
        /// to avoid using any OS primitive that would do so, at the cost of
        /// potentially failing on platforms that cannot separate the two.
        const NO_MEMORY_BINDING = 1 << 1;
    }
}

impl Topology {
    /// Bind the current process to `set`
    #[doc(alias = "hwloc_set_cpubind")]
    pub fn set_cpubind(&self, set: &CpuSet, flags: CpuBindingFlags) -> Result<(), CpuBindingError> {
        self.validate_cpuset(set, BindTarget::ThisProcess)?;
        self.hooks().set_cpubind(BindTarget::ThisProcess, set, flags)
    }

    /// Current CPU binding of this process
    #[doc(alias = "hwloc_get_cpubind")]
    pub fn cpubind(&self, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        self.hooks().get_cpubind(BindTarget::ThisProcess, flags)
    }

    /// Bind the current thread to `set`
    #[doc(alias = "hwloc_set_thread_cpubind")]
    pub fn set_thread_cpubind(&self, set: &CpuSet, flags: CpuBindingFlags) -> Result<(), CpuBindingError> {
        self.validate_cpuset(set, BindTarget::ThisThread)?;
        self.hooks().set_cpubind(BindTarget::ThisThread, set, flags)
    }

    /// Current CPU binding of this thread
    #[doc(alias = "hwloc_get_thread_cpubind")]
    pub fn thread_cpubind(&self, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        self.hooks().get_cpubind(BindTarget::ThisThread, flags)
    }

    /// Bind process `pid` to `set`
    #[doc(alias = "hwloc_set_proc_cpubind")]
    pub fn set_proc_cpubind(&self, pid: u32, set: &CpuSet, flags: CpuBindingFlags) -> Result<(), CpuBindingError> {
        self.validate_cpuset(set, BindTarget::Process(pid))?;
        self.hooks().set_cpubind(BindTarget::Process(pid), set, flags)
    }

    /// Current CPU binding of process `pid`
    #[doc(alias = "hwloc_get_proc_cpubind")]
    pub fn proc_cpubind(&self, pid: u32, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        self.hooks().get_cpubind(BindTarget::Process(pid), flags)
    }

    /// Bind thread `tid` to `set`
    #[doc(alias = "hwloc_set_thread_cpubind")]
    pub fn bind_thread(&self, tid: u64, set: &CpuSet, flags: CpuBindingFlags) -> Result<(), CpuBindingError> {
        self.validate_cpuset(set, BindTarget::Thread(tid))?;
        self.hooks().set_cpubind(BindTarget::Thread(tid), set, flags)
    }

    /// Current CPU binding of thread `tid`
    #[doc(alias = "hwloc_get_thread_cpubind")]
    pub fn thread_binding(&self, tid: u64, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        self.hooks().get_cpubind(BindTarget::Thread(tid), flags)
    }

    /// CPUs the current process or thread last ran on
    ///
    /// The OS may have since moved the task elsewhere according to its
    /// binding, so this may already be stale by the time it returns.
    #[doc(alias = "hwloc_get_last_cpu_location")]
    pub fn last_cpu_location(&self, target: BindTarget, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        self.hooks().last_cpu_location(target, flags)
    }

    fn validate_cpuset(&self, set: &CpuSet, target: BindTarget) -> Result<(), CpuBindingError> {
        if set.is_empty() {
            return Err(CpuBindingError::BadCpuSet(target, set.clone()));
        }
        if !set.intersects(self.allowed_cpuset()) {
            return Err(CpuBindingError::BadCpuSet(target, set.clone()));
        }
        Ok(())
    }
}

/// Errors that can occur when binding processes or threads to CPU sets
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CpuBindingError {
    /// Cannot query or set the CPU binding of this kind of object at all
    ///
    /// This might not be reported if [`CpuBindingFlags::STRICT`] is not set;
    /// implementations are allowed to fall back to a similar operation
    /// instead (smaller binding set, side effects) when the exact request
    /// is not supported.
    #[error("cannot query or set the CPU binding of {0}")]
    BadObject(BindTarget),

    /// Requested flags are not valid in this context
    #[error(transparent)]
    BadFlags(#[from] FlagsError<CpuBindingFlags>),

    /// Cannot bind the target object to the requested CPU set
    ///
    /// Raised for an empty set, a set outside `allowed_cpuset`, or an OS
    /// refusal (e.g. binding to more than one NUMA node when the OS only
    /// supports single-PU binding).
    #[error("cannot bind {0} to {1}")]
    BadCpuSet(BindTarget, CpuSet),
}

impl From<CpuBindingFlags> for CpuBindingError {
    fn from(value: CpuBindingFlags) -> Self {
        Self::BadFlags(FlagsError(value))
    }
}
