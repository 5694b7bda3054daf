//! OS binding hooks
//!
//! The binding façade in [`crate::cpu::binding`] and [`crate::memory::binding`]
//! validates requests against the topology and then dispatches to a
//! platform-specific [`BindingHooks`] implementation. This is the Rust
//! realization of the teacher's function-pointer struct of OS callbacks: one
//! object, installed on the topology during CPU-phase discovery, rather than
//! a dozen individually-registered function pointers.

use crate::{
    bitmap::{CpuSet, NodeSet},
    cpu::binding::{CpuBindingError, CpuBindingFlags},
    memory::binding::{MemoryBindingError, MemoryBindingFlags, MemoryBindingPolicy},
};
use std::fmt;

/// Process identifier, as used by [`BindTarget::Process`]
pub type ProcessId = u32;

/// Thread identifier, as used by [`BindTarget::Thread`]
pub type ThreadId = u64;

/// The process/thread a binding operation applies to
///
/// Generalizes the teacher's `CpuBoundObject`, which only distinguished
/// "this program" from "some other process/thread", to the four targets the
/// full façade (§4.8) exposes.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum BindTarget {
    /// The calling process, treating it as a single-threaded whole
    ThisProcess,
    /// The calling thread specifically
    ThisThread,
    /// A process elsewhere in the system, identified by PID
    Process(ProcessId),
    /// A thread elsewhere in the system, identified by TID
    Thread(ThreadId),
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThisProcess => f.write_str("the current process"),
            Self::ThisThread => f.write_str("the current thread"),
            Self::Process(pid) => write!(f, "process {pid}"),
            Self::Thread(tid) => write!(f, "thread {tid}"),
        }
    }
}

/// Platform-specific implementation of the binding façade's OS calls
///
/// A platform module implements this trait and registers an instance on the
/// topology during CPU-phase discovery (§6, §9: "plugin loading is layered
/// above, not under, the topology API"). Every method defaults to
/// [`CpuBindingError::BadObject`]/[`MemoryBindingError::Unsupported`] so a
/// partial implementation (e.g. one that only supports `ThisProcess`) is
/// still total.
pub trait BindingHooks: Send + Sync {
    fn set_cpubind(
        &self,
        target: BindTarget,
        set: &CpuSet,
        flags: CpuBindingFlags,
    ) -> Result<(), CpuBindingError> {
        let _ = (set, flags);
        Err(CpuBindingError::BadObject(target))
    }

    fn get_cpubind(&self, target: BindTarget, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
        let _ = flags;
        Err(CpuBindingError::BadObject(target))
    }

    fn last_cpu_location(
        &self,
        target: BindTarget,
        flags: CpuBindingFlags,
    ) -> Result<CpuSet, CpuBindingError> {
        let _ = flags;
        Err(CpuBindingError::BadObject(target))
    }

    fn set_membind(
        &self,
        target: BindTarget,
        set: &NodeSet,
        policy: MemoryBindingPolicy,
        flags: MemoryBindingFlags,
    ) -> Result<(), MemoryBindingError> {
        let _ = (target, set, policy, flags);
        Err(MemoryBindingError::Unsupported)
    }

    fn get_membind(
        &self,
        target: BindTarget,
        flags: MemoryBindingFlags,
    ) -> Result<(NodeSet, MemoryBindingPolicy), MemoryBindingError> {
        let _ = (target, flags);
        Err(MemoryBindingError::Unsupported)
    }
}

/// A [`BindingHooks`] that implements nothing, used for topologies that do
/// not describe the machine the calling process is running on
///
/// Installed whenever [`crate::topology::flags::BuildFlags::IS_THIS_SYSTEM`]
/// is not set, since binding a foreign topology's PUs to the local OS is
/// meaningless.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullBindingHooks;

impl BindingHooks for NullBindingHooks {}

#[cfg(unix)]
pub use unix::UnixBindingHooks;

#[cfg(unix)]
mod unix {
    use super::*;
    use libc::{cpu_set_t, pid_t, sched_getaffinity, sched_setaffinity, CPU_ISSET, CPU_SET, CPU_SETSIZE, CPU_ZERO};
    use std::mem::{size_of, MaybeUninit};

    /// Linux/BSD binding hooks built on `sched_setaffinity`/`sched_getaffinity`
    ///
    /// Memory binding (`set_mempolicy`/`mbind`) is NUMA-policy territory that
    /// `libc` does not wrap and that this crate's dependency stack has no
    /// `libnuma`-equivalent crate for; rather than reach for raw,
    /// architecture-specific `syscall(2)` numbers this implementation leaves
    /// `set_membind`/`get_membind` at the trait's default `Unsupported`,
    /// which keeps every call site total. See `DESIGN.md` for the tradeoff.
    #[derive(Copy, Clone, Debug, Default)]
    pub struct UnixBindingHooks;

    fn cpuset_to_mask(set: &CpuSet) -> Result<cpu_set_t, ()> {
        let mut mask: cpu_set_t = unsafe { MaybeUninit::zeroed().assume_init() };
        unsafe { CPU_ZERO(&mut mask) };
        let max = CPU_SETSIZE as usize;
        let mut any = false;
        for i in 0..max {
            if set.is_set(i as u32) {
                unsafe { CPU_SET(i, &mut mask) };
                any = true;
            }
        }
        if any {
            Ok(mask)
        } else {
            Err(())
        }
    }

    fn mask_to_cpuset(mask: &cpu_set_t) -> CpuSet {
        let mut set = CpuSet::new();
        for i in 0..(CPU_SETSIZE as usize) {
            if unsafe { CPU_ISSET(i, mask) } {
                set.set(i as u32);
            }
        }
        set
    }

    fn pid_for(target: BindTarget) -> Option<pid_t> {
        match target {
            BindTarget::ThisProcess | BindTarget::ThisThread => Some(0),
            BindTarget::Process(pid) => pid_t::try_from(pid).ok(),
            BindTarget::Thread(_) => None,
        }
    }

    impl BindingHooks for UnixBindingHooks {
        fn set_cpubind(
            &self,
            target: BindTarget,
            set: &CpuSet,
            _flags: CpuBindingFlags,
        ) -> Result<(), CpuBindingError> {
            let Some(pid) = pid_for(target) else {
                return Err(CpuBindingError::BadObject(target));
            };
            let mask = cpuset_to_mask(set).map_err(|()| CpuBindingError::BadCpuSet(target, set.clone()))?;
            let rc = unsafe { sched_setaffinity(pid, size_of::<cpu_set_t>(), &mask) };
            if rc == 0 {
                Ok(())
            } else {
                Err(CpuBindingError::BadCpuSet(target, set.clone()))
            }
        }

        fn get_cpubind(&self, target: BindTarget, _flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
            let Some(pid) = pid_for(target) else {
                return Err(CpuBindingError::BadObject(target));
            };
            let mut mask: cpu_set_t = unsafe { MaybeUninit::zeroed().assume_init() };
            let rc = unsafe { sched_getaffinity(pid, size_of::<cpu_set_t>(), &mut mask) };
            if rc == 0 {
                Ok(mask_to_cpuset(&mask))
            } else {
                Err(CpuBindingError::BadObject(target))
            }
        }

        fn last_cpu_location(&self, target: BindTarget, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
            // No portable "where did I last run" syscall outside of reading
            // the current affinity mask back; this is an approximation that
            // matches the set the process is allowed to run on, not the one
            // CPU it is on right now.
            self.get_cpubind(target, flags)
        }
    }
}

#[cfg(windows)]
pub use windows::WindowsBindingHooks;

#[cfg(windows)]
mod windows {
    use super::*;
    use windows_sys::Win32::{
        Foundation::{CloseHandle, HANDLE},
        System::Threading::{
            GetCurrentProcess, GetCurrentThread, GetProcessAffinityMask, OpenProcess,
            SetProcessAffinityMask, SetThreadAffinityMask, PROCESS_QUERY_INFORMATION,
            PROCESS_SET_INFORMATION,
        },
    };

    /// Windows binding hooks built on the process/thread affinity mask APIs
    ///
    /// Affinity masks are a single `usize` of bits, so this backend only
    /// supports the first `usize::BITS` PUs; requests touching higher PUs
    /// are rejected with [`CpuBindingError::BadCpuSet`] rather than silently
    /// truncated.
    #[derive(Copy, Clone, Debug, Default)]
    pub struct WindowsBindingHooks;

    /// RAII guard closing a `HANDLE` before the caller returns, per §5's
    /// "OS-level thread/process handles...are closed before returning from
    /// the façade"
    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if self.0 != 0 {
                unsafe { CloseHandle(self.0) };
            }
        }
    }

    fn cpuset_to_mask(set: &CpuSet) -> Option<usize> {
        let mut mask: usize = 0;
        for i in 0..usize::BITS {
            if set.is_set(i) {
                mask |= 1 << i;
            }
        }
        (mask != 0).then_some(mask)
    }

    fn mask_to_cpuset(mask: usize) -> CpuSet {
        let mut set = CpuSet::new();
        for i in 0..usize::BITS {
            if mask & (1 << i) != 0 {
                set.set(i);
            }
        }
        set
    }

    fn process_handle(target: BindTarget) -> Result<OwnedHandle, CpuBindingError> {
        match target {
            BindTarget::ThisProcess => Ok(OwnedHandle(unsafe { GetCurrentProcess() })),
            BindTarget::Process(pid) => {
                let handle = unsafe {
                    OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_SET_INFORMATION, 0, pid)
                };
                if handle == 0 {
                    Err(CpuBindingError::BadObject(target))
                } else {
                    Ok(OwnedHandle(handle))
                }
            }
            BindTarget::ThisThread | BindTarget::Thread(_) => Err(CpuBindingError::BadObject(target)),
        }
    }

    impl BindingHooks for WindowsBindingHooks {
        fn set_cpubind(&self, target: BindTarget, set: &CpuSet, _flags: CpuBindingFlags) -> Result<(), CpuBindingError> {
            let Some(mask) = cpuset_to_mask(set) else {
                return Err(CpuBindingError::BadCpuSet(target, set.clone()));
            };
            match target {
                BindTarget::ThisThread => {
                    let prev = unsafe { SetThreadAffinityMask(GetCurrentThread(), mask) };
                    if prev == 0 {
                        Err(CpuBindingError::BadCpuSet(target, set.clone()))
                    } else {
                        Ok(())
                    }
                }
                _ => {
                    let handle = process_handle(target)?;
                    let ok = unsafe { SetProcessAffinityMask(handle.0, mask) };
                    if ok == 0 {
                        Err(CpuBindingError::BadCpuSet(target, set.clone()))
                    } else {
                        Ok(())
                    }
                }
            }
        }

        fn get_cpubind(&self, target: BindTarget, _flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
            let handle = process_handle(target)?;
            let mut process_mask: usize = 0;
            let mut system_mask: usize = 0;
            let ok = unsafe { GetProcessAffinityMask(handle.0, &mut process_mask, &mut system_mask) };
            if ok == 0 {
                Err(CpuBindingError::BadObject(target))
            } else {
                Ok(mask_to_cpuset(process_mask))
            }
        }

        fn last_cpu_location(&self, target: BindTarget, flags: CpuBindingFlags) -> Result<CpuSet, CpuBindingError> {
            self.get_cpubind(target, flags)
        }
    }
}

/// Fallback used on targets with no binding implementation in this crate
///
/// Keeps the façade total (§4.8): every call returns [`CpuBindingError::BadObject`]/
/// [`MemoryBindingError::Unsupported`] rather than failing to compile.
#[cfg(not(any(unix, windows)))]
#[derive(Copy, Clone, Debug, Default)]
pub struct FallbackBindingHooks;

#[cfg(not(any(unix, windows)))]
impl BindingHooks for FallbackBindingHooks {}

/// The default hooks for the platform this crate was built for
pub fn platform_default_hooks() -> Box<dyn BindingHooks> {
    #[cfg(unix)]
    {
        Box::new(UnixBindingHooks)
    }
    #[cfg(all(windows, not(unix)))]
    {
        Box::new(WindowsBindingHooks)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(FallbackBindingHooks)
    }
}
