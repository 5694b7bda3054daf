//! Feature support descriptor
//!
//! Populated once discovery finishes; reports which optional operations this
//! particular topology's backend set actually implements, so callers can
//! check before calling rather than pattern-matching on
//! [`crate::error::Error::Unsupported`] afterwards.

/// Discovery-related support bits
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Discovery {
    pub pu: bool,
    pub numa: bool,
    pub numa_memory: bool,
    pub disallowed_pu: bool,
    pub disallowed_numa: bool,
    pub cpukind_efficiency: bool,
}

/// CPU binding support bits
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuBind {
    pub set_thisproc_cpubind: bool,
    pub get_thisproc_cpubind: bool,
    pub set_proc_cpubind: bool,
    pub get_proc_cpubind: bool,
    pub set_thisthread_cpubind: bool,
    pub get_thisthread_cpubind: bool,
    pub set_thread_cpubind: bool,
    pub get_thread_cpubind: bool,
    pub get_thisproc_last_cpu_location: bool,
    pub get_proc_last_cpu_location: bool,
    pub get_thisthread_last_cpu_location: bool,
}

/// Memory binding support bits
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemBind {
    pub set_thisproc_membind: bool,
    pub get_thisproc_membind: bool,
    pub set_proc_membind: bool,
    pub get_proc_membind: bool,
    pub set_thisthread_membind: bool,
    pub get_thisthread_membind: bool,
    pub set_area_membind: bool,
    pub get_area_membind: bool,
    pub alloc_membind: bool,
    pub firsttouch_membind: bool,
    pub bind_membind: bool,
    pub interleave_membind: bool,
    pub nexttouch_membind: bool,
    pub migrate_membind: bool,
}

/// Bits that don't fit the other three categories
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Misc {
    /// Truth that support bits were imported from a remote machine rather
    /// than measured locally (only meaningful for non-local topologies,
    /// which this crate does not otherwise implement; kept so `Support`'s
    /// shape matches what a loader adding that feature later would need)
    pub imported_support: bool,
}

/// Feature support descriptor for one [`crate::topology::Topology`]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Support {
    pub discovery: Discovery,
    pub cpubind: CpuBind,
    pub membind: MemBind,
    pub misc: Misc,
}
