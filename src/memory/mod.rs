//! Memory-related functionality: binding allocations to NUMA nodes

pub mod binding;
