//! Topology-wide build flags and per-type filters

use bitflags::bitflags;

bitflags! {
    /// Flags controlling what a topology build discovers and how it treats
    /// resources the OS currently disallows
    #[derive(Default)]
    pub struct BuildFlags: u32 {
        /// Detect the whole system, ignoring cgroup/cpuset-style reservations
        ///
        /// Objects normally excluded because they are disallowed are kept,
        /// and [`crate::topology::Topology::allowed_cpuset`]/
        /// [`allowed_nodeset`](crate::topology::Topology::allowed_nodeset)
        /// report the narrower set separately instead of matching the root.
        const INCLUDE_DISALLOWED = 1 << 0;

        /// Assume the discovery backends describe the machine this process
        /// is actually running on, enabling binding operations to issue real
        /// OS calls rather than the no-op stubs used for foreign topologies
        const IS_THIS_SYSTEM = 1 << 1;

        /// Re-derive allowed cpuset/nodeset from the local OS even though the
        /// topology itself was not discovered locally
        const THIS_SYSTEM_ALLOWED_RESOURCES = 1 << 2;

        /// Populate [`crate::topology::support::Support`] from whatever the
        /// originating backend reports, rather than leaving it at defaults
        const IMPORT_SUPPORT = 1 << 3;
    }
}

bitflags! {
    /// Flags governing [`crate::topology::Topology::restrict`]'s treatment of
    /// objects that end up with an empty cpuset/nodeset after restriction
    ///
    /// spec.md:125: by default such an object is retained with an empty
    /// cpuset/nodeset (it keeps its place in the tree, just with no
    /// resources left); [`RestrictFlags::REMOVE_CPULESS`] instead removes it,
    /// reparenting its surviving descendants the same way
    /// [`crate::topology::builder`]'s type filters do.
    #[derive(Default)]
    pub struct RestrictFlags: u32 {
        /// Remove an object entirely once restriction empties its cpuset,
        /// rather than keeping it around with an empty one
        const REMOVE_CPULESS = 1 << 0;
    }
}

/// Policy for keeping or dropping objects of a given type during build
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum TypeFilter {
    /// Keep every object of this type
    #[default]
    KeepAll,
    /// Drop every object of this type
    KeepNone,
    /// Keep only objects that are structurally necessary (have more than one
    /// child, or are the root)
    KeepStructure,
    /// Keep only objects considered informative even when not structurally
    /// necessary (used for I/O and Misc types, where "importance" is
    /// type-specific rather than structural)
    KeepImportant,
}
