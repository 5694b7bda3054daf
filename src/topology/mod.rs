//! The topology tree
//!
//! [`Topology`] owns the object arena and every side table (CPU kinds,
//! distances, memory attributes, support descriptor) discovered alongside
//! it. All mutation happens either through [`TopologyBuilder`] before the
//! topology is built, or through a short-lived [`TopologyEditor`] borrow
//! afterwards; there is no interior mutability and no reference counting,
//! so the borrow checker enforces the "no concurrent mutation" rule the
//! original left to caller discipline.

pub mod builder;
pub mod editor;
pub mod flags;
pub mod support;
mod tma;

pub use builder::{TopologyBuildError, TopologyBuilder};
pub use editor::TopologyEditor;
pub use flags::{BuildFlags, RestrictFlags, TypeFilter};
pub use support::Support;
pub use tma::{DefaultTma, MallocTma, Tma};

use crate::{
    binding::{BindingHooks, NullBindingHooks},
    bitmap::{CpuSet, NodeSet},
    cpukinds::CpuKindsRegistry,
    distances::DistancesRegistry,
    memattrs::MemAttrsRegistry,
    object::{
        types::{ObjectType, TypeDepth},
        ObjectData, ObjectId, TopologyObject,
    },
    topology::tma::{ObjectArena, TmaBlock},
};
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Error returned when resolving a type to a single normal depth fails
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum DepthError {
    /// No object of this type exists in the topology
    #[error("no object of this type exists")]
    Nonexistent,
    /// More than one normal depth holds this type (can happen for cache
    /// types, which may appear at several depths on asymmetric machines)
    #[error("type exists at more than one depth")]
    Multiple,
    /// `depth` passed to a by-depth query does not correspond to an actual
    /// level of the topology
    #[error("depth {0} does not exist in this topology")]
    Unexpected(i32),
}

/// A fully or partially discovered hardware topology
pub struct Topology {
    pub(crate) objects: ObjectArena,
    pub(crate) root: ObjectId,
    /// Normal-axis levels, indexed by depth
    pub(crate) normal_levels: Vec<Vec<ObjectId>>,
    /// Memory/IO/Misc namespace levels
    pub(crate) memory_level: Vec<ObjectId>,
    pub(crate) bridge_level: Vec<ObjectId>,
    pub(crate) pcidevice_level: Vec<ObjectId>,
    pub(crate) osdevice_level: Vec<ObjectId>,
    pub(crate) misc_level: Vec<ObjectId>,

    pub(crate) flags: BuildFlags,
    pub(crate) allowed_cpuset: CpuSet,
    pub(crate) allowed_nodeset: NodeSet,
    pub(crate) support: Support,
    pub(crate) is_this_system: bool,

    pub(crate) cpukinds: CpuKindsRegistry,
    pub(crate) distances: DistancesRegistry,
    pub(crate) memattrs: MemAttrsRegistry,

    /// OS-specific binding implementation, installed during CPU-phase
    /// discovery; shared (not re-created) across `dup`/`restrict` since it
    /// carries no topology-specific state
    pub(crate) hooks: Arc<dyn BindingHooks>,

    next_gp_index: u64,
}

impl Default for Topology {
    /// An empty topology with a lone `Machine` root and no binding support;
    /// only useful as a base for tests and for [`TopologyBuilder`]
    fn default() -> Self {
        let mut objects = Vec::new();
        objects.push(ObjectData::new(ObjectType::Machine, 0, 0, 0));
        Self {
            objects: ObjectArena::Heap(objects),
            root: ObjectId::new(0),
            normal_levels: vec![vec![ObjectId::new(0)]],
            memory_level: Vec::new(),
            bridge_level: Vec::new(),
            pcidevice_level: Vec::new(),
            osdevice_level: Vec::new(),
            misc_level: Vec::new(),
            flags: BuildFlags::empty(),
            allowed_cpuset: CpuSet::new(),
            allowed_nodeset: NodeSet::new(),
            support: Support::default(),
            is_this_system: false,
            cpukinds: CpuKindsRegistry::new(),
            distances: DistancesRegistry::new(),
            memattrs: MemAttrsRegistry::new(),
            hooks: Arc::new(NullBindingHooks),
            next_gp_index: 1,
        }
    }
}

impl Topology {
    /// Start building a topology with default flags and filters
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    /// Discover the local machine's topology using default settings
    pub fn new() -> Result<Self, TopologyBuildError> {
        Self::builder().build()
    }

    pub(crate) fn object_data(&self, id: ObjectId) -> &ObjectData {
        &self.objects[id.index()]
    }

    pub(crate) fn allocate(&mut self, data: ObjectData) -> ObjectId {
        let id = ObjectId::new(self.objects.len());
        self.objects.push(data);
        id
    }

    pub(crate) fn next_gp_index(&mut self) -> u64 {
        let idx = self.next_gp_index;
        self.next_gp_index += 1;
        idx
    }

    /// The root (Machine) object
    pub fn root(&self) -> TopologyObject<'_> {
        TopologyObject::new(self, self.root)
    }

    /// Look up an object by id
    pub fn object(&self, id: ObjectId) -> TopologyObject<'_> {
        TopologyObject::new(self, id)
    }

    /// Total number of objects across every namespace
    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Highest normal depth present (the root is depth 0)
    pub fn normal_depth(&self) -> u32 {
        self.normal_levels.len().saturating_sub(1) as u32
    }

    pub(crate) fn objects_at_depth(&self, depth: i32) -> &[ObjectId] {
        if depth >= 0 {
            self.normal_levels
                .get(depth as usize)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        } else {
            &[]
        }
    }

    /// Objects at a given normal depth, in logical order
    pub fn objects_at_normal_depth(&self, depth: u32) -> impl Iterator<Item = TopologyObject<'_>> {
        self.normal_levels
            .get(depth as usize)
            .into_iter()
            .flatten()
            .map(move |&id| TopologyObject::new(self, id))
    }

    /// Number of objects at a given normal depth
    pub fn num_objects_at_depth(&self, depth: u32) -> usize {
        self.normal_levels.get(depth as usize).map_or(0, Vec::len)
    }

    /// Resolve a normal type to its unique depth
    pub fn depth_for_type(&self, ty: ObjectType) -> Result<u32, DepthError> {
        if !ty.is_normal() {
            return Err(DepthError::Nonexistent);
        }
        let mut found = None;
        for (depth, level) in self.normal_levels.iter().enumerate() {
            if level.iter().any(|&id| self.object_data(id).object_type == ty) {
                if found.is_some() {
                    return Err(DepthError::Multiple);
                }
                found = Some(depth as u32);
            }
        }
        found.ok_or(DepthError::Nonexistent)
    }

    /// Objects of a memory/I/O/Misc namespace type
    pub fn objects_in_namespace(&self, namespace: TypeDepth) -> impl Iterator<Item = TopologyObject<'_>> {
        let ids: &[ObjectId] = match namespace {
            TypeDepth::Normal(_) => &[],
            TypeDepth::Memory => &self.memory_level,
            TypeDepth::Bridge => &self.bridge_level,
            TypeDepth::PCIDevice => &self.pcidevice_level,
            TypeDepth::OSDevice => &self.osdevice_level,
            TypeDepth::Misc => &self.misc_level,
        };
        ids.iter().map(move |&id| TopologyObject::new(self, id))
    }

    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    /// Set of PU OS indices the OS currently allows this process to use
    pub fn allowed_cpuset(&self) -> &CpuSet {
        &self.allowed_cpuset
    }

    /// Set of NUMA node OS indices the OS currently allows this process to use
    pub fn allowed_nodeset(&self) -> &NodeSet {
        &self.allowed_nodeset
    }

    pub fn support(&self) -> &Support {
        &self.support
    }

    /// Truth that this topology describes the machine the calling process is
    /// actually running on, as opposed to one loaded from a description of
    /// another machine
    pub fn is_this_system(&self) -> bool {
        self.is_this_system
    }

    pub fn cpukinds(&self) -> &CpuKindsRegistry {
        &self.cpukinds
    }

    pub fn distances(&self) -> &DistancesRegistry {
        &self.distances
    }

    pub fn memattrs(&self) -> &MemAttrsRegistry {
        &self.memattrs
    }

    pub(crate) fn hooks(&self) -> &dyn BindingHooks {
        self.hooks.as_ref()
    }

    /// Borrow this topology for in-place mutation (merge, restrict,
    /// attribute edits)
    pub fn edit(&mut self) -> TopologyEditor<'_> {
        TopologyEditor::new(self)
    }

    /// Produce an independent deep copy, allocating the duplicate's object
    /// arena via `tma` (spec.md:128) rather than simply cloning the original
    ///
    /// All object ids, depths, and gp_indices are preserved, so distance and
    /// memory-attribute entries referencing this topology's objects remain
    /// valid against the duplicate.
    pub fn dup_with(&self, tma: Arc<dyn Tma>) -> Result<Self, crate::error::Error> {
        let block = TmaBlock::from_vec(self.objects.to_vec(), tma)?;
        Ok(Self {
            objects: ObjectArena::Tma(block),
            root: self.root,
            normal_levels: self.normal_levels.clone(),
            memory_level: self.memory_level.clone(),
            bridge_level: self.bridge_level.clone(),
            pcidevice_level: self.pcidevice_level.clone(),
            osdevice_level: self.osdevice_level.clone(),
            misc_level: self.misc_level.clone(),
            flags: self.flags,
            allowed_cpuset: self.allowed_cpuset.clone(),
            allowed_nodeset: self.allowed_nodeset.clone(),
            support: self.support,
            is_this_system: self.is_this_system,
            cpukinds: self.cpukinds.clone(),
            distances: self.distances.clone(),
            memattrs: self.memattrs.clone(),
            hooks: Arc::clone(&self.hooks),
            next_gp_index: self.next_gp_index,
        })
    }

    /// [`Topology::dup_with`] using a fresh [`DefaultTma`]
    pub fn dup(&self) -> Result<Self, crate::error::Error> {
        self.dup_with(Arc::new(DefaultTma))
    }

    /// Restrict the topology to `cpuset`/`nodeset`, using `flags` to decide
    /// the fate of objects that become entirely excluded (spec.md:125)
    ///
    /// Builds the restricted arena into a fresh `Topology` and swaps it in,
    /// so a failure partway through (e.g. restricting away every PU) leaves
    /// `self` untouched rather than half-mutated.
    pub fn restrict(
        &mut self,
        cpuset: &CpuSet,
        nodeset: &NodeSet,
        flags: RestrictFlags,
    ) -> Result<(), crate::error::Error> {
        let restricted = self.edit().compute_restricted(cpuset, nodeset, flags)?;
        let _ = std::mem::replace(self, restricted);
        Ok(())
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("num_objects", &self.num_objects())
            .field("normal_depth", &self.normal_depth())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::builder::tests::two_package_machine;

    #[test]
    fn dup_is_independent_and_preserves_structure() {
        let topo = two_package_machine();
        let mut copy = topo.dup().unwrap();
        assert_eq!(copy.num_objects(), topo.num_objects());
        assert_eq!(copy.depth_for_type(ObjectType::PU), topo.depth_for_type(ObjectType::PU));

        copy.edit().merge_redundant_levels();
        assert_eq!(topo.num_objects(), 15, "mutating the duplicate must not affect the original");
    }

    #[test]
    fn dup_with_a_leaking_malloc_tma_still_reads_back_correctly() {
        let topo = two_package_machine();
        let copy = topo.dup_with(Arc::new(MallocTma::leaking())).unwrap();
        assert_eq!(copy.num_objects(), topo.num_objects());
        assert_eq!(copy.root().object_type(), topo.root().object_type());
    }
}
