//! Topology objects
//!
//! Objects are stored in a flat arena owned by [`crate::topology::Topology`]
//! and addressed by [`ObjectId`]; [`TopologyObject`] is a borrowing view that
//! pairs an id with the topology it belongs to, so every accessor can follow
//! parent/child/cousin links without any of the raw pointers or `unsafe`
//! traversal a pointer-based tree would require.

pub mod attributes;
pub mod types;

use crate::{
    bitmap::{CpuSet, NodeSet},
    info::Info,
    object::{attributes::ObjectAttributes, types::ObjectType},
    topology::Topology,
};

/// Stable identifier of an object within one [`Topology`]
///
/// Dense and zero-based: valid indices into the topology's object arena.
/// Never compared across two different topologies.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Owned storage for one object, held in the topology's arena
///
/// Links to other objects are stored as [`ObjectId`]s rather than pointers;
/// `Option<ObjectId>` plays the role the original's null-pointer sentinels
/// played, but is checked by the compiler rather than by convention.
#[derive(Clone, Debug)]
pub struct ObjectData {
    pub(crate) object_type: ObjectType,
    pub(crate) subtype: Option<String>,
    pub(crate) os_index: Option<u32>,
    pub(crate) name: Option<String>,
    pub(crate) total_memory: u64,
    pub(crate) attr: ObjectAttributes,
    pub(crate) depth: i32,
    pub(crate) logical_index: u32,
    pub(crate) gp_index: u64,

    pub(crate) parent: Option<ObjectId>,
    pub(crate) sibling_rank: u32,
    pub(crate) normal_children: Vec<ObjectId>,
    pub(crate) memory_children: Vec<ObjectId>,
    pub(crate) io_children: Vec<ObjectId>,
    pub(crate) misc_children: Vec<ObjectId>,
    pub(crate) symmetric_subtree: bool,

    pub(crate) cpuset: CpuSet,
    pub(crate) complete_cpuset: CpuSet,
    pub(crate) nodeset: NodeSet,
    pub(crate) complete_nodeset: NodeSet,

    pub(crate) infos: Vec<Info>,
}

impl ObjectData {
    pub(crate) fn new(object_type: ObjectType, depth: i32, logical_index: u32, gp_index: u64) -> Self {
        Self {
            object_type,
            subtype: None,
            os_index: None,
            name: None,
            total_memory: 0,
            attr: ObjectAttributes::None,
            depth,
            logical_index,
            gp_index,
            parent: None,
            sibling_rank: 0,
            normal_children: Vec::new(),
            memory_children: Vec::new(),
            io_children: Vec::new(),
            misc_children: Vec::new(),
            symmetric_subtree: false,
            cpuset: CpuSet::new(),
            complete_cpuset: CpuSet::new(),
            nodeset: NodeSet::new(),
            complete_nodeset: NodeSet::new(),
            infos: Vec::new(),
        }
    }
}

/// A borrowing handle onto one object of a [`Topology`]
///
/// Cheap to copy (it is an id plus a reference); all traversal methods
/// return other `TopologyObject`s rather than raw ids, so calling code never
/// has to re-borrow the topology to resolve a link.
#[derive(Copy, Clone)]
pub struct TopologyObject<'topology> {
    topology: &'topology Topology,
    id: ObjectId,
}

impl<'topology> TopologyObject<'topology> {
    pub(crate) fn new(topology: &'topology Topology, id: ObjectId) -> Self {
        Self { topology, id }
    }

    fn data(&self) -> &'topology ObjectData {
        self.topology.object_data(self.id)
    }

    /// The id of this object within its topology
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.data().object_type
    }

    pub fn subtype(&self) -> Option<&'topology str> {
        self.data().subtype.as_deref()
    }

    pub fn os_index(&self) -> Option<u32> {
        self.data().os_index
    }

    pub fn name(&self) -> Option<&'topology str> {
        self.data().name.as_deref()
    }

    pub fn total_memory(&self) -> u64 {
        self.data().total_memory
    }

    pub fn attributes(&self) -> &'topology ObjectAttributes {
        &self.data().attr
    }

    /// Human-readable attribute line for this object's type, or `None` for
    /// types with no typed attribute payload (SPEC_FULL §4.2/§6)
    pub fn attr_snprintf(&self, sep: &str) -> Option<String> {
        self.attributes().attr_snprintf(sep)
    }

    /// Depth in the normal tree axis for normal objects; a namespace-specific
    /// negative sentinel for memory/I/O/Misc objects (see [`crate::object::types::TypeDepth`])
    pub fn depth(&self) -> i32 {
        self.data().depth
    }

    pub fn logical_index(&self) -> u32 {
        self.data().logical_index
    }

    /// Index stable across merge/restrict/dup operations, used as a
    /// topology-independent object identity for distance matrices
    pub fn global_persistent_index(&self) -> u64 {
        self.data().gp_index
    }

    pub fn parent(&self) -> Option<TopologyObject<'topology>> {
        self.data().parent.map(|id| TopologyObject::new(self.topology, id))
    }

    pub fn sibling_rank(&self) -> u32 {
        self.data().sibling_rank
    }

    pub fn normal_arity(&self) -> usize {
        self.data().normal_children.len()
    }

    pub fn normal_children(&self) -> impl Iterator<Item = TopologyObject<'topology>> + 'topology {
        let topology = self.topology;
        self.data().normal_children.iter().map(move |&id| TopologyObject::new(topology, id))
    }

    pub fn first_normal_child(&self) -> Option<TopologyObject<'topology>> {
        self.normal_children().next()
    }

    pub fn last_normal_child(&self) -> Option<TopologyObject<'topology>> {
        self.data()
            .normal_children
            .last()
            .map(|&id| TopologyObject::new(self.topology, id))
    }

    /// Truth that every normal subtree under this object has the same shape
    /// (same types and arities at every depth), enabling distrib's
    /// coordinate-based scatter algorithm
    pub fn symmetric_subtree(&self) -> bool {
        self.data().symmetric_subtree
    }

    pub fn memory_arity(&self) -> usize {
        self.data().memory_children.len()
    }

    pub fn memory_children(&self) -> impl Iterator<Item = TopologyObject<'topology>> + 'topology {
        let topology = self.topology;
        self.data().memory_children.iter().map(move |&id| TopologyObject::new(topology, id))
    }

    pub fn io_arity(&self) -> usize {
        self.data().io_children.len()
    }

    pub fn io_children(&self) -> impl Iterator<Item = TopologyObject<'topology>> + 'topology {
        let topology = self.topology;
        self.data().io_children.iter().map(move |&id| TopologyObject::new(topology, id))
    }

    pub fn misc_arity(&self) -> usize {
        self.data().misc_children.len()
    }

    pub fn misc_children(&self) -> impl Iterator<Item = TopologyObject<'topology>> + 'topology {
        let topology = self.topology;
        self.data().misc_children.iter().map(move |&id| TopologyObject::new(topology, id))
    }

    pub fn cpuset(&self) -> &'topology CpuSet {
        &self.data().cpuset
    }

    pub fn complete_cpuset(&self) -> &'topology CpuSet {
        &self.data().complete_cpuset
    }

    pub fn nodeset(&self) -> &'topology NodeSet {
        &self.data().nodeset
    }

    pub fn complete_nodeset(&self) -> &'topology NodeSet {
        &self.data().complete_nodeset
    }

    pub fn infos(&self) -> &'topology [Info] {
        &self.data().infos
    }

    /// Value of the first info key matching `name`, if any
    pub fn info(&self, name: &str) -> Option<&'topology str> {
        self.infos().iter().find(|info| info.name() == name).map(Info::value)
    }

    /// Next object at the same depth, in logical order
    pub fn next_cousin(&self) -> Option<TopologyObject<'topology>> {
        self.sibling_at_depth_offset(1)
    }

    /// Previous object at the same depth, in logical order
    pub fn prev_cousin(&self) -> Option<TopologyObject<'topology>> {
        self.sibling_at_depth_offset(-1)
    }

    fn sibling_at_depth_offset(&self, offset: i64) -> Option<TopologyObject<'topology>> {
        let level = self.topology.objects_at_depth(self.depth());
        let my_pos = level.iter().position(|&id| id == self.id)?;
        let target = my_pos as i64 + offset;
        if target < 0 {
            return None;
        }
        level.get(target as usize).map(|&id| TopologyObject::new(self.topology, id))
    }
}

impl<'topology> std::fmt::Debug for TopologyObject<'topology> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyObject")
            .field("type", &self.object_type())
            .field("os_index", &self.os_index())
            .field("logical_index", &self.logical_index())
            .field("depth", &self.depth())
            .finish()
    }
}

impl<'topology> std::fmt::Display for TopologyObject<'topology> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.object_type())?;
        if let Some(os_index) = self.os_index() {
            write!(f, "#{os_index}")?;
        }
        if let Some(name) = self.name() {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

impl<'topology> PartialEq for TopologyObject<'topology> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.topology, other.topology) && self.id == other.id
    }
}

impl<'topology> Eq for TopologyObject<'topology> {}
