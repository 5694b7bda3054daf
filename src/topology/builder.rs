//! Topology construction
//!
//! [`TopologyBuilder`] runs registered [`DiscoveryBackend`]s phase by phase,
//! then post-processes the resulting arena: merging redundant levels,
//! applying type filters, assigning depths and logical indices, building the
//! level arrays, ranking CPU kinds, and installing the platform's
//! [`BindingHooks`]. This is the Rust counterpart of the teacher's topology
//! load sequence (`hwloc_topology_load`): discovery backends correspond to
//! its component plugins, and the post-processing steps correspond to its
//! fixup passes (`hwloc_connect_children`, `hwloc_propagate_symmetric_subtree`,
//! and friends).

use crate::{
    binding::{platform_default_hooks, NullBindingHooks},
    bitmap::{CpuSet, NodeSet},
    config::Config,
    discovery::{DiscoveryBackend, Phase, ReferenceBackend},
    object::{types::ObjectType, ObjectId},
    topology::{
        editor::rebuild_levels,
        flags::{BuildFlags, TypeFilter},
        support::Support,
        tma::ObjectArena,
        Topology,
    },
};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// Error produced by [`TopologyBuilder::build`]
#[derive(Debug, Error)]
pub enum TopologyBuildError {
    /// Every backend that declared the CPU phase failed
    #[error("every CPU-discovery backend failed: {0}")]
    NoBackendSucceeded(String),

    /// Discovery completed but produced no processing units
    #[error("discovery produced a topology with no processing units")]
    NoProcessingUnits,
}

/// Builds a [`Topology`] from a set of registered discovery backends
pub struct TopologyBuilder {
    flags: BuildFlags,
    type_filters: HashMap<ObjectType, TypeFilter>,
    backends: Vec<Box<dyn DiscoveryBackend>>,
    default_backend_active: bool,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self {
            flags: BuildFlags::IS_THIS_SYSTEM,
            type_filters: HashMap::new(),
            backends: vec![Box::new(ReferenceBackend::native())],
            default_backend_active: true,
        }
    }
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default build flags
    pub fn flags(mut self, flags: BuildFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Override how objects of `ty` are treated during build
    pub fn type_filter(mut self, ty: ObjectType, filter: TypeFilter) -> Self {
        self.type_filters.insert(ty, filter);
        self
    }

    /// Register a discovery backend
    ///
    /// The first call replaces the default [`ReferenceBackend::native`]
    /// backend rather than running alongside it, matching `HWLOC_COMPONENTS`
    /// semantics of naming a replacement component set.
    pub fn backend(mut self, backend: impl DiscoveryBackend + 'static) -> Self {
        if self.default_backend_active {
            self.backends.clear();
            self.default_backend_active = false;
        }
        self.backends.push(Box::new(backend));
        self
    }

    /// Run discovery and post-processing, producing a finished [`Topology`]
    pub fn build(self) -> Result<Topology, TopologyBuildError> {
        let config = Config::from_env();
        let is_this_system = config.thissystem.unwrap_or(self.flags.contains(BuildFlags::IS_THIS_SYSTEM));
        let mut flags = self.flags;
        flags.set(BuildFlags::IS_THIS_SYSTEM, is_this_system);

        let mut topology = Topology::default();
        topology.is_this_system = is_this_system;
        topology.flags = flags;

        self.run_discovery(&mut topology, &config)?;
        propagate_sets(&mut topology, topology.root);

        if topology.objects[topology.root.index()].cpuset.is_empty() {
            return Err(TopologyBuildError::NoProcessingUnits);
        }

        apply_type_filters(&mut topology, &self.type_filters);
        topology.edit().merge_redundant_levels();
        compact_reachable(&mut topology);
        recompute_depths(&mut topology);
        assign_logical_indices(&mut topology);
        rebuild_levels(&mut topology);
        compute_symmetric_subtrees(&mut topology, topology.root);

        install_hooks(&mut topology, is_this_system);
        compute_allowed_sets(&mut topology, flags);
        topology.cpukinds.rerank();
        populate_support(&mut topology, is_this_system);

        Ok(topology)
    }

    fn run_discovery(&self, topology: &mut Topology, config: &Config) -> Result<(), TopologyBuildError> {
        for &phase in &Phase::ORDER {
            let start = std::time::Instant::now();
            let mut eligible: Vec<&Box<dyn DiscoveryBackend>> = self
                .backends
                .iter()
                .filter(|b| b.phases().contains(phase) && config.backend_allowed(b.name()))
                .collect();
            eligible.sort_by(|a, b| b.priority().cmp(&a.priority()));

            let mut attempted = 0;
            let mut failures = Vec::new();
            for backend in eligible {
                attempted += 1;
                if let Err(e) = backend.discover(topology, phase) {
                    log::warn!("discovery backend {} failed during {:?}: {}", backend.name(), phase, e);
                    failures.push(e.to_string());
                }
            }

            if phase == Phase::CPU && attempted > 0 && failures.len() == attempted {
                return Err(TopologyBuildError::NoBackendSucceeded(failures.join("; ")));
            }
            if config.debug_load_time {
                log::debug!("discovery phase {:?} took {:?}", phase, start.elapsed());
            }
        }
        Ok(())
    }
}

/// Recompute every non-leaf normal object's cpuset/nodeset bottom-up as the
/// union of its normal children's sets
///
/// Discovery backends built on [`crate::discovery::backend::DiscoveryBackend`]'s
/// `insert_by_cpuset`/`insert_by_parent` primitives only set a newly inserted
/// object's own sets, never an ancestor's; this pass is what actually
/// guarantees the cpuset/nodeset-containment invariants (spec §8) hold
/// regardless of which backend produced the tree.
fn propagate_sets(topology: &mut Topology, id: ObjectId) {
    let children = topology.objects[id.index()].normal_children.clone();
    if children.is_empty() {
        return;
    }
    for &child in &children {
        propagate_sets(topology, child);
    }
    let mut cpuset = CpuSet::new();
    let mut complete_cpuset = CpuSet::new();
    let mut nodeset = NodeSet::new();
    let mut complete_nodeset = NodeSet::new();
    for &child in &children {
        let data = &topology.objects[child.index()];
        cpuset = cpuset.or(&data.cpuset);
        complete_cpuset = complete_cpuset.or(&data.complete_cpuset);
        nodeset = nodeset.or(&data.nodeset);
        complete_nodeset = complete_nodeset.or(&data.complete_nodeset);
    }
    let data = &mut topology.objects[id.index()];
    data.cpuset = cpuset;
    data.complete_cpuset = complete_cpuset;
    data.nodeset = nodeset;
    data.complete_nodeset = complete_nodeset;
}

fn apply_type_filters(topology: &mut Topology, filters: &HashMap<ObjectType, TypeFilter>) {
    loop {
        let mut victim = None;
        for (idx, data) in topology.objects.iter().enumerate() {
            let id = ObjectId::new(idx);
            if id == topology.root || !data.object_type.is_normal() {
                continue;
            }
            let filter = filters.get(&data.object_type).copied().unwrap_or_default();
            let drop = match filter {
                TypeFilter::KeepAll | TypeFilter::KeepImportant => false,
                TypeFilter::KeepNone => true,
                TypeFilter::KeepStructure => {
                    data.normal_children.len() == 1
                        && topology.objects[data.normal_children[0].index()].cpuset == data.cpuset
                }
            };
            if drop {
                victim = Some(id);
                break;
            }
        }
        let Some(id) = victim else { break };
        splice_out_normal(topology, id);
    }
}

/// Remove `id` from the normal tree, reparenting its children in its place
fn splice_out_normal(topology: &mut Topology, id: ObjectId) {
    let parent_id = topology.objects[id.index()].parent.expect("non-root object has a parent");
    let children = topology.objects[id.index()].normal_children.clone();
    for &child in &children {
        topology.objects[child.index()].parent = Some(parent_id);
    }
    let siblings = &mut topology.objects[parent_id.index()].normal_children;
    let position = siblings.iter().position(|&s| s == id).expect("id is a child of its own parent");
    siblings.splice(position..=position, children);
}

/// Drop arena entries no longer reachable from the root and renumber the
/// survivors, repairing the dangling entries that [`splice_out_normal`] and
/// [`crate::topology::editor::TopologyEditor::merge_redundant_levels`] leave
/// behind (they detach a node from its parent's child list without removing
/// it from the arena)
fn compact_reachable(topology: &mut Topology) {
    let mut keep = vec![false; topology.objects.len()];
    let mut stack = vec![topology.root];
    while let Some(id) = stack.pop() {
        if keep[id.index()] {
            continue;
        }
        keep[id.index()] = true;
        let data = &topology.objects[id.index()];
        stack.extend(data.normal_children.iter().copied());
        stack.extend(data.memory_children.iter().copied());
        stack.extend(data.io_children.iter().copied());
        stack.extend(data.misc_children.iter().copied());
    }
    if keep.iter().all(|&k| k) {
        return;
    }

    let mut remap: HashMap<usize, ObjectId> = HashMap::new();
    let mut new_objects = Vec::new();
    for (old_idx, data) in topology.objects.iter().enumerate() {
        if keep[old_idx] {
            remap.insert(old_idx, ObjectId::new(new_objects.len()));
            new_objects.push(data.clone());
        }
    }
    for data in &mut new_objects {
        data.parent = data.parent.and_then(|p| remap.get(&p.index()).copied());
        remap_children(&mut data.normal_children, &remap);
        remap_children(&mut data.memory_children, &remap);
        remap_children(&mut data.io_children, &remap);
        remap_children(&mut data.misc_children, &remap);
    }
    topology.root = *remap.get(&topology.root.index()).expect("root is always reachable");
    topology.objects = ObjectArena::Heap(new_objects);
}

fn remap_children(ids: &mut Vec<ObjectId>, remap: &HashMap<usize, ObjectId>) {
    ids.retain_mut(|id| match remap.get(&id.index()) {
        Some(&new_id) => {
            *id = new_id;
            true
        }
        None => false,
    });
}

fn recompute_depths(topology: &mut Topology) {
    let root = topology.root;
    topology.objects[root.index()].depth = 0;
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let depth = topology.objects[id.index()].depth;
        let children = topology.objects[id.index()].normal_children.clone();
        for child in children {
            topology.objects[child.index()].depth = depth + 1;
            stack.push(child);
        }
    }
}

fn assign_logical_indices(topology: &mut Topology) {
    let root = topology.root;
    let mut counters: HashMap<i32, u32> = HashMap::new();
    let mut order = Vec::new();
    // Pre-order DFS visits every depth-d node reachable through an earlier
    // sibling before any depth-d node reachable only through a later one,
    // which is exactly left-to-right order within each depth.
    fn visit(topology: &Topology, id: ObjectId, order: &mut Vec<ObjectId>) {
        order.push(id);
        for &child in &topology.objects[id.index()].normal_children {
            visit(topology, child, order);
        }
    }
    visit(topology, root, &mut order);
    for id in order {
        let depth = topology.objects[id.index()].depth;
        let counter = counters.entry(depth).or_insert(0);
        topology.objects[id.index()].logical_index = *counter;
        *counter += 1;
    }
}

fn compute_symmetric_subtrees(topology: &mut Topology, id: ObjectId) -> bool {
    let children = topology.objects[id.index()].normal_children.clone();
    let symmetric = if children.is_empty() {
        true
    } else {
        let first_type = topology.objects[children[0].index()].object_type;
        let first_arity = topology.objects[children[0].index()].normal_children.len();
        let mut shapes_match = true;
        let mut all_children_symmetric = true;
        for &child in &children {
            if !compute_symmetric_subtrees(topology, child) {
                all_children_symmetric = false;
            }
            let data = &topology.objects[child.index()];
            if data.object_type != first_type || data.normal_children.len() != first_arity {
                shapes_match = false;
            }
        }
        shapes_match && all_children_symmetric
    };
    topology.objects[id.index()].symmetric_subtree = symmetric;
    symmetric
}

fn install_hooks(topology: &mut Topology, is_this_system: bool) {
    topology.hooks = if is_this_system { Arc::from(platform_default_hooks()) } else { Arc::new(NullBindingHooks) };
}

fn compute_allowed_sets(topology: &mut Topology, flags: BuildFlags) {
    let root_data = &topology.objects[topology.root.index()];
    let full_cpuset = root_data.cpuset.clone();
    let full_nodeset = root_data.nodeset.clone();

    if flags.contains(BuildFlags::INCLUDE_DISALLOWED) {
        topology.allowed_cpuset = full_cpuset;
        topology.allowed_nodeset = full_nodeset;
        return;
    }

    topology.allowed_cpuset = if topology.is_this_system {
        use crate::{binding::BindTarget, cpu::binding::CpuBindingFlags};
        topology
            .hooks()
            .get_cpubind(BindTarget::ThisProcess, CpuBindingFlags::empty())
            .map(|mask| mask.and(&full_cpuset))
            .unwrap_or(full_cpuset)
    } else {
        full_cpuset
    };
    topology.allowed_nodeset = full_nodeset;
}

fn populate_support(topology: &mut Topology, is_this_system: bool) {
    let mut support = Support::default();
    support.discovery.pu = true;
    support.discovery.cpukind_efficiency = !topology.cpukinds.is_empty();
    if is_this_system {
        support.cpubind.set_thisproc_cpubind = true;
        support.cpubind.get_thisproc_cpubind = true;
        support.cpubind.set_thisthread_cpubind = true;
        support.cpubind.get_thisthread_cpubind = true;
        support.cpubind.get_thisproc_last_cpu_location = true;
        support.cpubind.get_thisthread_last_cpu_location = true;
    }
    topology.support = support;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::ReferenceBackend;

    /// Two `Package`s of two `Core`s of two `PU`s each, fully built
    pub fn two_package_machine() -> Topology {
        TopologyBuilder::new()
            .flags(BuildFlags::empty())
            .backend(ReferenceBackend::synthetic("pack:2 core:2 pu:2").unwrap())
            .build()
            .expect("synthetic build should not fail")
    }

    #[test]
    fn synthetic_build_assigns_logical_indices() {
        let topo = two_package_machine();
        let depth = topo.depth_for_type(ObjectType::PU).unwrap();
        let indices: Vec<u32> = topo.objects_at_normal_depth(depth).map(|o| o.logical_index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn synthetic_build_marks_the_whole_tree_symmetric() {
        let topo = two_package_machine();
        assert!(topo.root().symmetric_subtree());
    }

    #[test]
    fn synthetic_build_with_no_is_this_system_flag_installs_null_hooks() {
        let topo = two_package_machine();
        assert!(!topo.is_this_system());
    }

    #[test]
    fn type_filter_keep_none_removes_cores_but_keeps_their_pus() {
        let topo = TopologyBuilder::new()
            .flags(BuildFlags::empty())
            .type_filter(ObjectType::Core, TypeFilter::KeepNone)
            .backend(ReferenceBackend::synthetic("pack:2 core:2 pu:2").unwrap())
            .build()
            .unwrap();
        assert!(topo.depth_for_type(ObjectType::Core).is_err());
        let pu_depth = topo.depth_for_type(ObjectType::PU).unwrap();
        assert_eq!(topo.num_objects_at_depth(pu_depth), 8);
    }

    #[test]
    fn type_filter_keep_structure_removes_non_branching_objects() {
        // Each `Die` has exactly one `Core` child, so after set propagation
        // its cpuset equals that child's: KeepStructure must splice it out.
        let topo = TopologyBuilder::new()
            .flags(BuildFlags::empty())
            .type_filter(ObjectType::Die, TypeFilter::KeepStructure)
            .backend(ReferenceBackend::synthetic("pack:2 die:1 core:2 pu:2").unwrap())
            .build()
            .unwrap();
        assert!(topo.depth_for_type(ObjectType::Die).is_err());
        let pu_depth = topo.depth_for_type(ObjectType::PU).unwrap();
        assert_eq!(topo.num_objects_at_depth(pu_depth), 8);
    }

    #[test]
    fn type_filter_keep_structure_keeps_branching_objects() {
        // Each `Package` has two `Core` children, so KeepStructure must keep it.
        let topo = TopologyBuilder::new()
            .flags(BuildFlags::empty())
            .type_filter(ObjectType::Package, TypeFilter::KeepStructure)
            .backend(ReferenceBackend::synthetic("pack:2 core:2 pu:2").unwrap())
            .build()
            .unwrap();
        assert_eq!(topo.depth_for_type(ObjectType::Package).unwrap(), 1);
    }

    #[test]
    fn build_without_any_pus_is_rejected() {
        struct EmptyBackend;
        impl DiscoveryBackend for EmptyBackend {
            fn name(&self) -> &str {
                "empty"
            }
            fn phases(&self) -> Phase {
                Phase::CPU
            }
            fn discover(&self, _topology: &mut Topology, _phase: Phase) -> Result<(), crate::discovery::BackendError> {
                Ok(())
            }
        }
        let result = TopologyBuilder::new().flags(BuildFlags::empty()).backend(EmptyBackend).build();
        assert!(matches!(result, Err(TopologyBuildError::NoProcessingUnits)));
    }
}
