//! Scoped topology mutation
//!
//! A [`TopologyEditor`] is a short-lived `&mut Topology` wrapper. Borrowing
//! through it rather than mutating `Topology` directly keeps every mutating
//! method grouped in one place and gives a natural seam for the "topology is
//! busy" check the original performs while an iteration holds a pointer into
//! the tree: here that's just the borrow checker refusing to let a
//! `TopologyObject<'_>` outlive the `&mut` borrow `edit()` takes.

use crate::{
    bitmap::{CpuSet, NodeSet},
    error::Error,
    object::{ObjectData, ObjectId},
    topology::{flags::RestrictFlags, tma::ObjectArena, Topology},
};
use std::collections::HashMap;

/// Scoped mutable access to a [`Topology`]
pub struct TopologyEditor<'topology> {
    topology: &'topology mut Topology,
}

impl<'topology> TopologyEditor<'topology> {
    pub(crate) fn new(topology: &'topology mut Topology) -> Self {
        Self { topology }
    }

    /// Merge structurally redundant levels: any normal object whose only
    /// child has the exact same cpuset and nodeset is spliced out
    pub fn merge_redundant_levels(&mut self) {
        loop {
            let mut to_remove = Vec::new();
            for (idx, data) in self.topology.objects.iter().enumerate() {
                if data.normal_children.len() == 1 {
                    let child_id = data.normal_children[0];
                    let child = &self.topology.objects[child_id.index()];
                    if child.cpuset == data.cpuset && child.nodeset == data.nodeset {
                        to_remove.push((ObjectId::new(idx), child_id));
                    }
                }
            }
            if to_remove.is_empty() {
                break;
            }
            for (parent_id, child_id) in to_remove {
                self.splice_out(parent_id, child_id);
            }
        }
    }

    fn splice_out(&mut self, parent_id: ObjectId, child_id: ObjectId) {
        let grandchildren = self.topology.objects[child_id.index()].normal_children.clone();
        for &gc in &grandchildren {
            self.topology.objects[gc.index()].parent = Some(parent_id);
        }
        self.topology.objects[parent_id.index()].normal_children = grandchildren;
    }

    /// Compute the restricted topology without mutating `self`, for atomic
    /// swap-in by [`Topology::restrict`](crate::topology::Topology::restrict)
    ///
    /// spec.md:125: with [`RestrictFlags::REMOVE_CPULESS`], an object whose
    /// cpuset/nodeset doesn't survive the restriction is dropped outright
    /// (its surviving descendants are reparented, same as a type filter);
    /// otherwise every object is kept, just with its cpuset/nodeset
    /// intersected down to (possibly empty of) the restriction.
    pub(crate) fn compute_restricted(
        &self,
        cpuset: &CpuSet,
        nodeset: &NodeSet,
        flags: RestrictFlags,
    ) -> Result<Topology, Error> {
        let topo = &*self.topology;
        let root_data = &topo.objects[topo.root.index()];
        if !root_data.cpuset.intersects(cpuset) {
            return Err(Error::InvalidArgument(
                "restriction cpuset does not intersect the topology".into(),
            ));
        }

        let remove_cpuless = flags.contains(RestrictFlags::REMOVE_CPULESS);
        let mut keep = vec![false; topo.objects.len()];
        let mut stack = vec![topo.root];
        while let Some(id) = stack.pop() {
            let data = &topo.objects[id.index()];
            let survives = !remove_cpuless
                || (data.cpuset.is_empty() && data.nodeset.is_empty())
                || data.cpuset.intersects(cpuset)
                || data.nodeset.intersects(nodeset);
            if survives || id == topo.root {
                keep[id.index()] = true;
                stack.extend(data.normal_children.iter().copied());
                stack.extend(data.memory_children.iter().copied());
                stack.extend(data.io_children.iter().copied());
                stack.extend(data.misc_children.iter().copied());
            }
        }

        let mut remap: HashMap<usize, ObjectId> = HashMap::new();
        let mut new_objects = Vec::new();
        for (old_idx, data) in topo.objects.iter().enumerate() {
            if keep[old_idx] {
                let mut new_data = data.clone();
                new_data.cpuset = data.cpuset.and(cpuset);
                new_data.nodeset = data.nodeset.and(nodeset);
                remap.insert(old_idx, ObjectId::new(new_objects.len()));
                new_objects.push(new_data);
            }
        }

        for data in &mut new_objects {
            data.parent = data.parent.and_then(|p| remap.get(&p.index()).copied());
            remap_ids(&mut data.normal_children, &remap);
            remap_ids(&mut data.memory_children, &remap);
            remap_ids(&mut data.io_children, &remap);
            remap_ids(&mut data.misc_children, &remap);
        }

        let new_root = *remap.get(&topo.root.index()).ok_or_else(|| {
            Error::InvalidArgument("restriction would remove the root object".into())
        })?;

        let mut restricted = Topology {
            objects: ObjectArena::Heap(new_objects),
            root: new_root,
            normal_levels: Vec::new(),
            memory_level: Vec::new(),
            bridge_level: Vec::new(),
            pcidevice_level: Vec::new(),
            osdevice_level: Vec::new(),
            misc_level: Vec::new(),
            flags: topo.flags,
            allowed_cpuset: topo.allowed_cpuset.and(cpuset),
            allowed_nodeset: topo.allowed_nodeset.and(nodeset),
            support: topo.support,
            is_this_system: topo.is_this_system,
            cpukinds: topo.cpukinds.clone(),
            distances: topo.distances.clone(),
            memattrs: topo.memattrs.clone(),
            hooks: std::sync::Arc::clone(&topo.hooks),
            next_gp_index: topo.next_gp_index,
        };
        rebuild_levels(&mut restricted);
        Ok(restricted)
    }
}

fn remap_ids(ids: &mut Vec<ObjectId>, remap: &HashMap<usize, ObjectId>) {
    ids.retain_mut(|id| match remap.get(&id.index()) {
        Some(&new_id) => {
            *id = new_id;
            true
        }
        None => false,
    });
}

pub(crate) fn rebuild_levels(topology: &mut Topology) {
    topology.normal_levels.clear();
    topology.memory_level.clear();
    topology.bridge_level.clear();
    topology.pcidevice_level.clear();
    topology.osdevice_level.clear();
    topology.misc_level.clear();

    for (idx, data) in topology.objects.iter().enumerate() {
        let id = ObjectId::new(idx);
        use crate::object::types::ObjectType::*;
        if data.object_type.is_normal() {
            let depth = data.depth.max(0) as usize;
            if topology.normal_levels.len() <= depth {
                topology.normal_levels.resize(depth + 1, Vec::new());
            }
            topology.normal_levels[depth].push(id);
        } else if data.object_type.is_memory() {
            topology.memory_level.push(id);
        } else if data.object_type == Bridge {
            topology.bridge_level.push(id);
        } else if data.object_type == PCIDevice {
            topology.pcidevice_level.push(id);
        } else if data.object_type == OSDevice {
            topology.osdevice_level.push(id);
        } else if data.object_type.is_misc() {
            topology.misc_level.push(id);
        }
    }
    for level in &mut topology.normal_levels {
        level.sort_by_key(|&id| topology.objects[id.index()].logical_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{object::types::ObjectType, topology::builder::tests::two_package_machine};

    #[test]
    fn restrict_to_one_package_drops_the_other_with_remove_cpuless() {
        let mut topo = two_package_machine();
        let mut cpuset = CpuSet::new();
        cpuset.set_range(0u32, 3u32);
        let nodeset = NodeSet::new();
        topo.restrict(&cpuset, &nodeset, RestrictFlags::REMOVE_CPULESS).unwrap();
        assert_eq!(topo.depth_for_type(ObjectType::Package).map(|d| topo.num_objects_at_depth(d)), Ok(1));
    }

    #[test]
    fn restrict_without_remove_cpuless_keeps_every_object() {
        let mut topo = two_package_machine();
        let before = topo.num_objects();
        let mut cpuset = CpuSet::new();
        cpuset.set_range(0u32, 3u32);
        let nodeset = NodeSet::new();
        topo.restrict(&cpuset, &nodeset, RestrictFlags::empty()).unwrap();
        assert_eq!(topo.num_objects(), before);
        assert_eq!(topo.depth_for_type(ObjectType::Package).map(|d| topo.num_objects_at_depth(d)), Ok(2));

        let package_with_no_cpus_left = topo
            .objects_at_normal_depth(topo.depth_for_type(ObjectType::Package).unwrap())
            .find(|o| o.cpuset().is_empty())
            .expect("the non-selected package should survive with an empty cpuset");
        assert!(package_with_no_cpus_left.cpuset().is_empty());
    }
}
