//! Discovery backends: pluggable contributors of topology knowledge
//!
//! A backend is a value implementing [`DiscoveryBackend`], registered with
//! [`crate::topology::TopologyBuilder::backend`]. `TopologyBuilder::build()`
//! runs every registered backend once per [`super::Phase`], in the fixed
//! phase order, and within a phase in descending [`DiscoveryBackend::priority`]
//! order, per SPEC_FULL §4.4.

use crate::{
    bitmap::CpuSet,
    discovery::Phase,
    object::{types::ObjectType, ObjectData, ObjectId},
    topology::Topology,
};

/// A discovery backend failed to contribute for this phase
///
/// Recovered by the pipeline (the backend is skipped and the failure logged
/// at `warn`); only surfaces to the builder's caller if every backend for a
/// required phase fails, per SPEC_FULL §4.4/§7.
#[derive(Clone, Debug, thiserror::Error)]
#[error("backend {backend:?} failed during {phase:?}: {message}")]
pub struct BackendError {
    pub backend: String,
    pub phase: Phase,
    pub message: String,
}

/// A value able to contribute objects to a topology under construction
pub trait DiscoveryBackend: Send + Sync {
    /// Stable, human-readable name (used in log messages and `HWLOC_COMPONENTS`-style ordering)
    fn name(&self) -> &str;

    /// Which phases this backend is willing to run during
    fn phases(&self) -> Phase;

    /// Higher runs first within a phase; ties break by registration order
    fn priority(&self) -> i32 {
        0
    }

    /// Contribute to the topology for the given phase
    ///
    /// Called once per phase this backend declares in [`Self::phases`], in
    /// the fixed phase order. May insert objects, attach infos, or otherwise
    /// mutate `topology`; must not assume any other backend has already run
    /// for a later phase.
    fn discover(&self, topology: &mut Topology, phase: Phase) -> Result<(), BackendError>;
}

/// Convenience staging type for an object a backend is about to insert
///
/// Mirrors `alloc_setup_object`/`insert_by_cpuset`/`insert_by_parent` from
/// SPEC_FULL §4.2/§3.2: a backend fills one of these, then calls
/// [`Topology::insert_by_cpuset`] (for objects with a cpuset) or
/// [`Topology::insert_by_parent`] (for cpuset-less I/O/Misc objects).
#[derive(Clone, Debug)]
pub struct DiscoveredObject {
    pub object_type: ObjectType,
    pub os_index: Option<u32>,
    pub name: Option<String>,
    pub cpuset: Option<CpuSet>,
}

impl DiscoveredObject {
    pub fn new(object_type: ObjectType) -> Self {
        Self { object_type, os_index: None, name: None, cpuset: None }
    }

    pub fn with_os_index(mut self, os_index: u32) -> Self {
        self.os_index = Some(os_index);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cpuset(mut self, cpuset: CpuSet) -> Self {
        self.cpuset = Some(cpuset);
        self
    }
}

impl Topology {
    /// Insert an object as the child of the least existing ancestor whose
    /// cpuset strictly contains `object.cpuset`, per SPEC_FULL §3.2
    ///
    /// Panics if `object.cpuset` is `None`; use [`Self::insert_by_parent`]
    /// for cpuset-less objects instead.
    pub(crate) fn insert_by_cpuset(&mut self, object: DiscoveredObject) -> ObjectId {
        let cpuset = object.cpuset.clone().expect("insert_by_cpuset requires a cpuset");
        let mut parent = self.root;
        loop {
            let child = self.objects[parent.index()].normal_children.iter().copied().find(|&c| {
                use crate::bitmap::BitmapInclusion::BStrictlyContainsA;
                cpuset.compare_inclusion(&self.objects[c.index()].cpuset) == BStrictlyContainsA
            });
            match child {
                Some(next) => parent = next,
                None => break,
            }
        }
        let depth = self.objects[parent.index()].depth + 1;
        let gp_index = self.next_gp_index();
        let mut data = ObjectData::new(object.object_type, depth, 0, gp_index);
        data.os_index = object.os_index;
        data.name = object.name;
        data.cpuset = cpuset.clone();
        data.complete_cpuset = cpuset;
        let id = self.allocate(data);
        self.objects[id.index()].parent = Some(parent);
        self.objects[parent.index()].normal_children.push(id);
        id
    }

    /// Insert a cpuset-less object directly under `parent`, into the child
    /// list matching its kind (memory, I/O, or misc)
    pub(crate) fn insert_by_parent(&mut self, parent: ObjectId, object: DiscoveredObject) -> ObjectId {
        let depth = self.objects[parent.index()].depth + 1;
        let gp_index = self.next_gp_index();
        let mut data = ObjectData::new(object.object_type, depth, 0, gp_index);
        data.os_index = object.os_index;
        data.name = object.name;
        let id = self.allocate(data);
        self.objects[id.index()].parent = Some(parent);
        let ty = object.object_type;
        let list = if ty.is_memory() {
            &mut self.objects[parent.index()].memory_children
        } else if ty.is_io() {
            &mut self.objects[parent.index()].io_children
        } else if ty.is_misc() {
            &mut self.objects[parent.index()].misc_children
        } else {
            &mut self.objects[parent.index()].normal_children
        };
        list.push(id);
        id
    }
}

/// One level of a parsed synthetic topology description
#[derive(Copy, Clone, Debug)]
struct SyntheticLevel {
    object_type: ObjectType,
    arity: u32,
}

/// Error parsing a synthetic topology description such as `"pack:2 core:2 pu:2"`
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SyntheticParseError {
    #[error("malformed level {0:?}, expected TYPE:ARITY")]
    Malformed(String),
    #[error("unknown level keyword {0:?}")]
    UnknownKeyword(String),
    #[error("arity must be a positive integer, got {0:?}")]
    BadArity(String),
    #[error("description has no levels")]
    Empty,
}

fn keyword_to_type(keyword: &str) -> Option<ObjectType> {
    Some(match keyword {
        "pack" | "package" => ObjectType::Package,
        "die" => ObjectType::Die,
        "group" => ObjectType::Group,
        "core" => ObjectType::Core,
        "pu" | "proc" => ObjectType::PU,
        "l1" => ObjectType::L1Cache,
        "l2" => ObjectType::L2Cache,
        "l3" => ObjectType::L3Cache,
        "l4" => ObjectType::L4Cache,
        "l5" => ObjectType::L5Cache,
        "l1i" => ObjectType::L1ICache,
        "l2i" => ObjectType::L2ICache,
        "l3i" => ObjectType::L3ICache,
        _ => return None,
    })
}

fn parse_synthetic(description: &str) -> Result<Vec<SyntheticLevel>, SyntheticParseError> {
    let mut levels = Vec::new();
    for token in description.split_whitespace() {
        let (keyword, arity) = token.split_once(':').ok_or_else(|| SyntheticParseError::Malformed(token.to_string()))?;
        let object_type =
            keyword_to_type(keyword).ok_or_else(|| SyntheticParseError::UnknownKeyword(keyword.to_string()))?;
        let arity: u32 = arity
            .parse()
            .ok()
            .filter(|&a| a > 0)
            .ok_or_else(|| SyntheticParseError::BadArity(arity.to_string()))?;
        levels.push(SyntheticLevel { object_type, arity });
    }
    if levels.is_empty() {
        return Err(SyntheticParseError::Empty);
    }
    Ok(levels)
}

fn build_siblings(
    topology: &mut Topology,
    parent: ObjectId,
    levels: &[SyntheticLevel],
    depth: usize,
    pu_counter: &mut u32,
) -> CpuSet {
    let level = levels[depth];
    let mut group_cpuset = CpuSet::new();
    for _ in 0..level.arity {
        let gp_index = topology.next_gp_index();
        let parent_depth = topology.objects[parent.index()].depth;
        let id = topology.allocate(ObjectData::new(level.object_type, parent_depth + 1, 0, gp_index));
        topology.objects[id.index()].parent = Some(parent);
        topology.objects[parent.index()].normal_children.push(id);

        let this_cpuset = if depth + 1 < levels.len() {
            build_siblings(topology, id, levels, depth + 1, pu_counter)
        } else {
            let mut c = CpuSet::new();
            c.set(*pu_counter);
            *pu_counter += 1;
            c
        };
        topology.objects[id.index()].cpuset = this_cpuset.clone();
        topology.objects[id.index()].complete_cpuset = this_cpuset.clone();
        group_cpuset = group_cpuset.or(&this_cpuset);
    }
    group_cpuset
}

/// The reference CPU-phase discovery backend: either a synthetic
/// description parser (for tests and fabricated machines) or a probe of the
/// local machine via `/proc/cpuinfo` (Linux) / `available_parallelism`
/// (everywhere else) — SPEC_FULL §4.4.
#[derive(Clone, Debug)]
pub enum ReferenceBackend {
    Synthetic(Vec<SyntheticLevelPublic>),
    Native(Option<std::path::PathBuf>),
}

/// Public mirror of the internal level representation, returned so callers
/// can inspect what a synthetic description parsed to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyntheticLevelPublic {
    pub object_type: ObjectType,
    pub arity: u32,
}

impl ReferenceBackend {
    /// Parse a synthetic description like `"pack:2 core:2 pu:2"`
    pub fn synthetic(description: &str) -> Result<Self, SyntheticParseError> {
        let levels = parse_synthetic(description)?;
        Ok(Self::Synthetic(
            levels.into_iter().map(|l| SyntheticLevelPublic { object_type: l.object_type, arity: l.arity }).collect(),
        ))
    }

    /// Probe the local machine
    pub fn native() -> Self {
        Self::Native(None)
    }

    /// Probe the local machine, reading `/proc`-style paths under `fsroot`
    /// instead of the real filesystem root (`HWLOC_FSROOT`)
    pub fn native_with_fsroot(fsroot: std::path::PathBuf) -> Self {
        Self::Native(Some(fsroot))
    }
}

impl DiscoveryBackend for ReferenceBackend {
    fn name(&self) -> &str {
        match self {
            Self::Synthetic(_) => "reference(synthetic)",
            Self::Native(_) => "reference(native)",
        }
    }

    fn phases(&self) -> Phase {
        Phase::CPU
    }

    fn priority(&self) -> i32 {
        0
    }

    fn discover(&self, topology: &mut Topology, phase: Phase) -> Result<(), BackendError> {
        if phase != Phase::CPU {
            return Ok(());
        }
        match self {
            Self::Synthetic(levels) => {
                let levels: Vec<SyntheticLevel> =
                    levels.iter().map(|l| SyntheticLevel { object_type: l.object_type, arity: l.arity }).collect();
                let mut pu_counter = 0;
                let root = topology.root;
                let cpuset = build_siblings(topology, root, &levels, 0, &mut pu_counter);
                topology.objects[root.index()].cpuset = cpuset.clone();
                topology.objects[root.index()].complete_cpuset = cpuset;
                Ok(())
            }
            Self::Native(fsroot) => build_native(topology, fsroot.as_deref()),
        }
    }
}

fn build_native(topology: &mut Topology, #[allow(unused_variables)] fsroot: Option<&std::path::Path>) -> Result<(), BackendError> {
    #[cfg(target_os = "linux")]
    if let Some(layout) = linux_cpuinfo_layout(fsroot) {
        build_from_layout(topology, &layout);
        return Ok(());
    }
    let n = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
    let root = topology.root;
    let mut root_cpuset = CpuSet::new();
    for os_index in 0..n {
        let gp_index = topology.next_gp_index();
        let mut data = ObjectData::new(ObjectType::PU, 1, 0, gp_index);
        data.os_index = Some(os_index);
        let mut c = CpuSet::new();
        c.set(os_index);
        data.cpuset = c.clone();
        data.complete_cpuset = c.clone();
        let id = topology.allocate(data);
        topology.objects[id.index()].parent = Some(root);
        topology.objects[root.index()].normal_children.push(id);
        root_cpuset = root_cpuset.or(&c);
    }
    topology.objects[root.index()].cpuset = root_cpuset.clone();
    topology.objects[root.index()].complete_cpuset = root_cpuset;
    Ok(())
}

#[cfg(target_os = "linux")]
fn linux_cpuinfo_layout(fsroot: Option<&std::path::Path>) -> Option<Vec<(u32, u32, u32)>> {
    let path = match fsroot {
        Some(root) => root.join("proc/cpuinfo"),
        None => std::path::PathBuf::from("/proc/cpuinfo"),
    };
    let text = std::fs::read_to_string(path).ok()?;
    let mut entries = Vec::new();
    let (mut processor, mut physical_id, mut core_id) = (None, None, None);
    for line in text.lines() {
        if line.trim().is_empty() {
            if let (Some(p), Some(phys), Some(core)) = (processor.take(), physical_id.take(), core_id.take()) {
                entries.push((phys, core, p));
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else { continue };
        match key.trim() {
            "processor" => processor = value.trim().parse().ok(),
            "physical id" => physical_id = value.trim().parse().ok(),
            "core id" => core_id = value.trim().parse().ok(),
            _ => {}
        }
    }
    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}

#[cfg(target_os = "linux")]
fn build_from_layout(topology: &mut Topology, entries: &[(u32, u32, u32)]) {
    use std::collections::BTreeMap;
    let mut packages: BTreeMap<u32, BTreeMap<u32, Vec<u32>>> = BTreeMap::new();
    for &(physical_id, core_id, processor) in entries {
        packages.entry(physical_id).or_default().entry(core_id).or_default().push(processor);
    }
    let root = topology.root;
    let mut root_cpuset = CpuSet::new();
    for (_, cores) in packages {
        let gp_index = topology.next_gp_index();
        let pkg_id = topology.allocate(ObjectData::new(ObjectType::Package, 1, 0, gp_index));
        topology.objects[pkg_id.index()].parent = Some(root);
        topology.objects[root.index()].normal_children.push(pkg_id);

        let mut pkg_cpuset = CpuSet::new();
        for (_, processors) in cores {
            let gp_index = topology.next_gp_index();
            let core_id = topology.allocate(ObjectData::new(ObjectType::Core, 2, 0, gp_index));
            topology.objects[core_id.index()].parent = Some(pkg_id);
            topology.objects[pkg_id.index()].normal_children.push(core_id);

            let mut core_cpuset = CpuSet::new();
            for processor in processors {
                let gp_index = topology.next_gp_index();
                let mut pu_data = ObjectData::new(ObjectType::PU, 3, 0, gp_index);
                pu_data.os_index = Some(processor);
                let mut c = CpuSet::new();
                c.set(processor);
                pu_data.cpuset = c.clone();
                pu_data.complete_cpuset = c.clone();
                let pu_id = topology.allocate(pu_data);
                topology.objects[pu_id.index()].parent = Some(core_id);
                topology.objects[core_id.index()].normal_children.push(pu_id);
                core_cpuset = core_cpuset.or(&c);
            }
            topology.objects[core_id.index()].cpuset = core_cpuset.clone();
            topology.objects[core_id.index()].complete_cpuset = core_cpuset.clone();
            pkg_cpuset = pkg_cpuset.or(&core_cpuset);
        }
        topology.objects[pkg_id.index()].cpuset = pkg_cpuset.clone();
        topology.objects[pkg_id.index()].complete_cpuset = pkg_cpuset.clone();
        root_cpuset = root_cpuset.or(&pkg_cpuset);
    }
    topology.objects[root.index()].cpuset = root_cpuset.clone();
    topology.objects[root.index()].complete_cpuset = root_cpuset;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_rejects_unknown_keyword() {
        assert_eq!(
            ReferenceBackend::synthetic("foo:2").unwrap_err(),
            SyntheticParseError::UnknownKeyword("foo".to_string())
        );
    }

    #[test]
    fn synthetic_rejects_zero_arity() {
        assert_eq!(ReferenceBackend::synthetic("pack:0").unwrap_err(), SyntheticParseError::BadArity("0".to_string()));
    }

    #[test]
    fn synthetic_two_package_machine_has_eight_pus() {
        let mut topo = Topology::default();
        let backend = ReferenceBackend::synthetic("pack:2 core:2 pu:2").unwrap();
        backend.discover(&mut topo, Phase::CPU).unwrap();
        let pu_count = topo
            .objects
            .iter()
            .filter(|o| o.object_type == ObjectType::PU)
            .count();
        assert_eq!(pu_count, 8);
        assert_eq!(topo.objects[topo.root.index()].cpuset.weight(), Some(8));
    }
}
