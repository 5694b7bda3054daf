//! Locality-aware PU enumerators: round-robin, scatter, and tleaf
//!
//! All three are realized as one coordinate-tuple engine, [`DistribIter`],
//! parameterised by an ordered list of levels — round-robin is a tleaf with
//! a single level, scatter is a tleaf over the root-to-target type chain,
//! per SPEC_FULL §4.9. The reference for the coordinate/retry algorithm is
//! `examples/original_source/hwloc/distrib.c`'s `hwloc_distrib_iterator_next`.
//!
//! That original keeps *two* independent orderings over the same per-level
//! array: `hwloc_distrib_iterator_next` always walks/resolves coordinates
//! into objects using the array sorted by `depth` (true top-down tree
//! order), while `hwloc_distrib_iterator_inc` decides which coordinate digit
//! carries fastest using the array sorted by `user_index` (reversed for
//! scatter). This module keeps the same split: [`DistribIter::levels`] is
//! always true top-down tree order, used only by [`DistribIter::resolve`];
//! a separate `increment_order` (built once in [`DistribIter::new`]) says
//! which level index carries fastest in [`DistribIter::advance`]. Round-robin
//! carries the bottom (right-most) level fastest; scatter carries the top
//! level fastest, which is what actually produces maximally-distant
//! neighbours since every increment of the top-level coordinate jumps to an
//! entirely different top-level subtree.

use crate::{
    object::{types::ObjectType, ObjectId},
    topology::Topology,
};

/// Error constructing or driving a [`DistribIter`]
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DistribError {
    /// `scatter`'s root-to-target walk found a subtree that is not
    /// shape-symmetric, so a single level chain cannot describe every branch
    #[error("distrib scatter requires a symmetric subtree below the given root")]
    AsymmetricSubtree,
    /// No object of the target type exists anywhere under the given root
    #[error("no object of the requested type exists under this root")]
    TypeNotFound,
}

/// Per-level index permutation applied before resolving a coordinate digit
///
/// Named to match spec.md's "Reverse and Shuffle flags", but modeled as an
/// enum rather than a bitflags set because `Shuffle` carries a seed: SPEC_FULL
/// §5 requires an explicit, caller-supplied `u64` seed (not the source's
/// `time(NULL)`) so shuffled output is reproducible in tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DistribFlags {
    /// Visit children in logical-index order
    Identity,
    /// Visit children in reverse logical-index order
    Reverse,
    /// Visit children in a Fisher–Yates shuffled order, seeded explicitly
    Shuffle(u64),
}

impl Default for DistribFlags {
    fn default() -> Self {
        Self::Identity
    }
}

/// Small deterministic PRNG for [`DistribFlags::Shuffle`]
///
/// Not cryptographic; exists only to turn an explicit `u64` seed into a
/// reproducible permutation without adding a `rand` dependency the rest of
/// this crate has no other use for.
struct XorShift64(u64);

impl XorShift64 {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn permutation_for(order: &DistribFlags, arity: u32) -> Vec<u32> {
    let mut v: Vec<u32> = (0..arity).collect();
    match order {
        DistribFlags::Identity => v,
        DistribFlags::Reverse => {
            v.reverse();
            v
        }
        DistribFlags::Shuffle(seed) => {
            let mut rng = XorShift64(seed | 1);
            for i in (1..v.len()).rev() {
                let j = (rng.next_u64() % (i as u64 + 1)) as usize;
                v.swap(i, j);
            }
            v
        }
    }
}

/// Descendants of `parent` matching `ty`, stopping the walk down any branch
/// as soon as a matching object is found, in left-to-right tree order
///
/// Walks `normal_children()` directly rather than sorting by logical index,
/// since a backend may run this before [`crate::topology::builder::TopologyBuilder`]
/// has assigned logical indices.
fn children_of_type(topology: &Topology, parent: ObjectId, ty: ObjectType) -> Vec<ObjectId> {
    let mut out = Vec::new();
    children_of_type_into(topology, parent, ty, true, &mut out);
    out
}

fn children_of_type_into(topology: &Topology, id: ObjectId, ty: ObjectType, is_root: bool, out: &mut Vec<ObjectId>) {
    let obj = topology.object(id);
    if !is_root && obj.object_type() == ty {
        out.push(id);
        return;
    }
    for child in obj.normal_children() {
        children_of_type_into(topology, child.id(), ty, false, out);
    }
}

fn compute_arities(topology: &Topology, root: ObjectId, levels: &[ObjectType]) -> Vec<u32> {
    let mut arities = Vec::with_capacity(levels.len());
    let mut parents = vec![root];
    for &ty in levels {
        let mut max_arity = 0u32;
        let mut next_parents = Vec::new();
        for &p in &parents {
            let kids = children_of_type(topology, p, ty);
            max_arity = max_arity.max(kids.len() as u32);
            next_parents.extend(kids);
        }
        arities.push(max_arity.max(1));
        parents = next_parents;
    }
    arities
}

/// Walk `first_normal_child` from `root` down to the first object of type
/// `target`, collecting one entry per depth; requires a shape-symmetric
/// subtree (checked via [`crate::object::TopologyObject::symmetric_subtree`])
fn level_chain(topology: &Topology, root: ObjectId, target: ObjectType) -> Result<Vec<ObjectType>, DistribError> {
    if !topology.object(root).symmetric_subtree() {
        return Err(DistribError::AsymmetricSubtree);
    }
    let mut chain = Vec::new();
    let mut current = root;
    loop {
        let Some(first) = topology.object(current).first_normal_child() else {
            return Err(DistribError::TypeNotFound);
        };
        chain.push(first.object_type());
        current = first.id();
        if chain.last() == Some(&target) {
            return Ok(chain);
        }
    }
}

/// A coordinate-tuple enumerator over a rooted subtree
///
/// Yields forever (wrapping the outermost coordinate on exhaustion), except
/// when the topology is asymmetric enough that no mapped object can be found
/// within one full product-of-arities pass, in which case iteration ends —
/// the bounded-retry realization of §4.9's Open Question.
pub struct DistribIter<'topology> {
    topology: &'topology Topology,
    root: ObjectId,
    /// Always true top-down tree order; used only to resolve a coordinate
    /// tuple into an object (see module docs)
    levels: Vec<ObjectType>,
    arities: Vec<u32>,
    permutations: Vec<Vec<u32>>,
    /// Level indices (into `levels`/`arities`/`coord`) in carry priority
    /// order, fastest-carrying first
    increment_order: Vec<usize>,
    coord: Vec<u32>,
    started: bool,
    exhausted: bool,
}

/// Carry priority for a plain tleaf/round-robin: right-most (bottom) level
/// carries fastest, per spec.md's "increments the tuple from ck to c1"
fn rightmost_fastest(n: usize) -> Vec<usize> {
    (0..n).rev().collect()
}

/// Carry priority for scatter: left-most (top) level carries fastest, so
/// that each increment jumps to a maximally distant subtree
fn leftmost_fastest(n: usize) -> Vec<usize> {
    (0..n).collect()
}

impl<'topology> DistribIter<'topology> {
    fn new(
        topology: &'topology Topology,
        root: ObjectId,
        levels: Vec<ObjectType>,
        increment_order: Vec<usize>,
        order: &DistribFlags,
    ) -> Self {
        let arities = compute_arities(topology, root, &levels);
        let permutations = arities.iter().map(|&a| permutation_for(order, a)).collect();
        let coord = vec![0; levels.len()];
        Self { topology, root, levels, arities, permutations, increment_order, coord, started: false, exhausted: false }
    }

    fn advance(&mut self) {
        for &i in &self.increment_order {
            self.coord[i] += 1;
            if self.coord[i] < self.arities[i] {
                return;
            }
            self.coord[i] = 0;
        }
    }

    fn resolve(&self) -> Option<ObjectId> {
        let mut current = self.root;
        for (level_idx, &ty) in self.levels.iter().enumerate() {
            let permuted_index = self.permutations[level_idx][self.coord[level_idx] as usize];
            let kids = children_of_type(self.topology, current, ty);
            current = *kids.get(permuted_index as usize)?;
        }
        Some(current)
    }

    /// `Π arity_i` bound on consecutive retries through unmapped coordinates,
    /// converting the source's unbounded self-recursion into a loop (§4.9)
    fn retry_bound(&self) -> u64 {
        self.arities.iter().map(|&a| a as u64).product::<u64>().max(1)
    }
}

impl<'topology> Iterator for DistribIter<'topology> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<ObjectId> {
        if self.exhausted {
            return None;
        }
        let bound = self.retry_bound();
        let mut tries = 0u64;
        loop {
            if !self.started {
                self.started = true;
            } else {
                self.advance();
            }
            if let Some(obj) = self.resolve() {
                return Some(obj);
            }
            tries += 1;
            if tries > bound {
                self.exhausted = true;
                return None;
            }
        }
    }
}

impl Topology {
    /// Round-robin enumerator: visit objects of type `ty` under `root` in
    /// logical-index order, wrapping on exhaustion
    pub fn round_robin(&self, root: ObjectId, ty: ObjectType, order: DistribFlags) -> DistribIter<'_> {
        let levels = vec![ty];
        let increment_order = rightmost_fastest(levels.len());
        DistribIter::new(self, root, levels, increment_order, &order)
    }

    /// Scatter enumerator: visit objects of type `ty` under `root` so that
    /// adjacent outputs are maximally distant in the tree
    pub fn scatter(&self, root: ObjectId, ty: ObjectType, order: DistribFlags) -> Result<DistribIter<'_>, DistribError> {
        let levels = level_chain(self, root, ty)?;
        let increment_order = leftmost_fastest(levels.len());
        Ok(DistribIter::new(self, root, levels, increment_order, &order))
    }

    /// Tleaf enumerator over an explicit, caller-chosen level sequence,
    /// top-down; carries the bottom (right-most) level fastest, matching
    /// round-robin's "tleaf with all levels in order top-down"
    pub fn tleaf(&self, root: ObjectId, levels: Vec<ObjectType>, order: DistribFlags) -> DistribIter<'_> {
        let increment_order = rightmost_fastest(levels.len());
        DistribIter::new(self, root, levels, increment_order, &order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::{DiscoveryBackend, Phase, ReferenceBackend},
        topology::builder::tests::two_package_machine,
    };

    #[test]
    fn round_robin_cycles_through_pus() {
        let topo = two_package_machine();
        let seq: Vec<ObjectId> = topo.round_robin(topo.root, ObjectType::PU, DistribFlags::Identity).take(10).collect();
        assert_eq!(seq[..8].iter().collect::<std::collections::HashSet<_>>().len(), 8);
        assert_eq!(seq[8], seq[0]);
        assert_eq!(seq[9], seq[1]);
    }

    #[test]
    fn round_robin_reverse_flag() {
        let topo = two_package_machine();
        let identity: Vec<ObjectId> = topo.round_robin(topo.root, ObjectType::PU, DistribFlags::Identity).take(8).collect();
        let reversed: Vec<ObjectId> = topo.round_robin(topo.root, ObjectType::PU, DistribFlags::Reverse).take(8).collect();
        let mut expected = identity.clone();
        expected.reverse();
        assert_eq!(reversed, expected);
    }

    #[test]
    fn scatter_maximizes_distance() {
        let topo = two_package_machine();
        let seq: Vec<ObjectId> = topo.scatter(topo.root, ObjectType::PU, DistribFlags::Identity).unwrap().take(8).collect();
        assert_eq!(seq.len(), 8);
        assert_eq!(seq.iter().collect::<std::collections::HashSet<_>>().len(), 8);
    }

    #[test]
    fn scatter_matches_the_worked_example() {
        // 2 packages x 2 cores x 2 PUs; expected sequence from spec.md's
        // scenario 6: package -> core -> PU, first unvisited sibling
        // farthest from the previous pick.
        let topo = two_package_machine();
        let depth = topo.depth_for_type(ObjectType::PU).unwrap();
        let logical: Vec<ObjectId> = topo.objects_at_normal_depth(depth).map(|o| o.id()).collect();
        let seq: Vec<u32> = topo
            .scatter(topo.root, ObjectType::PU, DistribFlags::Identity)
            .unwrap()
            .take(8)
            .map(|id| logical.iter().position(|&l| l == id).unwrap() as u32)
            .collect();
        assert_eq!(seq, vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    #[test]
    fn scatter_rejects_asymmetric_subtree() {
        let mut topo = Topology::default();
        let backend = ReferenceBackend::synthetic("pack:2 core:2 pu:2").unwrap();
        backend.discover(&mut topo, Phase::CPU).unwrap();
        // symmetric_subtree left at its default `false`
        assert_eq!(
            topo.scatter(topo.root, ObjectType::PU, DistribFlags::Identity).unwrap_err(),
            DistribError::AsymmetricSubtree
        );
    }

    #[test]
    fn shuffle_is_reproducible_given_the_same_seed() {
        let topo = two_package_machine();
        let a: Vec<ObjectId> = topo.round_robin(topo.root, ObjectType::PU, DistribFlags::Shuffle(42)).take(8).collect();
        let b: Vec<ObjectId> = topo.round_robin(topo.root, ObjectType::PU, DistribFlags::Shuffle(42)).take(8).collect();
        assert_eq!(a, b);
    }
}
