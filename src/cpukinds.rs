//! CPU-kinds registry
//!
//! Registers possibly-overlapping PU sets ("this cpuset is a `CoreType` P
//! core", "this one is an `E` core") and incrementally folds them into a
//! disjoint, efficiency-ranked partition of (a subset of) the topology's
//! PUs. The split/augment/disjoint algorithm below is pinned down by
//! `examples/original_source/hwloc/cpukinds.c`'s
//! `hwloc_internal_cpukinds_register`, per SPEC_FULL §4.5.

use crate::{bitmap::CpuSet, info::Info};
use std::fmt;

/// Caller-forced efficiency of a CPU kind, or unknown
///
/// `hwloc`'s C API represents "unknown" as a negative integer sentinel; here
/// it is a proper `Option`, and a forced efficiency is always non-negative.
pub type ForcedEfficiency = Option<i32>;

/// Flags accepted by [`CpuKindsRegistry::register`]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct RegisterFlags {
    /// When augmenting an existing kind whose forced efficiency is already
    /// known, overwrite it with the newly registered value rather than
    /// keeping the first one on record
    pub overwrite_forced_efficiency: bool,
}

/// One partition cell of the registry: a cpuset, a forced/resolved
/// efficiency, and accumulated info pairs
#[derive(Clone, Debug, PartialEq)]
pub struct CpuKind {
    cpuset: CpuSet,
    forced_efficiency: ForcedEfficiency,
    rank: Option<u32>,
    infos: Vec<Info>,
}

impl CpuKind {
    pub fn cpuset(&self) -> &CpuSet {
        &self.cpuset
    }

    pub fn forced_efficiency(&self) -> ForcedEfficiency {
        self.forced_efficiency
    }

    /// Resolved rank among this registry's kinds, 0 = least efficient
    ///
    /// `None` until [`CpuKindsRegistry`] can establish a total order (every
    /// kind must have a forced efficiency, per SPEC_FULL §4.5's resolution
    /// of the source's `cpukinds_rank` TODO).
    pub fn rank(&self) -> Option<u32> {
        self.rank
    }

    pub fn infos(&self) -> &[Info] {
        &self.infos
    }
}

/// Error returned by [`CpuKindsRegistry::register`]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum CpuKindRegisterError {
    /// The cpuset to register was empty
    #[error("cannot register a CPU kind with an empty cpuset")]
    EmptyCpuSet,
}

/// Error returned by [`CpuKindsRegistry::get_by_cpuset`]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum CpuKindQueryError {
    /// No registered kind contains any bit of the query set
    #[error("no CPU kind matches this cpuset")]
    NotFound,
    /// The query cpuset spans more than one registered kind
    ///
    /// Mirrors `cpukinds.c`'s `EXDEV` return for a straddling query.
    #[error("cpuset spans more than one CPU kind")]
    Straddles,
}

/// Registry of disjoint, ranked PU partitions (§4.5)
#[derive(Clone, Debug, Default)]
pub struct CpuKindsRegistry {
    kinds: Vec<CpuKind>,
}

impl CpuKindsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CpuKind> {
        self.kinds.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuKind> {
        self.kinds.iter()
    }

    /// Register `cpuset` as (part of) one CPU kind, splitting or augmenting
    /// existing kinds as needed to keep the registry a disjoint partition
    ///
    /// Steps exactly follow `hwloc_internal_cpukinds_register` (§4.5):
    /// for each existing kind `K`, in registration order, `compare_inclusion`
    /// decides whether the new set intersects/strictly-contains `K` (split
    /// `K` and the new set down to their intersection), is contained in or
    /// equal to `K` (augment `K`'s infos/forced efficiency, consume that
    /// much of the new set), or is disjoint (skip). Whatever remains of the
    /// new set once every existing kind has been considered becomes a fresh
    /// kind.
    pub fn register(
        &mut self,
        cpuset: &CpuSet,
        forced_efficiency: ForcedEfficiency,
        infos: &[Info],
        flags: RegisterFlags,
    ) -> Result<(), CpuKindRegisterError> {
        if cpuset.is_empty() {
            return Err(CpuKindRegisterError::EmptyCpuSet);
        }
        let mut remaining = cpuset.clone();
        let mut splits = Vec::new();
        for kind in &mut self.kinds {
            if remaining.is_empty() {
                break;
            }
            use crate::bitmap::BitmapInclusion::*;
            match remaining.compare_inclusion(&kind.cpuset) {
                Intersects | BStrictlyContainsA => {
                    // `remaining` (A) intersects or is strictly contained in
                    // `kind.cpuset` (B): split off the overlap into a new kind.
                    let overlap = remaining.and(&kind.cpuset);
                    let mut split_infos = kind.infos.clone();
                    split_infos.extend(infos.iter().cloned());
                    splits.push(CpuKind {
                        cpuset: overlap.clone(),
                        forced_efficiency: forced_efficiency.or(kind.forced_efficiency),
                        rank: None,
                        infos: split_infos,
                    });
                    kind.cpuset = kind.cpuset.andnot(&overlap);
                    remaining = remaining.andnot(&overlap);
                }
                AStrictlyContainsB | Equal => {
                    // `kind.cpuset` (B) is contained in (or equal to) the
                    // newly registered set: augment it in place.
                    kind.infos.extend(infos.iter().cloned());
                    if flags.overwrite_forced_efficiency || kind.forced_efficiency.is_none() {
                        kind.forced_efficiency = forced_efficiency;
                    }
                    remaining = remaining.andnot(&kind.cpuset);
                }
                Disjoint => {}
            }
        }
        self.kinds.extend(splits);
        self.kinds.retain(|k| !k.cpuset.is_empty());
        if !remaining.is_empty() {
            self.kinds.push(CpuKind {
                cpuset: remaining,
                forced_efficiency,
                rank: None,
                infos: infos.to_vec(),
            });
        }
        self.rerank();
        Ok(())
    }

    /// Intersect every kind's cpuset with `cpuset`, drop empty kinds, re-rank
    pub fn restrict(&mut self, cpuset: &CpuSet) {
        for kind in &mut self.kinds {
            kind.cpuset = kind.cpuset.and(cpuset);
        }
        self.kinds.retain(|k| !k.cpuset.is_empty());
        self.rerank();
    }

    /// The unique kind whose cpuset contains every bit of `query`
    pub fn get_by_cpuset(&self, query: &CpuSet) -> Result<usize, CpuKindQueryError> {
        let mut found = None;
        for (index, kind) in self.kinds.iter().enumerate() {
            if kind.cpuset.intersects(query) {
                if !query.is_included_in(&kind.cpuset) {
                    return Err(CpuKindQueryError::Straddles);
                }
                found = Some(index);
            }
        }
        found.ok_or(CpuKindQueryError::NotFound)
    }

    /// Re-rank every kind, 0 = least efficient
    ///
    /// If every kind has a forced efficiency, rank ascending by it; if not,
    /// every rank is left unset, matching the "backend-computed ordering is
    /// never implemented for this path" situation the original leaves as a
    /// TODO (SPEC_FULL §4.5/§9 resolves it this way rather than guessing a
    /// heuristic).
    fn rerank(&mut self) {
        if self.kinds.iter().all(|k| k.forced_efficiency.is_some()) && !self.kinds.is_empty() {
            let mut order: Vec<usize> = (0..self.kinds.len()).collect();
            order.sort_by_key(|&i| self.kinds[i].forced_efficiency.unwrap());
            for (rank, index) in order.into_iter().enumerate() {
                self.kinds[index].rank = Some(rank as u32);
            }
        } else {
            for kind in &mut self.kinds {
                kind.rank = None;
            }
        }
    }
}

impl fmt::Display for CpuKindsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, kind) in self.kinds.iter().enumerate() {
            writeln!(
                f,
                "kind {i}: {} (efficiency {:?}, rank {:?})",
                kind.cpuset, kind.forced_efficiency, kind.rank
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpuset(bits: &[u32]) -> CpuSet {
        let mut s = CpuSet::new();
        for &b in bits {
            s.set(b);
        }
        s
    }

    #[test]
    fn rejects_empty_cpuset() {
        let mut reg = CpuKindsRegistry::new();
        let err = reg.register(&CpuSet::new(), Some(0), &[], RegisterFlags::default());
        assert_eq!(err, Err(CpuKindRegisterError::EmptyCpuSet));
    }

    /// Scenario 2 from SPEC_FULL §8: registering A = {0,1,2,3} eff 1, then
    /// B = {2,3,4,5} eff 2, yields three disjoint kinds: {0,1} eff 1,
    /// {2,3} eff 2 (B's efficiency wins the split), {4,5} eff 2.
    #[test]
    fn incremental_split_and_augment() {
        let mut reg = CpuKindsRegistry::new();
        reg.register(&cpuset(&[0, 1, 2, 3]), Some(1), &[], RegisterFlags::default())
            .unwrap();
        reg.register(&cpuset(&[2, 3, 4, 5]), Some(2), &[], RegisterFlags::default())
            .unwrap();
        assert_eq!(reg.len(), 3);

        let middle = reg.get_by_cpuset(&cpuset(&[2, 3])).expect("middle kind");
        assert_eq!(reg.get(middle).unwrap().cpuset(), &cpuset(&[2, 3]));
        assert_eq!(reg.get(middle).unwrap().forced_efficiency(), Some(2));

        assert_eq!(reg.get_by_cpuset(&cpuset(&[1, 2])), Err(CpuKindQueryError::Straddles));
    }

    #[test]
    fn identical_registration_is_idempotent() {
        let mut reg = CpuKindsRegistry::new();
        let c = cpuset(&[0, 1]);
        let info = vec![Info::new("a", "b").unwrap()];
        reg.register(&c, Some(1), &info, RegisterFlags::default()).unwrap();
        let kinds_before: Vec<_> = reg.iter().map(|k| k.cpuset().clone()).collect();
        reg.register(&c, Some(1), &info, RegisterFlags::default()).unwrap();
        let kinds_after: Vec<_> = reg.iter().map(|k| k.cpuset().clone()).collect();
        assert_eq!(kinds_before, kinds_after);
    }

    #[test]
    fn out_of_range_bits_are_kept_verbatim() {
        // Open Question from SPEC_FULL §9: registering bits absent from the
        // topology is not validated against it here; they survive queries.
        let mut reg = CpuKindsRegistry::new();
        reg.register(&cpuset(&[9000]), Some(0), &[], RegisterFlags::default())
            .unwrap();
        assert!(reg.get_by_cpuset(&cpuset(&[9000])).is_ok());
    }

    #[test]
    fn restrict_drops_kinds_entirely_outside_the_new_set() {
        let mut reg = CpuKindsRegistry::new();
        reg.register(&cpuset(&[0, 1]), Some(0), &[], RegisterFlags::default()).unwrap();
        reg.register(&cpuset(&[2, 3]), Some(1), &[], RegisterFlags::default()).unwrap();
        reg.restrict(&cpuset(&[0, 1]));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn rank_unset_unless_every_kind_has_forced_efficiency() {
        let mut reg = CpuKindsRegistry::new();
        reg.register(&cpuset(&[0, 1]), None, &[], RegisterFlags::default()).unwrap();
        assert_eq!(reg.get(0).unwrap().rank(), None);
    }
}
