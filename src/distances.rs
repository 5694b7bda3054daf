//! Distances registry
//!
//! Named `n x n` matrices of `u64` values over a set of objects (typically
//! NUMA-to-NUMA or PU-to-PU latency/bandwidth tables reported by the
//! platform), per SPEC_FULL §4.6.

use crate::object::ObjectId;
use bitflags::bitflags;
use std::collections::HashSet;

bitflags! {
    /// Flags describing what a distance table's values mean
    ///
    /// Exactly one of `LATENCY`/`BANDWIDTH` and exactly one of
    /// `FROM_OS`/`FROM_USER` must be set; [`DistancesRegistry::add`]
    /// validates this rather than trusting the caller.
    #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
    pub struct DistanceKindFlags: u32 {
        /// Lower values are better (e.g. latency)
        const LATENCY = 1 << 0;
        /// Higher values are better (e.g. bandwidth)
        const BANDWIDTH = 1 << 1;
        /// Reported directly by the OS/firmware
        const FROM_OS = 1 << 2;
        /// Supplied by the calling application
        const FROM_USER = 1 << 3;
        /// `objs` are not all of the same type
        const HETEROGENEOUS_TYPES = 1 << 4;
    }
}

/// Error returned by [`DistancesRegistry::add`]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum DistanceAddError {
    /// Neither or both of `LATENCY`/`BANDWIDTH` were set
    #[error("kind flags must set exactly one of LATENCY or BANDWIDTH")]
    AmbiguousValueDirection,
    /// Neither or both of `FROM_OS`/`FROM_USER` were set
    #[error("kind flags must set exactly one of FROM_OS or FROM_USER")]
    AmbiguousOrigin,
    /// Fewer than two objects were supplied
    #[error("a distance table needs at least two objects")]
    TooFewObjects,
    /// `values.len() != objs.len() * objs.len()`
    #[error("expected {expected} values for {n} objects, got {actual}")]
    WrongValueCount { n: usize, expected: usize, actual: usize },
    /// A table with this name is already registered
    #[error("a distance table named {0:?} already exists")]
    DuplicateName(String),
}

/// One named distance matrix
#[derive(Clone, Debug)]
pub struct DistanceTable {
    name: String,
    kind: DistanceKindFlags,
    objs: Vec<ObjectId>,
    /// Row-major `objs.len() x objs.len()` matrix
    values: Vec<u64>,
}

impl DistanceTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DistanceKindFlags {
        self.kind
    }

    pub fn objects(&self) -> &[ObjectId] {
        &self.objs
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    /// The value between `objs[i]` and `objs[j]`
    pub fn value(&self, i: usize, j: usize) -> u64 {
        self.values[i * self.objs.len() + j]
    }

    /// Index of an object within this table, if present
    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.objs.iter().position(|&o| o == id)
    }

    /// Whichever object pairs best with `i` (highest value if `BANDWIDTH`,
    /// lowest if `LATENCY`), excluding `i` itself
    pub fn best_partner(&self, i: usize) -> Option<usize> {
        let higher_is_better = self.kind.contains(DistanceKindFlags::BANDWIDTH);
        (0..self.objs.len())
            .filter(|&j| j != i)
            .max_by_key(|&j| {
                let v = self.value(i, j);
                if higher_is_better {
                    v
                } else {
                    u64::MAX - v
                }
            })
    }
}

/// Registry of named distance tables (§4.6)
#[derive(Clone, Debug, Default)]
pub struct DistancesRegistry {
    tables: Vec<DistanceTable>,
}

impl DistancesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistanceTable> {
        self.tables.iter()
    }

    /// Register a new table
    ///
    /// The *Group* synthesis flag from spec.md's `add` operation (creating a
    /// Group-type object covering sets of close objects) needs mutable
    /// access to the topology arena, so it is not part of this registry:
    /// [`crate::topology::editor::TopologyEditor`] calls this method and
    /// then separately inserts the synthesized Group object if requested.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: DistanceKindFlags,
        objs: Vec<ObjectId>,
        values: Vec<u64>,
    ) -> Result<(), DistanceAddError> {
        let name = name.into();
        if !(kind.contains(DistanceKindFlags::LATENCY) ^ kind.contains(DistanceKindFlags::BANDWIDTH)) {
            return Err(DistanceAddError::AmbiguousValueDirection);
        }
        if !(kind.contains(DistanceKindFlags::FROM_OS) ^ kind.contains(DistanceKindFlags::FROM_USER)) {
            return Err(DistanceAddError::AmbiguousOrigin);
        }
        if objs.len() < 2 {
            return Err(DistanceAddError::TooFewObjects);
        }
        let expected = objs.len() * objs.len();
        if values.len() != expected {
            return Err(DistanceAddError::WrongValueCount {
                n: objs.len(),
                expected,
                actual: values.len(),
            });
        }
        if self.tables.iter().any(|t| t.name == name) {
            return Err(DistanceAddError::DuplicateName(name));
        }
        self.tables.push(DistanceTable { name, kind, objs, values });
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&DistanceTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// All tables whose object set is entirely of the given type
    pub fn get_by_type<'a>(
        &'a self,
        object_type_of: impl Fn(ObjectId) -> crate::object::types::ObjectType + 'a,
        ty: crate::object::types::ObjectType,
    ) -> impl Iterator<Item = &'a DistanceTable> + 'a {
        self.tables
            .iter()
            .filter(move |t| t.objs.iter().all(|&o| object_type_of(o) == ty))
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.tables.len();
        self.tables.retain(|t| t.name != name);
        self.tables.len() != before
    }

    /// Drop objects no longer present after a restrict, dropping the whole
    /// table if fewer than two objects remain
    pub fn restrict(&mut self, surviving: &HashSet<ObjectId>) {
        for table in &mut self.tables {
            let keep: Vec<usize> = table
                .objs
                .iter()
                .enumerate()
                .filter(|(_, id)| surviving.contains(id))
                .map(|(i, _)| i)
                .collect();
            if keep.len() == table.objs.len() {
                continue;
            }
            let mut new_values = Vec::with_capacity(keep.len() * keep.len());
            for &i in &keep {
                for &j in &keep {
                    new_values.push(table.values[i * table.objs.len() + j]);
                }
            }
            table.objs = keep.iter().map(|&i| table.objs[i]).collect();
            table.values = new_values;
        }
        self.tables.retain(|t| t.objs.len() >= 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: usize) -> ObjectId {
        ObjectId::new(i)
    }

    #[test]
    fn rejects_ambiguous_value_direction() {
        let mut reg = DistancesRegistry::new();
        let err = reg.add(
            "bad",
            DistanceKindFlags::FROM_OS,
            vec![id(0), id(1)],
            vec![0, 1, 1, 0],
        );
        assert_eq!(err, Err(DistanceAddError::AmbiguousValueDirection));
    }

    #[test]
    fn rejects_wrong_value_count() {
        let mut reg = DistancesRegistry::new();
        let err = reg.add(
            "bad",
            DistanceKindFlags::LATENCY | DistanceKindFlags::FROM_OS,
            vec![id(0), id(1)],
            vec![0, 1, 1],
        );
        assert!(matches!(err, Err(DistanceAddError::WrongValueCount { .. })));
    }

    #[test]
    fn restrict_drops_table_below_two_survivors() {
        let mut reg = DistancesRegistry::new();
        reg.add(
            "numa",
            DistanceKindFlags::LATENCY | DistanceKindFlags::FROM_OS,
            vec![id(0), id(1), id(2)],
            vec![0, 10, 20, 10, 0, 15, 20, 15, 0],
        )
        .unwrap();
        let mut surviving = HashSet::new();
        surviving.insert(id(0));
        reg.restrict(&surviving);
        assert!(reg.get_by_name("numa").is_none());
    }

    #[test]
    fn restrict_remaps_surviving_submatrix() {
        let mut reg = DistancesRegistry::new();
        reg.add(
            "numa",
            DistanceKindFlags::BANDWIDTH | DistanceKindFlags::FROM_OS,
            vec![id(0), id(1), id(2)],
            vec![0, 10, 20, 10, 0, 15, 20, 15, 0],
        )
        .unwrap();
        let mut surviving = HashSet::new();
        surviving.insert(id(0));
        surviving.insert(id(2));
        reg.restrict(&surviving);
        let table = reg.get_by_name("numa").unwrap();
        assert_eq!(table.objects(), &[id(0), id(2)]);
        assert_eq!(table.value(0, 1), 20);
    }

    #[test]
    fn best_partner_picks_max_for_bandwidth() {
        let mut reg = DistancesRegistry::new();
        reg.add(
            "numa",
            DistanceKindFlags::BANDWIDTH | DistanceKindFlags::FROM_USER,
            vec![id(0), id(1), id(2)],
            vec![0, 10, 20, 10, 0, 15, 20, 15, 0],
        )
        .unwrap();
        let table = reg.get_by_name("numa").unwrap();
        assert_eq!(table.best_partner(0), Some(2));
    }
}
