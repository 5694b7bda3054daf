//! Memory-attributes registry
//!
//! Named scalar values (capacity, locality, bandwidth, latency, or a
//! caller-registered attribute) keyed by a target object and, for
//! initiator-sensitive attributes, an initiator location. Flags and the
//! four built-in IDs are pinned down by
//! `examples/original_source/include/hwloc/memattrs.h`, per SPEC_FULL §4.7.

use crate::{bitmap::CpuSet, object::ObjectId};
use std::collections::HashMap;

/// Where a memory access originates from
///
/// Mirrors `struct hwloc_location`'s tagged union exactly: either a specific
/// object, or a cpuset covering several PUs that all see the same locality.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    Object(ObjectId),
    CpuSet(CpuSet),
}

/// Built-in memory attribute identities, plus an escape hatch for
/// caller-registered attributes
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum MemAttrId {
    /// Total memory capacity of the target, in bytes. `HigherFirst`, no initiator.
    Capacity,
    /// Abstract locality score. `HigherFirst`, no initiator.
    Locality,
    /// Bytes/second achievable from a given initiator. `HigherFirst` + initiator required.
    Bandwidth,
    /// Nanoseconds of access latency from a given initiator. `LowerFirst` + initiator required.
    Latency,
    /// A caller-registered attribute, identified by a process-unique handle
    Custom(u32),
}

/// Direction in which values of an attribute should be compared
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Larger values are better (e.g. bandwidth, capacity)
    HigherFirst,
    /// Smaller values are better (e.g. latency)
    LowerFirst,
}

/// Static properties of a memory attribute
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemAttrFlags {
    pub direction: Direction,
    pub needs_initiator: bool,
}

impl MemAttrId {
    /// Flags for this attribute; built-ins are fixed per `memattrs.h` and
    /// cannot be overridden even by a caller registering the same id again
    pub fn flags(self) -> MemAttrFlags {
        use Direction::*;
        match self {
            Self::Capacity => MemAttrFlags { direction: HigherFirst, needs_initiator: false },
            Self::Locality => MemAttrFlags { direction: HigherFirst, needs_initiator: false },
            Self::Bandwidth => MemAttrFlags { direction: HigherFirst, needs_initiator: true },
            Self::Latency => MemAttrFlags { direction: LowerFirst, needs_initiator: true },
            Self::Custom(_) => MemAttrFlags { direction: HigherFirst, needs_initiator: false },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Capacity => "Capacity",
            Self::Locality => "Locality",
            Self::Bandwidth => "Bandwidth",
            Self::Latency => "Latency",
            Self::Custom(_) => "Custom",
        }
    }
}

/// Error returned by [`MemAttrsRegistry::set_value`]/[`MemAttrsRegistry::get_value`]
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MemAttrError {
    /// This attribute requires an initiator and none was given, or vice versa
    #[error("attribute {0:?} has needs_initiator={1}, but the call disagreed")]
    InitiatorMismatch(MemAttrId, bool),
    /// No value recorded for this (target[, initiator]) combination
    #[error("no value recorded for this target/initiator")]
    NotFound,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct Key {
    target: ObjectId,
    initiator: Option<LocationKey>,
}

/// A hashable stand-in for [`Location`] (`CpuSet` doesn't implement `Eq`
/// cheaply comparable by derive alone, so its list-form string is used as
/// the hash/equality witness instead of the bitmap's own, costlier, `Hash`)
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum LocationKey {
    Object(ObjectId),
    CpuSet(String),
}

impl From<&Location> for LocationKey {
    fn from(loc: &Location) -> Self {
        match loc {
            Location::Object(id) => Self::Object(*id),
            Location::CpuSet(set) => Self::CpuSet(set.to_list_string()),
        }
    }
}

/// Registry of memory attribute values (§4.7)
#[derive(Clone, Debug, Default)]
pub struct MemAttrsRegistry {
    values: HashMap<MemAttrId, HashMap<Key, u64>>,
    /// Preserves insertion order of initiators/targets per attribute, for
    /// `get_targets`/`get_initiators` to return deterministic results
    order: HashMap<MemAttrId, Vec<Key>>,
    locations: HashMap<Key, Location>,
}

impl MemAttrsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(id: MemAttrId, initiator: &Option<Location>) -> Result<(), MemAttrError> {
        let needs = id.flags().needs_initiator;
        if needs != initiator.is_some() {
            return Err(MemAttrError::InitiatorMismatch(id, needs));
        }
        Ok(())
    }

    pub fn set_value(
        &mut self,
        id: MemAttrId,
        target: ObjectId,
        initiator: Option<Location>,
        value: u64,
    ) -> Result<(), MemAttrError> {
        Self::validate(id, &initiator)?;
        let key = Key { target, initiator: initiator.as_ref().map(LocationKey::from) };
        let per_attr = self.values.entry(id).or_default();
        if !per_attr.contains_key(&key) {
            self.order.entry(id).or_default().push(key.clone());
        }
        per_attr.insert(key.clone(), value);
        if let Some(loc) = initiator {
            self.locations.insert(key, loc);
        }
        Ok(())
    }

    pub fn get_value(
        &self,
        id: MemAttrId,
        target: ObjectId,
        initiator: Option<&Location>,
    ) -> Result<u64, MemAttrError> {
        Self::validate(id, &initiator.cloned())?;
        let key = Key { target, initiator: initiator.map(LocationKey::from) };
        self.values
            .get(&id)
            .and_then(|per_attr| per_attr.get(&key))
            .copied()
            .ok_or(MemAttrError::NotFound)
    }

    /// Every target with a recorded value for `id`, optionally filtered to
    /// one initiator, in first-set order
    pub fn get_targets(&self, id: MemAttrId, initiator: Option<&Location>) -> Vec<ObjectId> {
        let want = initiator.map(LocationKey::from);
        self.order
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|k| k.initiator == want)
            .map(|k| k.target)
            .collect()
    }

    /// Every initiator with a recorded value against `target`, in
    /// first-set order
    pub fn get_initiators(&self, id: MemAttrId, target: ObjectId) -> Vec<Location> {
        self.order
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|k| k.target == target)
            .filter_map(|k| self.locations.get(k).cloned())
            .collect()
    }

    /// The target with the best value for `id` (optionally restricted to one
    /// initiator), per the attribute's direction flag
    ///
    /// Ties are broken by lowest [`ObjectId`], deterministically, rather than
    /// by hash-map iteration order (SPEC_FULL §4.7).
    pub fn get_best_target(&self, id: MemAttrId, initiator: Option<&Location>) -> Option<ObjectId> {
        let higher_is_better = id.flags().direction == Direction::HigherFirst;
        self.get_targets(id, initiator)
            .into_iter()
            .map(|target| {
                let value = self.get_value(id, target, initiator).unwrap();
                (target, value)
            })
            .fold(None, |best: Option<(ObjectId, u64)>, (target, value)| match best {
                None => Some((target, value)),
                Some((best_target, best_value)) => {
                    let better = if higher_is_better { value > best_value } else { value < best_value };
                    let tie_break = value == best_value && target.index() < best_target.index();
                    if better || tie_break {
                        Some((target, value))
                    } else {
                        Some((best_target, best_value))
                    }
                }
            })
            .map(|(target, _)| target)
    }

    /// The initiator with the best value against `target`, per direction
    pub fn get_best_initiator(&self, id: MemAttrId, target: ObjectId) -> Option<Location> {
        let higher_is_better = id.flags().direction == Direction::HigherFirst;
        let mut best: Option<(Location, u64)> = None;
        for initiator in self.get_initiators(id, target) {
            let value = self.get_value(id, target, Some(&initiator)).unwrap();
            best = match best {
                None => Some((initiator, value)),
                Some((best_init, best_value)) => {
                    let better = if higher_is_better { value > best_value } else { value < best_value };
                    if better {
                        Some((initiator, value))
                    } else {
                        Some((best_init, best_value))
                    }
                }
            };
        }
        best.map(|(loc, _)| loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: usize) -> ObjectId {
        ObjectId::new(i)
    }

    #[test]
    fn capacity_rejects_an_initiator() {
        let mut reg = MemAttrsRegistry::new();
        let err = reg.set_value(MemAttrId::Capacity, id(0), Some(Location::Object(id(1))), 100);
        assert_eq!(err, Err(MemAttrError::InitiatorMismatch(MemAttrId::Capacity, false)));
    }

    #[test]
    fn bandwidth_requires_an_initiator() {
        let mut reg = MemAttrsRegistry::new();
        let err = reg.set_value(MemAttrId::Bandwidth, id(0), None, 100);
        assert_eq!(err, Err(MemAttrError::InitiatorMismatch(MemAttrId::Bandwidth, true)));
    }

    #[test]
    fn best_target_picks_highest_for_bandwidth() {
        let mut reg = MemAttrsRegistry::new();
        let initiator = Location::Object(id(9));
        reg.set_value(MemAttrId::Bandwidth, id(0), Some(initiator.clone()), 10).unwrap();
        reg.set_value(MemAttrId::Bandwidth, id(1), Some(initiator.clone()), 30).unwrap();
        reg.set_value(MemAttrId::Bandwidth, id(2), Some(initiator.clone()), 20).unwrap();
        assert_eq!(reg.get_best_target(MemAttrId::Bandwidth, Some(&initiator)), Some(id(1)));
    }

    #[test]
    fn best_target_picks_lowest_for_latency() {
        let mut reg = MemAttrsRegistry::new();
        let initiator = Location::Object(id(9));
        reg.set_value(MemAttrId::Latency, id(0), Some(initiator.clone()), 10).unwrap();
        reg.set_value(MemAttrId::Latency, id(1), Some(initiator.clone()), 30).unwrap();
        assert_eq!(reg.get_best_target(MemAttrId::Latency, Some(&initiator)), Some(id(0)));
    }

    #[test]
    fn ties_broken_by_lowest_object_id() {
        let mut reg = MemAttrsRegistry::new();
        reg.set_value(MemAttrId::Capacity, id(5), None, 100).unwrap();
        reg.set_value(MemAttrId::Capacity, id(2), None, 100).unwrap();
        assert_eq!(reg.get_best_target(MemAttrId::Capacity, None), Some(id(2)));
    }

    #[test]
    fn get_value_missing_is_not_found() {
        let reg = MemAttrsRegistry::new();
        assert_eq!(reg.get_value(MemAttrId::Capacity, id(0), None), Err(MemAttrError::NotFound));
    }
}
