//! Object type taxonomy and depth classification

use enum_iterator::Sequence;
use std::fmt;

/// The kind of a topology object
///
/// Types are grouped into four namespaces that share the `depth` axis
/// differently: normal types occupy positive depths in strict parent/child
/// order, memory types hang off a normal parent at a shared negative depth,
/// I/O and Misc types are unordered and get their own negative depths.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Sequence)]
pub enum ObjectType {
    Machine,
    Package,
    Die,
    Group,
    NUMANode,
    L1Cache,
    L2Cache,
    L3Cache,
    L4Cache,
    L5Cache,
    L1ICache,
    L2ICache,
    L3ICache,
    MemCache,
    Core,
    PU,
    Bridge,
    PCIDevice,
    OSDevice,
    Misc,
}

impl ObjectType {
    /// Truth that this type lives on the normal (CPU topology) axis
    pub fn is_normal(self) -> bool {
        !self.is_memory() && !self.is_io() && !self.is_misc()
    }

    /// Truth that this type is a memory-side object (attached under a normal
    /// parent, sharing that parent's depth in the memory namespace)
    pub fn is_memory(self) -> bool {
        matches!(self, Self::NUMANode | Self::MemCache)
    }

    /// Truth that this type belongs to the I/O namespace
    pub fn is_io(self) -> bool {
        matches!(self, Self::Bridge | Self::PCIDevice | Self::OSDevice)
    }

    /// Truth that this type is the catch-all Misc namespace
    pub fn is_misc(self) -> bool {
        matches!(self, Self::Misc)
    }

    /// Truth that this is any kind of cache (data or instruction)
    pub fn is_cache(self) -> bool {
        self.is_dcache() || self.is_icache()
    }

    /// Truth that this is a data (or unified) cache
    pub fn is_dcache(self) -> bool {
        matches!(
            self,
            Self::L1Cache | Self::L2Cache | Self::L3Cache | Self::L4Cache | Self::L5Cache
        )
    }

    /// Truth that this is an instruction cache
    pub fn is_icache(self) -> bool {
        matches!(self, Self::L1ICache | Self::L2ICache | Self::L3ICache)
    }

    /// Cache level, for cache types; `None` otherwise
    pub fn cache_level(self) -> Option<u32> {
        Some(match self {
            Self::L1Cache | Self::L1ICache => 1,
            Self::L2Cache | Self::L2ICache => 2,
            Self::L3Cache | Self::L3ICache => 3,
            Self::L4Cache => 4,
            Self::L5Cache => 5,
            _ => return None,
        })
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Machine => "Machine",
            Self::Package => "Package",
            Self::Die => "Die",
            Self::Group => "Group",
            Self::NUMANode => "NUMANode",
            Self::L1Cache => "L1Cache",
            Self::L2Cache => "L2Cache",
            Self::L3Cache => "L3Cache",
            Self::L4Cache => "L4Cache",
            Self::L5Cache => "L5Cache",
            Self::L1ICache => "L1iCache",
            Self::L2ICache => "L2iCache",
            Self::L3ICache => "L3iCache",
            Self::MemCache => "MemCache",
            Self::Core => "Core",
            Self::PU => "PU",
            Self::Bridge => "Bridge",
            Self::PCIDevice => "PCIDevice",
            Self::OSDevice => "OSDevice",
            Self::Misc => "Misc",
        };
        f.write_str(s)
    }
}

/// A depth value in one of the four object namespaces
///
/// Normal depths are small non-negative integers assigned consecutively
/// during discovery. Memory, I/O, and Misc objects live in namespaces that
/// never number their depths the same way twice across topologies, so each
/// gets its own variant rather than sharing a single signed integer (the C
/// original's approach of reusing negative integers as namespace tags).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum TypeDepth {
    Normal(u32),
    Memory,
    Bridge,
    PCIDevice,
    OSDevice,
    Misc,
}

impl TypeDepth {
    /// Classify `ty`'s namespace, without resolving an actual normal depth
    pub fn namespace_of(ty: ObjectType) -> Option<Self> {
        if ty.is_memory() {
            Some(Self::Memory)
        } else if ty == ObjectType::Bridge {
            Some(Self::Bridge)
        } else if ty == ObjectType::PCIDevice {
            Some(Self::PCIDevice)
        } else if ty == ObjectType::OSDevice {
            Some(Self::OSDevice)
        } else if ty.is_misc() {
            Some(Self::Misc)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_classification() {
        assert!(ObjectType::L2Cache.is_dcache());
        assert!(!ObjectType::L2Cache.is_icache());
        assert!(ObjectType::L1ICache.is_icache());
        assert_eq!(ObjectType::L3Cache.cache_level(), Some(3));
        assert_eq!(ObjectType::Core.cache_level(), None);
    }

    #[test]
    fn namespace_classification() {
        assert!(ObjectType::NUMANode.is_memory());
        assert!(ObjectType::PCIDevice.is_io());
        assert!(ObjectType::Misc.is_misc());
        assert!(!ObjectType::Core.is_memory());
    }

    #[test]
    fn display_matches_type_name() {
        assert_eq!(ObjectType::NUMANode.to_string(), "NUMANode");
        assert_eq!(ObjectType::L1ICache.to_string(), "L1iCache");
    }
}
