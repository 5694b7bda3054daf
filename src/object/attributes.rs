//! Per-type attribute payloads attached to objects

use crate::object::types::ObjectType;

/// Cache organization: the relationship between physical lines and sets
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum CacheAssociativity {
    Unknown,
    Full,
    NWay(u32),
}

/// Attributes of a cache object (data, instruction, or unified)
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CacheAttributes {
    pub size: Option<u64>,
    pub depth: u32,
    pub line_size: Option<u32>,
    pub associativity: CacheAssociativity,
}

/// Attributes of a NUMA node object
#[derive(Clone, Debug, PartialEq)]
pub struct NUMANodeAttributes {
    pub local_memory: u64,
    /// Page sizes with non-zero page counts, `(size, count)`
    pub page_types: Vec<(u64, u64)>,
}

/// Attributes of a Group object
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct GroupAttributes {
    /// Depth assigned to the group by its discovering backend, used to order
    /// groups relative to each other
    pub kind: u32,
    /// Group was synthesized during merging rather than discovered directly
    pub dont_merge: bool,
}

/// Attributes of a PCI device object
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PCIDeviceAttributes {
    pub domain: u32,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
    pub class_id: u16,
    pub vendor_id: u16,
    pub device_id: u16,
    pub subvendor_id: u16,
    pub subdevice_id: u16,
    pub revision: u8,
    /// Link speed, in GB/s, when known
    pub link_speed: Option<f32>,
}

/// Kind of bridge
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum BridgeType {
    Host,
    PCI,
}

/// Attributes of a Bridge object
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BridgeAttributes {
    pub upstream_type: BridgeType,
    pub downstream_domain: u32,
    pub downstream_secondary_bus: u8,
    pub downstream_subordinate_bus: u8,
}

/// Attributes of an OS device object
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum OSDeviceType {
    Storage,
    Network,
    OpenFabrics,
    DMA,
    GPU,
    CoProc,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OSDeviceAttributes {
    pub device_type: OSDeviceType,
}

/// The type-tagged union of per-object attributes
///
/// Mirrors the `hwloc_obj_attr_u` union, but as a closed Rust sum type: a
/// caller matching on this exhaustively cannot forget to handle a variant,
/// and no case requires reading a discriminant separately from the payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectAttributes {
    Cache(CacheAttributes),
    NUMANode(NUMANodeAttributes),
    Group(GroupAttributes),
    PCIDevice(PCIDeviceAttributes),
    Bridge(BridgeAttributes),
    OSDevice(OSDeviceAttributes),
    /// Machine/Package/Die/Core/PU/Misc carry no typed attributes
    None,
}

impl ObjectAttributes {
    /// The attribute variant that `ty` is expected to carry, used to validate
    /// that discovery backends attach the right shape of attributes
    pub fn expected_for(ty: ObjectType) -> &'static str {
        if ty.is_cache() {
            "Cache"
        } else if ty == ObjectType::NUMANode {
            "NUMANode"
        } else if ty == ObjectType::Group {
            "Group"
        } else if ty == ObjectType::PCIDevice {
            "PCIDevice"
        } else if ty == ObjectType::Bridge {
            "Bridge"
        } else if ty == ObjectType::OSDevice {
            "OSDevice"
        } else {
            "None"
        }
    }

    /// Human-readable attribute line, for types that carry printable
    /// attributes; `None` for types with no typed attribute payload
    ///
    /// The exact tokens are part of this crate's external contract (SPEC_FULL
    /// §6): `Cache L<depth> (<size>KB linesize <line> ways <ways>)`, `NUMANode
    /// (<size>KB)`, and `PCIDevice <domain:bus:dev.func>` followed by `sep`
    /// and `busid=..., id=<vendor>:<device>`.
    pub fn attr_snprintf(&self, sep: &str) -> Option<String> {
        match self {
            Self::Cache(c) => Some(c.snprintf()),
            Self::NUMANode(n) => Some(n.snprintf()),
            Self::PCIDevice(p) => Some(p.snprintf(sep)),
            Self::Group(_) | Self::Bridge(_) | Self::OSDevice(_) | Self::None => None,
        }
    }
}

impl CacheAttributes {
    fn snprintf(&self) -> String {
        let size_kb = self.size.map_or(0, |s| s / 1024);
        let line_size = self.line_size.unwrap_or(0);
        let ways = match self.associativity {
            CacheAssociativity::Unknown => "?".to_string(),
            CacheAssociativity::Full => "full".to_string(),
            CacheAssociativity::NWay(n) => n.to_string(),
        };
        format!("Cache L{} ({size_kb}KB linesize {line_size} ways {ways})", self.depth)
    }
}

impl NUMANodeAttributes {
    fn snprintf(&self) -> String {
        format!("NUMANode ({}KB)", self.local_memory / 1024)
    }
}

impl PCIDeviceAttributes {
    fn snprintf(&self, sep: &str) -> String {
        let busid = format!("{:04x}:{:02x}:{:02x}.{:x}", self.domain, self.bus, self.dev, self.func);
        format!("PCIDevice {busid}{sep}busid={busid}, id={:04x}:{:04x}", self.vendor_id, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_attr_snprintf_matches_the_stable_contract() {
        let attr = ObjectAttributes::Cache(CacheAttributes {
            size: Some(32 * 1024),
            depth: 1,
            line_size: Some(64),
            associativity: CacheAssociativity::NWay(8),
        });
        assert_eq!(attr.attr_snprintf(", ").unwrap(), "Cache L1 (32KB linesize 64 ways 8)");
    }

    #[test]
    fn numa_attr_snprintf_matches_the_stable_contract() {
        let attr = ObjectAttributes::NUMANode(NUMANodeAttributes { local_memory: 16 * 1024 * 1024, page_types: vec![] });
        assert_eq!(attr.attr_snprintf(", ").unwrap(), "NUMANode (16384KB)");
    }

    #[test]
    fn pci_attr_snprintf_matches_the_stable_contract() {
        let attr = ObjectAttributes::PCIDevice(PCIDeviceAttributes {
            domain: 0,
            bus: 1,
            dev: 0,
            func: 0,
            class_id: 0x0300,
            vendor_id: 0x10de,
            device_id: 0x1eb8,
            subvendor_id: 0,
            subdevice_id: 0,
            revision: 0,
            link_speed: None,
        });
        assert_eq!(attr.attr_snprintf(", ").unwrap(), "PCIDevice 0000:01:00.0, busid=0000:01:00.0, id=10de:1eb8");
    }

    #[test]
    fn types_with_no_payload_format_to_none() {
        assert!(ObjectAttributes::None.attr_snprintf(", ").is_none());
    }
}
