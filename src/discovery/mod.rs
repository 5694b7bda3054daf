//! Discovery pipeline: pluggable backends contributing objects to a topology
//! under construction

pub mod backend;

pub use backend::{
    BackendError, DiscoveredObject, DiscoveryBackend, ReferenceBackend, SyntheticLevelPublic, SyntheticParseError,
};

use bitflags::bitflags;

bitflags! {
    /// Phases of discovery a backend may contribute to
    ///
    /// A topology build runs every registered backend once per phase, in
    /// the fixed phase order [`Phase::GLOBAL`] → [`Phase::CPU`] →
    /// [`Phase::MEMORY`] → [`Phase::PCI`] → [`Phase::IO`] →
    /// [`Phase::ANNOTATE`] → [`Phase::TWEAK`], and within a phase in
    /// descending priority order.
    #[derive(Default)]
    pub struct Phase: u32 {
        const GLOBAL = 1 << 0;
        const CPU = 1 << 1;
        const MEMORY = 1 << 2;
        const PCI = 1 << 3;
        const IO = 1 << 4;
        const ANNOTATE = 1 << 5;
        const TWEAK = 1 << 6;
    }
}

impl Phase {
    /// The fixed execution order of phases
    pub const ORDER: [Phase; 7] = [
        Phase::GLOBAL,
        Phase::CPU,
        Phase::MEMORY,
        Phase::PCI,
        Phase::IO,
        Phase::ANNOTATE,
        Phase::TWEAK,
    ];
}
