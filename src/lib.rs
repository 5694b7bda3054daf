//! Hardware locality discovery, topology modelling, and binding primitives
//!
//! This crate builds an in-memory tree describing a machine's processors,
//! caches, and memory, and exposes operations for reasoning about it: CPU and
//! memory binding, distance and memory-attribute queries, CPU-kind
//! classification on heterogeneous (big.LITTLE-style) machines, and
//! locality-aware enumeration of its objects.
//!
//! Start with [`topology::Topology::new`] to discover the local machine, or
//! [`topology::Topology::builder`] for more control over what gets
//! discovered and how. Everything else hangs off the resulting [`Topology`].

pub mod binding;
pub mod bitmap;
pub mod config;
pub mod cpu;
pub mod cpukinds;
pub mod discovery;
pub mod distances;
pub mod distrib;
pub mod error;
pub mod info;
pub mod memattrs;
pub mod memory;
pub mod object;
pub mod topology;

pub use bitmap::{Bitmap, BitmapIndex, CpuSet, NodeSet};
pub use error::Error;
pub use info::Info;
pub use object::{
    types::ObjectType,
    ObjectId, TopologyObject,
};
pub use topology::Topology;
