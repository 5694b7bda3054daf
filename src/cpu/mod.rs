//! CPU-related functionality: binding processes/threads to CPU sets

pub mod binding;
