//! Environment-variable configuration
//!
//! [`Config::from_env`] is read once, at the start of
//! [`crate::topology::TopologyBuilder::build`], mirroring the teacher's
//! `HWLOC_*_VERBOSE`-style toggles being read once at load time rather than
//! polled throughout a run.

use std::path::PathBuf;

/// Parsed `HWLOC_*` environment configuration
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    /// `HWLOC_XML_VERBOSE` — log XML import/export activity at `debug` level
    ///
    /// Kept for completeness even though this crate has no XML loader; a
    /// future one would read this flag the way the native backend already
    /// reads [`Self::debug_load_time`].
    pub xml_verbose: bool,

    /// `HWLOC_SYNTHETIC_VERBOSE` — log synthetic-description parsing at `debug` level
    pub synthetic_verbose: bool,

    /// `HWLOC_COMPONENTS` — comma-separated backend allow/deny list
    ///
    /// Entries without a `-` prefix are an allow-list (only those backend
    /// names run); entries prefixed `-` are excluded regardless of the
    /// allow-list. An empty or unset variable runs every registered backend.
    pub components: Vec<ComponentSelector>,

    /// `HWLOC_FSROOT` — prefix prepended to `/proc`-style paths the native
    /// backend reads, for testing against a captured filesystem snapshot
    pub fsroot: Option<PathBuf>,

    /// `HWLOC_CPUID_PATH` — directory of captured `cpuid` dumps
    ///
    /// Stored but unused: this crate has no x86 `cpuid` backend to apply it to.
    pub cpuid_path: Option<PathBuf>,

    /// `HWLOC_THISSYSTEM` — force [`crate::topology::flags::BuildFlags::IS_THIS_SYSTEM`]
    /// on (`1`) or off (`0`), overriding the builder's own default
    pub thissystem: Option<bool>,

    /// `HWLOC_DEBUG_LOAD_TIME` — log the wall-clock time each discovery phase took
    pub debug_load_time: bool,
}

/// One `HWLOC_COMPONENTS` entry
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComponentSelector {
    Allow(String),
    Deny(String),
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self {
            xml_verbose: env_bool("HWLOC_XML_VERBOSE"),
            synthetic_verbose: env_bool("HWLOC_SYNTHETIC_VERBOSE"),
            components: std::env::var("HWLOC_COMPONENTS")
                .ok()
                .map(|v| parse_components(&v))
                .unwrap_or_default(),
            fsroot: std::env::var_os("HWLOC_FSROOT").map(PathBuf::from),
            cpuid_path: std::env::var_os("HWLOC_CPUID_PATH").map(PathBuf::from),
            thissystem: std::env::var("HWLOC_THISSYSTEM").ok().and_then(|v| match v.as_str() {
                "0" => Some(false),
                "1" => Some(true),
                _ => None,
            }),
            debug_load_time: env_bool("HWLOC_DEBUG_LOAD_TIME"),
        }
    }

    /// Truth that a backend named `name` should run, per [`Self::components`]
    pub fn backend_allowed(&self, name: &str) -> bool {
        if self.components.iter().any(|c| matches!(c, ComponentSelector::Deny(n) if n == name)) {
            return false;
        }
        let allow_list: Vec<&str> = self
            .components
            .iter()
            .filter_map(|c| match c {
                ComponentSelector::Allow(n) => Some(n.as_str()),
                ComponentSelector::Deny(_) => None,
            })
            .collect();
        allow_list.is_empty() || allow_list.contains(&name)
    }
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).map(|v| v != "0" && !v.is_empty()).unwrap_or(false)
}

fn parse_components(value: &str) -> Vec<ComponentSelector> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('-') {
            Some(name) => ComponentSelector::Deny(name.to_string()),
            None => ComponentSelector::Allow(s.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_allowed_with_no_components_is_permissive() {
        let config = Config::default();
        assert!(config.backend_allowed("reference(native)"));
    }

    #[test]
    fn allow_list_restricts_to_named_backends() {
        let config = Config { components: parse_components("reference(native),xml"), ..Config::default() };
        assert!(config.backend_allowed("reference(native)"));
        assert!(!config.backend_allowed("other"));
    }

    #[test]
    fn deny_entry_wins_over_an_empty_allow_list() {
        let config = Config { components: parse_components("-reference(native)"), ..Config::default() };
        assert!(!config.backend_allowed("reference(native)"));
        assert!(config.backend_allowed("other"));
    }

    #[test]
    fn components_parses_mixed_allow_and_deny_entries() {
        assert_eq!(
            parse_components("a,-b,c").into_iter().collect::<Vec<_>>(),
            vec![
                ComponentSelector::Allow("a".to_string()),
                ComponentSelector::Deny("b".to_string()),
                ComponentSelector::Allow("c".to_string()),
            ]
        );
    }
}
