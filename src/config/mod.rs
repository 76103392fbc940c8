//! Procfile (manifest) types and parsing.
//!
//! A procfile is a single top-level YAML mapping of service name to
//! descriptor. The descriptor fields are immutable after load; runtime
//! state lives in the [`Registry`](crate::registry::Registry).

mod parser;
mod service;
mod settings;

pub use parser::Parser;
pub use service::{Checks, ServiceSpec};
pub use settings::{parse_duration, Settings};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The parsed procfile: service name -> descriptor.
///
/// Backed by a `BTreeMap` so iteration order is deterministic, which keeps
/// graph construction and tests reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// True if any service declares a TCP or UDP port probe. Decides
    /// whether the port-enumeration preflight is required at boot.
    pub fn declares_port_probes(&self) -> bool {
        self.services.values().any(|s| s.checks.has_port_probes())
    }

    /// Every name referenced in a `deps` list must be declared as a
    /// top-level service.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.services {
            for dep in &spec.deps {
                if !self.services.contains_key(dep) {
                    return Err(Error::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
