//! Service descriptor types.

use serde::{de, Deserialize, Deserializer, Serialize};

/// Declarative description of one service. Immutable after load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Shell command to launch. Empty means the service is a pure
    /// dependency alias and is never spawned.
    #[serde(default)]
    pub cmd: String,

    /// If true, a clean exit is terminal and must not trigger a restart.
    #[serde(default)]
    pub run_once: bool,

    /// Services that must be active before this one starts.
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub checks: Checks,
}

impl ServiceSpec {
    /// A descriptor without a command is a grouping node in the
    /// dependency graph, satisfied without ever being launched.
    pub fn is_alias(&self) -> bool {
        self.cmd.trim().is_empty()
    }
}

/// Per-service health probes, evaluated by the reconciler on every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checks {
    /// Probe command run via `sh -c`; non-zero exit means unhealthy.
    #[serde(default)]
    pub cmd: String,

    /// TCP ports that must be bound by exactly this service's pid.
    #[serde(default, deserialize_with = "ports_from_yaml")]
    pub tcp_ports: Vec<u16>,

    /// UDP ports that must be bound by exactly this service's pid.
    #[serde(default, deserialize_with = "ports_from_yaml")]
    pub udp_ports: Vec<u16>,
}

impl Checks {
    pub fn has_port_probes(&self) -> bool {
        !self.tcp_ports.is_empty() || !self.udp_ports.is_empty()
    }
}

/// The reference procfile syntax quotes ports (`tcp_ports: ["6010"]`);
/// accept both strings and bare integers.
fn ports_from_yaml<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    let raw: Vec<PortRepr> = Vec::deserialize(deserializer)?;
    raw.into_iter()
        .map(|port| match port {
            PortRepr::Number(n) => Ok(n),
            PortRepr::Text(s) => s
                .trim()
                .parse::<u16>()
                .map_err(|_| de::Error::custom(format!("invalid port number '{}'", s))),
        })
        .collect()
}
