//! Health probes evaluated against active services.
//!
//! Probe order is fixed by the reconciler: command probe first, then TCP
//! port bindings, then UDP. Dependency liveness is not a probe; the
//! reconciler evaluates it directly against the registry snapshot before
//! anything here runs.

mod command;
mod port;

pub use command::CommandProbe;
pub use port::{listener_pid, preflight, PortProbe, Proto};

use crate::config::ServiceSpec;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One health observation against a running service.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Evaluate against the service's current pid. An `Err` is treated
    /// as a failed probe by the reconciler (restart a healthy service
    /// rather than trust a broken observation).
    async fn passes(&self, pid: u32) -> Result<bool>;

    /// Reason attached to the termination event when this probe fails.
    fn failure_reason(&self) -> String;
}

/// Probes for one service in evaluation order: cmd, tcp ports, udp ports.
pub fn probes_for(spec: &ServiceSpec, deadline: Duration) -> Vec<Box<dyn Probe>> {
    let mut probes: Vec<Box<dyn Probe>> = Vec::new();

    if !spec.checks.cmd.trim().is_empty() {
        probes.push(Box::new(CommandProbe::new(spec.checks.cmd.clone(), deadline)));
    }
    for &port in &spec.checks.tcp_ports {
        probes.push(Box::new(PortProbe::new(Proto::Tcp, port)));
    }
    for &port in &spec.checks.udp_ports {
        probes.push(Box::new(PortProbe::new(Proto::Udp, port)));
    }

    probes
}
