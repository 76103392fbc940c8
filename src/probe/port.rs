//! Port-to-pid enumeration.
//!
//! Contract: return the pid currently bound to (proto, port), or none.
//! On Linux the lookup is native: the socket inode comes from
//! `/proc/net/{tcp,tcp6,udp,udp6}` and is resolved to a pid by scanning
//! `/proc/<pid>/fd`. On macOS it shells out to `lsof`. Enumeration
//! failures are reported as errors; the reconciler treats them as probe
//! failures rather than trusting a blind spot.

use super::Probe;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Tcp,
    Udp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Tcp => write!(f, "tcp"),
            Proto::Udp => write!(f, "udp"),
        }
    }
}

/// Probe that a port is bound by exactly the service's own pid.
pub struct PortProbe {
    proto: Proto,
    port: u16,
}

impl PortProbe {
    pub fn new(proto: Proto, port: u16) -> Self {
        Self { proto, port }
    }
}

#[async_trait]
impl Probe for PortProbe {
    async fn passes(&self, pid: u32) -> Result<bool> {
        let proto = self.proto;
        let port = self.port;
        // The /proc walk is blocking filesystem work; keep it off the
        // runtime's async workers.
        let listener = tokio::task::spawn_blocking(move || listener_pid(proto, port))
            .await
            .map_err(|e| Error::Io(io::Error::other(format!("port probe task failed: {}", e))))??;

        Ok(listener == Some(pid))
    }

    fn failure_reason(&self) -> String {
        format!("{} port {} not bound by pid", self.proto, self.port)
    }
}

/// Boot-time check that port enumeration works at all. Only called when
/// the manifest declares port probes; its absence is fatal there and
/// irrelevant otherwise.
pub fn preflight() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/net/tcp")
            .map(|_| ())
            .map_err(|e| Error::PortEnumerationUnavailable(format!("/proc/net/tcp: {}", e)))
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("lsof")
            .arg("-v")
            .output()
            .map(|_| ())
            .map_err(|e| Error::PortEnumerationUnavailable(format!("lsof: {}", e)))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(Error::PortEnumerationUnavailable(
            "no enumeration backend for this platform".to_string(),
        ))
    }
}

/// Pid currently bound to (proto, port), or none.
pub fn listener_pid(proto: Proto, port: u16) -> io::Result<Option<u32>> {
    #[cfg(target_os = "linux")]
    {
        listener_pid_linux(proto, port)
    }

    #[cfg(target_os = "macos")]
    {
        listener_pid_macos(proto, port)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (proto, port);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "port enumeration not supported on this platform",
        ))
    }
}

#[cfg(target_os = "linux")]
fn listener_pid_linux(proto: Proto, port: u16) -> io::Result<Option<u32>> {
    let tables: [&str; 2] = match proto {
        Proto::Tcp => ["/proc/net/tcp", "/proc/net/tcp6"],
        Proto::Udp => ["/proc/net/udp", "/proc/net/udp6"],
    };

    for table in tables {
        let content = match std::fs::read_to_string(table) {
            Ok(content) => content,
            // tcp6/udp6 may be absent when IPv6 is disabled.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if let Some(inode) = socket_inode(&content, port, proto) {
            if let Some(pid) = pid_of_socket_inode(inode)? {
                return Ok(Some(pid));
            }
        }
    }

    Ok(None)
}

/// Find the socket inode bound to `port` in one /proc/net table.
///
/// Format per line (after the header):
/// `sl local_address rem_address st tx:rx tr:when retrnsmt uid timeout inode ...`
/// with the local port as four hex digits after the colon in field 1 and
/// the inode in field 9.
#[cfg(any(target_os = "linux", test))]
fn socket_inode(table: &str, port: u16, proto: Proto) -> Option<u64> {
    // Hex-encoded socket states: LISTEN for TCP, CLOSE (bound,
    // unconnected) for UDP.
    let wanted_state = match proto {
        Proto::Tcp => "0A",
        Proto::Udp => "07",
    };

    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let Some((_, local_port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        let Ok(local_port) = u16::from_str_radix(local_port_hex, 16) else {
            continue;
        };
        if local_port != port || !fields[3].eq_ignore_ascii_case(wanted_state) {
            continue;
        }
        if let Ok(inode) = fields[9].parse::<u64>() {
            return Some(inode);
        }
    }

    None
}

/// Walk /proc/<pid>/fd looking for `socket:[inode]`.
#[cfg(target_os = "linux")]
fn pid_of_socket_inode(inode: u64) -> io::Result<Option<u32>> {
    let target = format!("socket:[{}]", inode);

    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        // Processes may exit mid-scan; permission errors on foreign
        // processes are expected when unprivileged.
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link.to_str() == Some(target.as_str()) {
                    return Ok(Some(pid));
                }
            }
        }
    }

    Ok(None)
}

#[cfg(target_os = "macos")]
fn listener_pid_macos(proto: Proto, port: u16) -> io::Result<Option<u32>> {
    let spec = match proto {
        Proto::Tcp => format!("-iTCP:{}", port),
        Proto::Udp => format!("-iUDP:{}", port),
    };
    let mut cmd = std::process::Command::new("lsof");
    cmd.args(["-nP", "-Fp", &spec]);
    if proto == Proto::Tcp {
        cmd.arg("-sTCP:LISTEN");
    }

    let output = cmd.output()?;
    // lsof exits 1 when nothing matches; that is "no listener", not an error.
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p').and_then(|p| p.parse::<u32>().ok()) {
            return Ok(Some(pid));
        }
    }
    Ok(None)
}
