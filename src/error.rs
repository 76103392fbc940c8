use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Duplicate service '{name}': declared at line {first_line} and again at line {second_line}")]
    #[diagnostic(
        code(foreman::manifest::duplicate_key),
        help("Service names must be unique within a procfile. Remove or rename one of the two entries")
    )]
    DuplicateService {
        name: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    #[diagnostic(
        code(foreman::manifest::unknown_dependency),
        help("Every name listed under `deps` must be declared as a top-level service in the procfile")
    )]
    UnknownDependency { service: String, dependency: String },

    #[error("Dependency cycle detected: [{}]", .0.join(", "))]
    #[diagnostic(
        code(foreman::graph::cycle),
        help("Services cannot depend on each other in a cycle. Review the `deps` fields of the listed services")
    )]
    DependencyCycle(Vec<String>),

    #[error("Manifest declares {declared} services, limit is {limit}")]
    #[diagnostic(
        code(foreman::manifest::too_many_services),
        help("Raise --max-services or split the procfile")
    )]
    TooManyServices { declared: usize, limit: usize },

    #[error("Port probes declared but port enumeration is unavailable: {0}")]
    #[diagnostic(
        code(foreman::probe::enumeration),
        help("TCP/UDP port checks need a readable /proc/net (Linux) or lsof (macOS). Remove the port checks or fix the environment")
    )]
    PortEnumerationUnavailable(String),

    #[error("Invalid duration '{0}'")]
    #[diagnostic(
        code(foreman::config::duration),
        help("Use forms like \"500ms\", \"5s\" or \"1m\"")
    )]
    InvalidDuration(String),

    #[error("Service '{0}' failed to spawn: {1}")]
    #[diagnostic(code(foreman::launch::spawn))]
    SpawnFailed(String, String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Signal handling error: {0}")]
    Signal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error prevents the supervisor from booting at all
    /// (manifest I/O, parse, duplicate key, unknown dep, cycle, preflight).
    pub fn is_boot_fatal(&self) -> bool {
        matches!(
            self,
            Error::Manifest(_)
                | Error::Yaml(_)
                | Error::Io(_)
                | Error::DuplicateService { .. }
                | Error::UnknownDependency { .. }
                | Error::DependencyCycle(_)
                | Error::TooManyServices { .. }
                | Error::PortEnumerationUnavailable(_)
                | Error::InvalidDuration(_)
        )
    }

    /// Process exit code for the CLI: 1 for boot-fatal errors, 2 for
    /// unrecoverable runtime faults.
    pub fn exit_code(&self) -> i32 {
        if self.is_boot_fatal() {
            1
        } else {
            2
        }
    }
}

/// Turn a service's recorded pid into a `Pid` that is safe to signal.
///
/// Pid 0 would address the caller's own process group, pid 1 is init,
/// and anything above `i32::MAX` cannot cross the kernel interface;
/// none of these may ever be signalled on behalf of a service.
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    let reason = match pid {
        0 => "pid 0 addresses our own process group",
        1 => "pid 1 is init",
        p if p > i32::MAX as u32 => "pid does not fit in i32",
        p => return Ok(nix::unistd::Pid::from_raw(p as i32)),
    };
    Err(Error::InvalidPid {
        pid,
        reason: format!("{} (service '{}')", reason, service_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_fatal_errors_exit_with_1() {
        let err = Error::DependencyCycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.exit_code(), 1);

        let err = Error::DuplicateService {
            name: "app1".into(),
            first_line: 1,
            second_line: 15,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn runtime_errors_exit_with_2() {
        let err = Error::Signal("stream closed".into());
        assert_eq!(err.exit_code(), 2);
        let err = Error::SpawnFailed("app1".into(), "no such file".into());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn rejects_reserved_pids() {
        assert!(validate_pid(0, "svc").is_err());
        assert!(validate_pid(1, "svc").is_err());
        assert!(validate_pid(4242, "svc").is_ok());
    }

    #[test]
    fn cycle_error_lists_witness() {
        let err = Error::DependencyCycle(vec!["app1".into(), "redis6010".into()]);
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: [app1, redis6010]"
        );
    }
}
