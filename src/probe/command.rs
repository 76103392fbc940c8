use super::Probe;
use crate::error::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Command-based probe: run via `sh -c`, non-zero exit means unhealthy.
pub struct CommandProbe {
    cmd: String,
    deadline: Duration,
}

impl CommandProbe {
    pub fn new(cmd: String, deadline: Duration) -> Self {
        Self { cmd, deadline }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn passes(&self, _pid: u32) -> Result<bool> {
        // kill_on_drop: a probe that outlives its deadline is killed when
        // the timed-out future drops it, so it cannot pile up across ticks.
        let result = tokio::time::timeout(
            self.deadline,
            Command::new("sh")
                .arg("-c")
                .arg(&self.cmd)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match result {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(_)) | Err(_) => Ok(false),
        }
    }

    fn failure_reason(&self) -> String {
        format!("check [{}] failed", self.cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_command_reports_healthy() {
        let probe = CommandProbe::new("true".into(), Duration::from_secs(5));
        assert!(probe.passes(1).await.unwrap());
    }

    #[tokio::test]
    async fn failing_command_reports_unhealthy() {
        let probe = CommandProbe::new("exit 3".into(), Duration::from_secs(5));
        assert!(!probe.passes(1).await.unwrap());
    }

    #[tokio::test]
    async fn stuck_command_fails_at_the_deadline() {
        let probe = CommandProbe::new("sleep 10".into(), Duration::from_millis(100));
        let start = std::time::Instant::now();
        assert!(!probe.passes(1).await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
