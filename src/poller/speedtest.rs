use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::MeasurementError;
use crate::record::LiveResult;

const SPEEDTEST_ARGS: [&str; 4] = ["--accept-license", "--accept-gdpr", "-f", "json"];

/// Runs one speed measurement.
#[async_trait]
pub trait SpeedMeter: Send + Sync {
    async fn measure(&self) -> Result<LiveResult, MeasurementError>;
}

/// Invokes the Ookla speedtest CLI and parses its JSON output.
pub struct SpeedtestCli {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SpeedtestCli {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: SPEEDTEST_ARGS.iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }

    /// Replaces the default CLI arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl SpeedMeter for SpeedtestCli {
    async fn measure(&self) -> Result<LiveResult, MeasurementError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(command = %self.program, timeout_secs = self.timeout.as_secs(), "Running speedtest.");
        let child = command.spawn().map_err(|source| MeasurementError::Spawn {
            command: self.program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MeasurementError::Timeout(self.timeout))?
            .map_err(|source| MeasurementError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MeasurementError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(bytes = output.stdout.len(), "Speedtest output received.");
        Ok(LiveResult::from_json(&output.stdout)?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ParseError;

    fn shell(script: &str, timeout: Duration) -> SpeedtestCli {
        SpeedtestCli::new("/bin/sh", timeout).with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_parses_json_output() {
        let cli = shell(
            r#"echo '{"download": {"bandwidth": 12500000}, "isp": "TM"}'"#,
            Duration::from_secs(5),
        );
        let result = cli.measure().await.unwrap();
        assert_eq!(result.isp.as_deref(), Some("TM"));
        assert_eq!(result.download.unwrap().bandwidth, Some(12_500_000.0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let cli = shell("echo 'no servers' >&2; exit 2", Duration::from_secs(5));
        match cli.measure().await {
            Err(MeasurementError::Failed { stderr, .. }) => assert_eq!(stderr, "no servers"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparsable_output() {
        let cli = shell("echo 'Speedtest by Ookla'", Duration::from_secs(5));
        assert!(matches!(
            cli.measure().await,
            Err(MeasurementError::Parse(ParseError::InvalidPayload(_)))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let cli = shell("sleep 5", Duration::from_millis(100));
        assert!(matches!(cli.measure().await, Err(MeasurementError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cli = SpeedtestCli::new("/nonexistent/speedtest", Duration::from_secs(1));
        assert!(matches!(cli.measure().await, Err(MeasurementError::Spawn { .. })));
    }
}
