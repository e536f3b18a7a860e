/// Style Checker - lint warning counts for readability scoring
///
/// The default checker pipes the submission into an external linter
/// (`flake8 ... -`) and counts one warning per non-empty stdout line.
/// The linter is bounded by a timeout and killed if it overruns.

use async_trait::async_trait;
use codescore_common::config::StyleConfig;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("style checker unavailable: {0}")]
    Unavailable(String),

    #[error("style checker timed out after {0}ms")]
    Timeout(u64),

    #[error("style checker failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait StyleChecker: Send + Sync {
    async fn warning_count(&self, source: &str) -> Result<usize, CheckerError>;
}

/// Runs an external command with the source on stdin
#[derive(Debug, Clone)]
pub struct CommandChecker {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self, CheckerError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CheckerError::Unavailable("empty checker command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    pub fn from_config(config: &StyleConfig) -> Result<Self, CheckerError> {
        Self::new(&config.command, Duration::from_millis(config.timeout_ms))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, source: &str) -> Result<std::process::Output, CheckerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckerError::Unavailable(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A checker may exit before reading everything; its output still counts
            let _ = stdin.write_all(source.as_bytes()).await;
            drop(stdin);
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| CheckerError::Failed(e.to_string()))
    }
}

#[async_trait]
impl StyleChecker for CommandChecker {
    async fn warning_count(&self, source: &str) -> Result<usize, CheckerError> {
        let output = tokio::time::timeout(self.timeout, self.run(source))
            .await
            .map_err(|_| CheckerError::Timeout(self.timeout.as_millis() as u64))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let warnings = stdout.lines().filter(|line| !line.trim().is_empty()).count();

        // flake8 exits 1 when it reports warnings; anything else with no report is a crash
        let code = output.status.code();
        if warnings == 0 && !matches!(code, Some(0) | Some(1)) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CheckerError::Failed(format!(
                "exit status {:?}: {}",
                code,
                stderr.trim()
            )));
        }
        Ok(warnings)
    }
}
