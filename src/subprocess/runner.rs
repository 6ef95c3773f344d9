use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    /// Display form used in logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

/// Executes a command and captures its output in full.
///
/// Implementations return `Ok` for any exit status the child actually
/// produced; `Err` is reserved for failures to run the command at all
/// (spawn errors, undecodable output, exceeded timeout handling).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn convert_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            return ExitStatus::Success;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitStatus::Signal(sig);
            }
        }
        ExitStatus::Error(status.code().unwrap_or(-1))
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        tracing::debug!("executing: {}", command.display());
        if let Some(dir) = &command.working_dir {
            tracing::trace!("working directory: {}", dir.display());
        }

        let start = Instant::now();
        let mut cmd = Self::configure_command(&command);

        let output_fut = cmd.output();
        let output = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, output_fut).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        "command '{}' exceeded timeout of {:?}",
                        command.display(),
                        limit
                    );
                    return Ok(ProcessOutput {
                        status: ExitStatus::Timeout,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration: start.elapsed(),
                    });
                }
            },
            None => output_fut.await,
        };

        let output = output.map_err(|source| ProcessError::Spawn {
            command: command.display(),
            source,
        })?;

        let status = Self::convert_exit_status(output.status);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let duration = start.elapsed();

        tracing::debug!(
            "finished: {} ({:?}, {:?})",
            command.display(),
            status,
            duration
        );

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}
