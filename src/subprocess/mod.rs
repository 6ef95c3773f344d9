//! External command execution with fully captured output.
//!
//! Targets never talk to `tokio::process` directly; they go through
//! [`SubprocessManager`], which wraps a [`ProcessRunner`] implementation.
//! Production code uses [`runner::TokioProcessRunner`]; tests swap in
//! [`MockProcessRunner`] and assert on the recorded call history.
//!
//! A non-zero exit code is not an error at this layer. `run` returns
//! normally with the captured [`ProcessOutput`]; the caller decides what a
//! given exit status means.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::MockProcessRunner;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.runner.run(command).await
    }
}
