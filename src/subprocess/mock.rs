use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Test double for [`ProcessRunner`] that records every invocation.
///
/// Responses are matched by program name; an unmatched program succeeds
/// with empty output, so tests only describe the commands they care about.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

struct MockResponse {
    program: String,
    output: ProcessOutput,
    /// Consume this response after one use, falling through to later
    /// entries (or the default) on the next call
    once: bool,
    used: bool,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation of `program` reports this exit status
    pub fn respond(&self, program: &str, status: ExitStatus, stdout: &str) {
        self.push_response(program, status, stdout, false);
    }

    /// The next invocation of `program` reports this exit status; later
    /// invocations fall through to other responses or the default success
    pub fn respond_once(&self, program: &str, status: ExitStatus, stdout: &str) {
        self.push_response(program, status, stdout, true);
    }

    fn push_response(&self, program: &str, status: ExitStatus, stdout: &str, once: bool) {
        self.responses.lock().unwrap().push(MockResponse {
            program: program.to_string(),
            output: ProcessOutput {
                status,
                stdout: stdout.to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            },
            once,
            used: false,
        });
    }

    pub fn call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    /// Number of invocations recorded for `program`
    pub fn calls_to(&self, program: &str) -> usize {
        self.call_history
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.program == program)
            .count()
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        self.calls_to(program) == times
    }

    pub fn total_calls(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let mut responses = self.responses.lock().unwrap();
        for response in responses.iter_mut() {
            if response.program == command.program && !(response.once && response.used) {
                response.used = true;
                return Ok(response.output.clone());
            }
        }

        Ok(ProcessOutput {
            status: ExitStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        })
    }
}
