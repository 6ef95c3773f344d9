use crate::error::CapstanError;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}

impl From<ProcessError> for CapstanError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Spawn { command, source } => CapstanError::Spawn { command, source },
            ProcessError::MockExpectationNotMet(message) => CapstanError::Action { message },
        }
    }
}
