//! Unified error type for the whole crate, plus the process exit-code
//! contract the CLI reports through.
//!
//! Planning errors (duplicate target, unknown target, cycle) are fatal
//! before any execution starts. Per-target errors (missing parameter,
//! failed external command) abort the remaining plan but leave earlier
//! results intact.

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, CapstanError>;

/// Process exit codes reported by the CLI.
///
/// External command failures are surfaced with the child's own exit code,
/// so the reserved codes stay in the low range by convention only.
pub mod exit_codes {
    /// Every planned target reached Success or Skipped
    pub const SUCCESS: i32 = 0;
    /// Generic failure when a child exit code is unavailable
    pub const FAILURE: i32 = 1;
    /// Planning failed before any target ran (unknown target, cycle, duplicate)
    pub const PLANNING: i32 = 2;
    /// A target's required parameter resolved to an empty value
    pub const MISSING_PARAMETER: i32 = 3;
    /// Execution was interrupted at a target boundary
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Error, Debug)]
pub enum CapstanError {
    #[error("target '{name}' is already registered")]
    DuplicateTarget { name: String },

    #[error("unknown target '{name}'")]
    UnknownTarget { name: String },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("target '{target}' requires parameter '{param}' but it resolved to an empty value")]
    MissingParameter { param: String, target: String },

    #[error("command '{command}' failed with exit code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution interrupted before target '{target}'")]
    Interrupted { target: String },

    #[error("{message}")]
    Action { message: String },
}

impl CapstanError {
    pub fn duplicate_target(name: impl Into<String>) -> Self {
        Self::DuplicateTarget { name: name.into() }
    }

    pub fn unknown_target(name: impl Into<String>) -> Self {
        Self::UnknownTarget { name: name.into() }
    }

    pub fn missing_parameter(param: impl Into<String>, target: impl Into<String>) -> Self {
        Self::MissingParameter {
            param: param.into(),
            target: target.into(),
        }
    }

    pub fn command_failed(command: impl Into<String>, exit_code: i32) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
        }
    }

    /// Action-level failure that is not an external command exit
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    /// True for errors detected during planning, before any target runs
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTarget { .. }
                | Self::UnknownTarget { .. }
                | Self::CyclicDependency { .. }
        )
    }

    /// The process exit code this error maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DuplicateTarget { .. }
            | Self::UnknownTarget { .. }
            | Self::CyclicDependency { .. } => exit_codes::PLANNING,
            Self::MissingParameter { .. } => exit_codes::MISSING_PARAMETER,
            Self::CommandFailed { exit_code, .. } => {
                if *exit_code == 0 {
                    exit_codes::FAILURE
                } else {
                    *exit_code
                }
            }
            Self::Interrupted { .. } => exit_codes::INTERRUPTED,
            Self::Spawn { .. } | Self::Action { .. } => exit_codes::FAILURE,
        }
    }
}
