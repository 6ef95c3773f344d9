//! Parameter resolution with fixed precedence: CLI flag, then environment
//! variable, then compiled-in default.
//!
//! The environment is snapshotted at construction (or injected by tests),
//! so resolution is pure and repeatable for the life of one invocation.
//! Option names are kebab-case; their environment equivalents are prefixed
//! SCREAMING_SNAKE (`api-key` reads `CAPSTAN_API_KEY`).

use std::collections::HashMap;

use crate::error::{CapstanError, Result};
use crate::target::Target;

/// Prefix for environment variable equivalents of option names
pub const ENV_PREFIX: &str = "CAPSTAN_";

/// Which layer supplied a parameter's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    Cli,
    Environment,
    Default,
    /// No layer supplied a value; resolved to the empty string
    Unset,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub source: ParamSource,
}

impl Parameter {
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Environment variable name for an option: kebab-case to prefixed
/// SCREAMING_SNAKE
pub fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{}", name.replace('-', "_").to_uppercase())
}

#[derive(Debug, Clone, Default)]
pub struct ParameterBinder {
    cli: HashMap<String, String>,
    env: HashMap<String, String>,
    defaults: HashMap<String, String>,
}

impl ParameterBinder {
    /// Binder over a snapshot of the current process environment
    pub fn new() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    /// Binder over an explicit environment map; tests use this so they
    /// never mutate process-wide state
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self {
            cli: HashMap::new(),
            env,
            defaults: HashMap::new(),
        }
    }

    /// Record a CLI-supplied value. A `None` leaves the lower layers in
    /// charge; an explicitly empty value still wins precedence and will
    /// fail a requirement check.
    pub fn cli(&mut self, name: &str, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.cli.insert(name.to_string(), value);
        }
        self
    }

    /// Register a compiled-in default
    pub fn default_value(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.defaults.insert(name.to_string(), value.into());
        self
    }

    /// Resolve one option with CLI > environment > default precedence;
    /// absence of all three yields an empty value with `Unset` source
    pub fn resolve(&self, name: &str) -> Parameter {
        if let Some(value) = self.cli.get(name) {
            return Parameter {
                name: name.to_string(),
                value: value.clone(),
                source: ParamSource::Cli,
            };
        }
        if let Some(value) = self.env.get(&env_key(name)) {
            return Parameter {
                name: name.to_string(),
                value: value.clone(),
                source: ParamSource::Environment,
            };
        }
        if let Some(value) = self.defaults.get(name) {
            return Parameter {
                name: name.to_string(),
                value: value.clone(),
                source: ParamSource::Default,
            };
        }
        Parameter {
            name: name.to_string(),
            value: String::new(),
            source: ParamSource::Unset,
        }
    }

    /// Resolved value only, empty string when unset
    pub fn value(&self, name: &str) -> String {
        self.resolve(name).value
    }

    /// Every parameter the target requires must resolve non-empty.
    ///
    /// Called by the engine immediately before the target's action,
    /// strictly before any external command for that target.
    pub fn require_all(&self, target: &Target) -> Result<()> {
        for param in target.requires() {
            if self.resolve(param).is_empty() {
                return Err(CapstanError::missing_parameter(param, target.name()));
            }
        }
        Ok(())
    }
}
