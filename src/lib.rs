//! # Capstan
//!
//! A declarative build target graph runner. Targets are registered once
//! with dependencies, ordering hints, parameter requirements, and an
//! action; requesting a target plans the minimal dependency closure in a
//! deterministic order and executes it sequentially with fail-fast abort.
//!
//! The pieces compose left to right:
//!
//! - [`target`]: immutable target definitions and the registry
//! - [`resolver`]: plan computation with cycle detection
//! - [`params`]: CLI > environment > default parameter binding
//! - [`engine`]: sequential execution, skip predicates, reporting
//! - [`subprocess`]: external command execution with captured output
//! - [`pipeline`]: the built-in clean/restore/compile/pack/publish targets

pub mod engine;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod resolver;
pub mod subprocess;
pub mod target;

pub use engine::{ExecutionEngine, ExecutionReport, ExecutionResult, TargetContext, TargetStatus};
pub use error::{CapstanError, Result};
pub use params::{ParamSource, Parameter, ParameterBinder};
pub use resolver::{compute_plan, ExecutionPlan};
pub use subprocess::SubprocessManager;
pub use target::{Target, TargetBuilder, TargetRegistry};
