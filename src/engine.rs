//! Sequential plan execution with fail-fast abort semantics.
//!
//! Targets run one at a time in plan order. Per target the state machine
//! is `Pending -> Skipped` (skip predicate false) or `Pending -> Running ->
//! Success | Failed`; the first failure aborts every remaining target. A
//! pending interrupt is honored only at target boundaries: the in-flight
//! command finishes, the boundary target is reported Failed, and the rest
//! of the plan is dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{exit_codes, CapstanError, Result};
use crate::params::{Parameter, ParameterBinder};
use crate::resolver::ExecutionPlan;
use crate::subprocess::{ExitStatus, ProcessCommand, ProcessOutput, SubprocessManager};
use crate::target::TargetRegistry;

/// Terminal status of one planned target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetStatus {
    Success,
    Skipped,
    Failed,
}

/// One external command issued while a target's action ran, kept in full
/// for post-hoc diagnosis
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub target: String,
    pub status: TargetStatus,
    /// Exit code of the failing external command, when that is what failed
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub commands: Vec<CommandRecord>,
    pub duration: Duration,
}

/// Everything a target action may touch: bound parameters, the subprocess
/// manager, and the invocation's working directory. Commands issued through
/// the context are recorded onto the target's [`ExecutionResult`].
pub struct TargetContext {
    target: String,
    binder: ParameterBinder,
    subprocess: SubprocessManager,
    working_dir: PathBuf,
    commands: Mutex<Vec<CommandRecord>>,
}

impl TargetContext {
    fn new(
        target: &str,
        binder: ParameterBinder,
        subprocess: SubprocessManager,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            target: target.to_string(),
            binder,
            subprocess,
            working_dir,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Resolved value of an option, empty string when unset
    pub fn param(&self, name: &str) -> String {
        self.binder.value(name)
    }

    /// Full resolution including which layer supplied the value
    pub fn parameter(&self, name: &str) -> Parameter {
        self.binder.resolve(name)
    }

    /// Run an external command, recording its captured output. Non-zero
    /// exit is returned normally; the caller decides what it means.
    pub async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput> {
        let display = command.display();
        let output = self.subprocess.run(command).await?;
        self.commands.lock().unwrap().push(CommandRecord {
            command: display,
            exit_code: output.status.code(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            duration: output.duration,
        });
        Ok(output)
    }

    /// Run an external command and treat any non-success status as target
    /// failure carrying the command's exit code
    pub async fn run_checked(&self, command: ProcessCommand) -> Result<ProcessOutput> {
        let display = command.display();
        let output = self.run(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(CapstanError::command_failed(
                display,
                failure_exit_code(&output.status),
            ))
        }
    }

    fn take_commands(&self) -> Vec<CommandRecord> {
        std::mem::take(&mut self.commands.lock().unwrap())
    }
}

fn failure_exit_code(status: &ExitStatus) -> i32 {
    match status {
        ExitStatus::Success => 0,
        ExitStatus::Error(code) => *code,
        ExitStatus::Signal(sig) => 128 + sig,
        ExitStatus::Timeout => exit_codes::FAILURE,
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub results: Vec<ExecutionResult>,
    /// True when a failure (or interrupt) dropped the tail of the plan
    pub aborted: bool,
    pub exit_code: i32,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.exit_code == exit_codes::SUCCESS
    }

    /// The first failed result, if any
    pub fn first_failure(&self) -> Option<&ExecutionResult> {
        self.results
            .iter()
            .find(|r| r.status == TargetStatus::Failed)
    }

    /// Human-readable end-of-run table
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<16} {:<10} {:>10}\n",
            "Target", "Status", "Duration"
        ));
        out.push_str(&format!("{}\n", "-".repeat(38)));
        let mut total = Duration::ZERO;
        for result in &self.results {
            total += result.duration;
            out.push_str(&format!(
                "{:<16} {:<10} {:>9.2}s\n",
                result.target,
                format!("{:?}", result.status),
                result.duration.as_secs_f64()
            ));
        }
        out.push_str(&format!("{}\n", "-".repeat(38)));
        out.push_str(&format!(
            "{:<16} {:<10} {:>9.2}s\n",
            "Total",
            if self.success() { "Success" } else { "Failed" },
            total.as_secs_f64()
        ));
        out
    }
}

pub struct ExecutionEngine {
    subprocess: SubprocessManager,
    binder: ParameterBinder,
    working_dir: PathBuf,
    interrupted: Arc<AtomicBool>,
}

impl ExecutionEngine {
    pub fn new(subprocess: SubprocessManager, binder: ParameterBinder, working_dir: PathBuf) -> Self {
        Self {
            subprocess,
            binder,
            working_dir,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed at target boundaries; the binary wires it to
    /// SIGINT/SIGTERM
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Execute the plan in order until completion or first failure.
    ///
    /// Every planned target gets at most one [`ExecutionResult`]; targets
    /// after an abort get none. The report's exit code is 0 only if every
    /// planned target reached Success or Skipped.
    pub async fn run(&self, registry: &TargetRegistry, plan: &ExecutionPlan) -> ExecutionReport {
        let mut results = Vec::with_capacity(plan.len());
        let mut aborted = false;
        let mut exit_code = exit_codes::SUCCESS;

        for name in plan.iter() {
            if self.interrupted.load(Ordering::SeqCst) {
                let err = CapstanError::Interrupted {
                    target: name.to_string(),
                };
                warn!("{err}");
                exit_code = err.exit_code();
                results.push(failed_result(name, err, Vec::new(), Duration::ZERO));
                aborted = true;
                break;
            }

            // Plan names come from the registry, so this cannot miss
            let target = match registry.lookup(name) {
                Ok(target) => target,
                Err(err) => {
                    exit_code = err.exit_code();
                    results.push(failed_result(name, err, Vec::new(), Duration::ZERO));
                    aborted = true;
                    break;
                }
            };

            let ctx = Arc::new(TargetContext::new(
                target.name(),
                self.binder.clone(),
                self.subprocess.clone(),
                self.working_dir.clone(),
            ));

            if !target.should_run(&ctx) {
                debug!("skipping target '{}'", target.name());
                results.push(ExecutionResult {
                    target: target.name().to_string(),
                    status: TargetStatus::Skipped,
                    exit_code: None,
                    error: None,
                    commands: Vec::new(),
                    duration: Duration::ZERO,
                });
                continue;
            }

            if let Err(err) = self.binder.require_all(target) {
                warn!("{err}");
                exit_code = err.exit_code();
                results.push(failed_result(target.name(), err, Vec::new(), Duration::ZERO));
                aborted = true;
                break;
            }

            info!("running target '{}'", target.name());
            let start = Instant::now();
            let outcome = match target.action() {
                Some(action) => action(Arc::clone(&ctx)).await,
                None => Ok(()),
            };
            let duration = start.elapsed();
            let commands = ctx.take_commands();

            match outcome {
                Ok(()) => {
                    info!("target '{}' succeeded in {:?}", target.name(), duration);
                    results.push(ExecutionResult {
                        target: target.name().to_string(),
                        status: TargetStatus::Success,
                        exit_code: None,
                        error: None,
                        commands,
                        duration,
                    });
                }
                Err(err) => {
                    warn!("target '{}' failed: {err}", target.name());
                    exit_code = err.exit_code();
                    results.push(failed_result(target.name(), err, commands, duration));
                    aborted = true;
                    break;
                }
            }
        }

        ExecutionReport {
            results,
            aborted,
            exit_code,
        }
    }
}

fn failed_result(
    target: &str,
    err: CapstanError,
    commands: Vec<CommandRecord>,
    duration: Duration,
) -> ExecutionResult {
    let exit_code = match &err {
        CapstanError::CommandFailed { exit_code, .. } => Some(*exit_code),
        _ => None,
    };
    ExecutionResult {
        target: target.to_string(),
        status: TargetStatus::Failed,
        exit_code,
        error: Some(err.to_string()),
        commands,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterBinder;
    use crate::resolver::compute_plan;
    use crate::subprocess::{MockProcessRunner, ProcessCommandBuilder};
    use crate::target::{TargetBuilder, TargetRegistry};
    use std::collections::HashMap;

    fn engine_with_mock(binder: ParameterBinder) -> (ExecutionEngine, MockProcessRunner) {
        let (subprocess, mock) = SubprocessManager::mock();
        let engine = ExecutionEngine::new(subprocess, binder, PathBuf::from("."));
        (engine, mock)
    }

    fn toolchain_target(name: &str, program: &'static str) -> crate::target::Target {
        TargetBuilder::new(name)
            .action(move |ctx| async move {
                ctx.run_checked(ProcessCommandBuilder::new(program).arg("step").build())
                    .await?;
                Ok(())
            })
            .build()
    }

    #[tokio::test]
    async fn target_without_action_succeeds() {
        let mut registry = TargetRegistry::new();
        registry.register(TargetBuilder::new("noop").build()).unwrap();
        let plan = compute_plan(&registry, "noop").unwrap();

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        let report = engine.run(&registry, &plan).await;

        assert!(report.success());
        assert_eq!(report.results[0].status, TargetStatus::Success);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn skip_predicate_records_skipped_without_running() {
        let mut registry = TargetRegistry::new();
        registry
            .register(
                TargetBuilder::new("gated")
                    .only_when(|_| false)
                    .action(|ctx| async move {
                        ctx.run_checked(ProcessCommandBuilder::new("dotnet").build())
                            .await?;
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        let plan = compute_plan(&registry, "gated").unwrap();

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        let report = engine.run(&registry, &plan).await;

        assert!(report.success());
        assert_eq!(report.results[0].status, TargetStatus::Skipped);
        assert!(mock.verify_called("dotnet", 0));
    }

    #[tokio::test]
    async fn missing_parameter_aborts_before_any_command() {
        let mut registry = TargetRegistry::new();
        registry
            .register(
                TargetBuilder::new("publish")
                    .requires("api-key")
                    .action(|ctx| async move {
                        ctx.run_checked(ProcessCommandBuilder::new("dotnet").build())
                            .await?;
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        let plan = compute_plan(&registry, "publish").unwrap();

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        let report = engine.run(&registry, &plan).await;

        assert!(!report.success());
        assert_eq!(report.exit_code, exit_codes::MISSING_PARAMETER);
        assert_eq!(report.results[0].status, TargetStatus::Failed);
        assert!(report.aborted);
        // the action never ran, so no partial side effects
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn failure_aborts_remaining_plan_and_keeps_earlier_results() {
        let mut registry = TargetRegistry::new();
        registry.register(toolchain_target("a", "tool-a")).unwrap();
        registry
            .register(
                TargetBuilder::new("b")
                    .depends_on("a")
                    .action(|ctx| async move {
                        ctx.run_checked(ProcessCommandBuilder::new("tool-b").build())
                            .await?;
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        registry
            .register(
                TargetBuilder::new("c")
                    .depends_on("a")
                    .depends_on("b")
                    .action(|ctx| async move {
                        ctx.run_checked(ProcessCommandBuilder::new("tool-c").build())
                            .await?;
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        let plan = compute_plan(&registry, "c").unwrap();
        assert_eq!(plan.targets(), ["a", "b", "c"]);

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        mock.respond("tool-b", ExitStatus::Error(9), "");

        let report = engine.run(&registry, &plan).await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].status, TargetStatus::Success);
        assert_eq!(report.results[1].status, TargetStatus::Failed);
        assert_eq!(report.results[1].exit_code, Some(9));
        assert_eq!(report.exit_code, 9);
        assert!(report.aborted);
        assert!(mock.verify_called("tool-c", 0));
        assert_eq!(report.first_failure().unwrap().target, "b");
    }

    #[tokio::test]
    async fn commands_are_recorded_with_captured_output() {
        let mut registry = TargetRegistry::new();
        registry.register(toolchain_target("build", "dotnet")).unwrap();
        let plan = compute_plan(&registry, "build").unwrap();

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        mock.respond("dotnet", ExitStatus::Success, "Build succeeded.");

        let report = engine.run(&registry, &plan).await;
        let commands = &report.results[0].commands;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "dotnet step");
        assert_eq!(commands[0].exit_code, Some(0));
        assert_eq!(commands[0].stdout, "Build succeeded.");
    }

    #[tokio::test]
    async fn interrupt_flag_stops_at_target_boundary() {
        let mut registry = TargetRegistry::new();
        registry.register(toolchain_target("a", "tool-a")).unwrap();
        registry
            .register(TargetBuilder::new("b").depends_on("a").build())
            .unwrap();
        let plan = compute_plan(&registry, "b").unwrap();

        let (engine, mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        engine.interrupt_flag().store(true, Ordering::SeqCst);

        let report = engine.run(&registry, &plan).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].target, "a");
        assert_eq!(report.results[0].status, TargetStatus::Failed);
        assert_eq!(report.exit_code, exit_codes::INTERRUPTED);
        assert!(report.aborted);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn report_serializes_to_json() {
        let mut registry = TargetRegistry::new();
        registry.register(TargetBuilder::new("noop").build()).unwrap();
        let plan = compute_plan(&registry, "noop").unwrap();

        let (engine, _mock) = engine_with_mock(ParameterBinder::with_env(HashMap::new()));
        let report = engine.run(&registry, &plan).await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["results"][0]["target"], "noop");
        assert_eq!(json["results"][0]["status"], "Success");
    }

    #[test]
    fn summary_table_lists_every_result() {
        let report = ExecutionReport {
            results: vec![ExecutionResult {
                target: "compile".to_string(),
                status: TargetStatus::Success,
                exit_code: None,
                error: None,
                commands: Vec::new(),
                duration: Duration::from_millis(1500),
            }],
            aborted: false,
            exit_code: 0,
        };

        let summary = report.render_summary();
        assert!(summary.contains("compile"));
        assert!(summary.contains("Success"));
        assert!(summary.contains("Total"));
    }
}
