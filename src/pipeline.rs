//! The built-in clean/restore/compile/pack/publish pipeline.
//!
//! Targets shell out to an external project toolchain (`dotnet` by
//! default) through the subprocess layer; versions are opaque strings
//! threaded through to the build and pack steps without interpretation.
//! Clean only promises absence of previous build output, so re-running it
//! against an already-clean tree succeeds.

use std::fs;
use std::path::Path;

use crate::error::{CapstanError, Result};
use crate::params::ParameterBinder;
use crate::subprocess::ProcessCommandBuilder;
use crate::target::{TargetBuilder, TargetRegistry};

/// Recognized option names; each is settable via CLI flag, `CAPSTAN_*`
/// environment variable, or compiled-in default, in that precedence order
pub mod options {
    pub const CONFIGURATION: &str = "configuration";
    pub const API_KEY: &str = "api-key";
    pub const REPOSITORY_URL: &str = "repository-url";
    pub const TOOLCHAIN: &str = "toolchain";
    pub const PROJECT: &str = "project";
    pub const SOURCE_DIR: &str = "source-dir";
    pub const TESTS_DIR: &str = "tests-dir";
    pub const OUTPUT_DIR: &str = "output-dir";
    pub const PACK_PROJECTS: &str = "pack-projects";
    pub const ASSEMBLY_VERSION: &str = "assembly-version";
    pub const FILE_VERSION: &str = "file-version";
    pub const INFORMATIONAL_VERSION: &str = "informational-version";
}

/// Default package feed for publish
pub const DEFAULT_REPOSITORY_URL: &str = "https://api.nuget.org/v3/index.json";

/// Compiled-in defaults. `configuration` defaults to Debug for interactive
/// use and Release under automation, so `is_automated` should reflect a CI
/// environment.
pub fn apply_defaults(binder: &mut ParameterBinder, is_automated: bool) {
    binder.default_value(
        options::CONFIGURATION,
        if is_automated { "Release" } else { "Debug" },
    );
    binder.default_value(options::REPOSITORY_URL, DEFAULT_REPOSITORY_URL);
    binder.default_value(options::TOOLCHAIN, "dotnet");
    binder.default_value(options::SOURCE_DIR, "source");
    binder.default_value(options::TESTS_DIR, "tests");
    binder.default_value(options::OUTPUT_DIR, "output");
    binder.default_value(options::PACK_PROJECTS, "Core,Printer");
    binder.default_value(options::ASSEMBLY_VERSION, "1.0.0");
    binder.default_value(options::FILE_VERSION, "1.0.0.0");
    binder.default_value(options::INFORMATIONAL_VERSION, "1.0.0-local");
}

/// Binder over the live process environment with pipeline defaults applied
pub fn default_binder() -> ParameterBinder {
    let mut binder = ParameterBinder::new();
    let is_automated = std::env::var("CI").map(|v| !v.is_empty()).unwrap_or(false);
    apply_defaults(&mut binder, is_automated);
    binder
}

/// Register the five pipeline targets
pub fn registry() -> Result<TargetRegistry> {
    let mut registry = TargetRegistry::new();

    registry.register(
        TargetBuilder::new("clean")
            .before("restore")
            .action(|ctx| async move {
                let root = ctx.working_dir().clone();
                for dir in [
                    ctx.param(options::SOURCE_DIR),
                    ctx.param(options::TESTS_DIR),
                ] {
                    remove_build_dirs(&root.join(dir))?;
                }
                ensure_clean_dir(&root.join(ctx.param(options::OUTPUT_DIR)))
            })
            .build(),
    )?;

    registry.register(
        TargetBuilder::new("restore")
            .action(|ctx| async move {
                let mut cmd =
                    ProcessCommandBuilder::new(&ctx.param(options::TOOLCHAIN)).arg("restore");
                let project = ctx.param(options::PROJECT);
                if !project.is_empty() {
                    cmd = cmd.arg(&project);
                }
                ctx.run_checked(cmd.current_dir(ctx.working_dir()).build())
                    .await?;
                Ok(())
            })
            .build(),
    )?;

    registry.register(
        TargetBuilder::new("compile")
            .depends_on("restore")
            .requires(options::CONFIGURATION)
            .action(|ctx| async move {
                let mut cmd = ProcessCommandBuilder::new(&ctx.param(options::TOOLCHAIN))
                    .arg("build");
                let project = ctx.param(options::PROJECT);
                if !project.is_empty() {
                    cmd = cmd.arg(&project);
                }
                let cmd = cmd
                    .args([
                        "--configuration",
                        &ctx.param(options::CONFIGURATION),
                        "--no-restore",
                        "--verbosity",
                        "minimal",
                    ])
                    .arg(&format!(
                        "/p:AssemblyVersion={}",
                        ctx.param(options::ASSEMBLY_VERSION)
                    ))
                    .arg(&format!(
                        "/p:FileVersion={}",
                        ctx.param(options::FILE_VERSION)
                    ))
                    .arg(&format!(
                        "/p:InformationalVersion={}",
                        ctx.param(options::INFORMATIONAL_VERSION)
                    ))
                    .current_dir(ctx.working_dir());
                ctx.run_checked(cmd.build()).await?;
                Ok(())
            })
            .build(),
    )?;

    registry.register(
        TargetBuilder::new("pack")
            .depends_on("compile")
            .requires(options::CONFIGURATION)
            .action(|ctx| async move {
                let source_dir = ctx.param(options::SOURCE_DIR);
                let output_dir = ctx.param(options::OUTPUT_DIR);
                for project in ctx.param(options::PACK_PROJECTS).split(',') {
                    let project = project.trim();
                    if project.is_empty() {
                        continue;
                    }
                    let cmd = ProcessCommandBuilder::new(&ctx.param(options::TOOLCHAIN))
                        .arg("pack")
                        .arg(&format!("{source_dir}/{project}"))
                        .args(["--output", &output_dir])
                        .args(["--configuration", &ctx.param(options::CONFIGURATION)])
                        .arg(&format!(
                            "/p:AssemblyVersion={}",
                            ctx.param(options::ASSEMBLY_VERSION)
                        ))
                        .arg(&format!(
                            "/p:FileVersion={}",
                            ctx.param(options::FILE_VERSION)
                        ))
                        .arg(&format!(
                            "/p:InformationalVersion={}",
                            ctx.param(options::INFORMATIONAL_VERSION)
                        ))
                        .arg(&format!(
                            "/p:PackageVersion={}",
                            ctx.param(options::INFORMATIONAL_VERSION)
                        ))
                        .current_dir(ctx.working_dir());
                    ctx.run_checked(cmd.build()).await?;
                }
                Ok(())
            })
            .build(),
    )?;

    registry.register(
        TargetBuilder::new("publish")
            .depends_on("pack")
            .requires(options::API_KEY)
            .requires(options::REPOSITORY_URL)
            .action(|ctx| async move {
                let output_dir = ctx.working_dir().join(ctx.param(options::OUTPUT_DIR));
                let packages = find_packages(&output_dir)?;
                if packages.is_empty() {
                    return Err(CapstanError::action(format!(
                        "no packages found in {}",
                        output_dir.display()
                    )));
                }
                for package in packages {
                    let cmd = ProcessCommandBuilder::new(&ctx.param(options::TOOLCHAIN))
                        .args(["nuget", "push", &package])
                        .args(["--source", &ctx.param(options::REPOSITORY_URL)])
                        .args(["--api-key", &ctx.param(options::API_KEY)])
                        .current_dir(ctx.working_dir());
                    ctx.run_checked(cmd.build()).await?;
                }
                Ok(())
            })
            .build(),
    )?;

    Ok(registry)
}

/// Package files to push: every `*.nupkg` in the output directory except
/// symbols packages, in sorted order for reproducible push sequence
fn find_packages(output_dir: &Path) -> Result<Vec<String>> {
    let pattern = format!("{}/*.nupkg", output_dir.display());
    let mut packages: Vec<String> = glob::glob(&pattern)
        .map_err(|e| CapstanError::action(format!("bad package glob '{pattern}': {e}")))?
        .filter_map(|entry| entry.ok())
        .map(|path| path.display().to_string())
        .filter(|path| !path.ends_with(".symbols.nupkg"))
        .collect();
    packages.sort();
    Ok(packages)
}

/// Delete `**/bin` and `**/obj` under `root`. A missing root or already
/// deleted directory counts as done.
fn remove_build_dirs(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for sub in ["bin", "obj"] {
        let pattern = format!("{}/**/{sub}", root.display());
        let matches = glob::glob(&pattern)
            .map_err(|e| CapstanError::action(format!("bad clean glob '{pattern}': {e}")))?;
        for entry in matches.filter_map(|entry| entry.ok()) {
            if entry.is_dir() {
                if let Err(e) = fs::remove_dir_all(&entry) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(CapstanError::action(format!(
                            "failed to remove {}: {e}",
                            entry.display()
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Recreate `dir` empty. Absence beforehand is fine; absence afterwards is
/// not.
fn ensure_clean_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CapstanError::action(format!(
                "failed to clean {}: {e}",
                dir.display()
            )))
        }
    }
    fs::create_dir_all(dir)
        .map_err(|e| CapstanError::action(format!("failed to create {}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionEngine, TargetStatus};
    use crate::resolver::compute_plan;
    use crate::subprocess::{ExitStatus, SubprocessManager};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn test_binder() -> ParameterBinder {
        let mut binder = ParameterBinder::with_env(HashMap::new());
        apply_defaults(&mut binder, false);
        binder
    }

    #[test]
    fn publish_plan_orders_the_full_pipeline() {
        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "publish").unwrap();
        assert_eq!(plan.targets(), ["restore", "compile", "pack", "publish"]);
    }

    #[test]
    fn compile_plan_does_not_include_clean() {
        // clean's before(restore) hint is advisory; nothing depends on
        // clean, so requesting compile must not drag it in
        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "compile").unwrap();
        assert_eq!(plan.targets(), ["restore", "compile"]);
    }

    #[test]
    fn configuration_default_tracks_automation() {
        let mut local = ParameterBinder::with_env(HashMap::new());
        apply_defaults(&mut local, false);
        assert_eq!(local.value(options::CONFIGURATION), "Debug");

        let mut ci = ParameterBinder::with_env(HashMap::new());
        apply_defaults(&mut ci, true);
        assert_eq!(ci.value(options::CONFIGURATION), "Release");
    }

    #[tokio::test]
    async fn clean_succeeds_twice_against_absent_artifacts() {
        let workdir = tempfile::tempdir().unwrap();
        let bin = workdir.path().join("source/Core/bin/Debug");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("Core.dll"), b"x").unwrap();

        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "clean").unwrap();

        let (subprocess, mock) = SubprocessManager::mock();
        let engine = ExecutionEngine::new(
            subprocess,
            test_binder(),
            workdir.path().to_path_buf(),
        );

        let first = engine.run(&registry, &plan).await;
        assert_eq!(first.results[0].status, TargetStatus::Success);
        assert!(!bin.exists());
        assert!(workdir.path().join("output").exists());

        // second run: everything already absent, absence is the success
        // condition
        let second = engine.run(&registry, &plan).await;
        assert_eq!(second.results[0].status, TargetStatus::Success);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn compile_invokes_toolchain_with_configuration_and_versions() {
        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "compile").unwrap();

        let (subprocess, mock) = SubprocessManager::mock();
        let engine = ExecutionEngine::new(subprocess, test_binder(), PathBuf::from("."));
        let report = engine.run(&registry, &plan).await;

        assert!(report.success());
        assert!(mock.verify_called("dotnet", 2)); // restore + build
        let history = mock.call_history();
        assert_eq!(history[0].args[0], "restore");
        assert_eq!(history[1].args[0], "build");
        assert!(history[1].args.contains(&"--configuration".to_string()));
        assert!(history[1].args.contains(&"Debug".to_string()));
        assert!(history[1]
            .args
            .iter()
            .any(|a| a == "/p:AssemblyVersion=1.0.0"));
    }

    #[tokio::test]
    async fn publish_requires_api_key_and_never_pushes_without_it() {
        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "publish").unwrap();

        let (subprocess, mock) = SubprocessManager::mock();
        // binder has repository-url default but no api-key anywhere
        let engine = ExecutionEngine::new(subprocess, test_binder(), PathBuf::from("."));
        let report = engine.run(&registry, &plan).await;

        assert!(!report.success());
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.target, "publish");
        // restore + compile + 2 packs ran; publish issued nothing
        assert!(mock.verify_called("dotnet", 4));
    }

    #[tokio::test]
    async fn publish_pushes_each_package_except_symbols() {
        let workdir = tempfile::tempdir().unwrap();
        let output = workdir.path().join("output");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("Core.1.0.0.nupkg"), b"pkg").unwrap();
        fs::write(output.join("Printer.1.0.0.nupkg"), b"pkg").unwrap();
        fs::write(output.join("Core.1.0.0.symbols.nupkg"), b"pkg").unwrap();

        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "publish").unwrap();

        let (subprocess, mock) = SubprocessManager::mock();
        let mut binder = test_binder();
        binder.cli(options::API_KEY, Some("secret".to_string()));
        let engine = ExecutionEngine::new(subprocess, binder, workdir.path().to_path_buf());

        let report = engine.run(&registry, &plan).await;
        assert!(report.success(), "report: {:?}", report.first_failure());

        let pushes: Vec<_> = mock
            .call_history()
            .into_iter()
            .filter(|cmd| cmd.args.first().map(String::as_str) == Some("nuget"))
            .collect();
        assert_eq!(pushes.len(), 2);
        for push in &pushes {
            assert!(!push.args.iter().any(|a| a.ends_with(".symbols.nupkg")));
            assert!(push.args.contains(&DEFAULT_REPOSITORY_URL.to_string()));
            assert!(push.args.contains(&"secret".to_string()));
        }
    }

    #[tokio::test]
    async fn pack_failure_aborts_before_publish() {
        let registry = registry().unwrap();
        let plan = compute_plan(&registry, "publish").unwrap();

        let (subprocess, mock) = SubprocessManager::mock();
        // restore and build succeed, first pack fails
        mock.respond_once("dotnet", ExitStatus::Success, "");
        mock.respond_once("dotnet", ExitStatus::Success, "");
        mock.respond_once("dotnet", ExitStatus::Error(5), "");

        let mut binder = test_binder();
        binder.cli(options::API_KEY, Some("secret".to_string()));
        let engine = ExecutionEngine::new(subprocess, binder, PathBuf::from("."));

        let report = engine.run(&registry, &plan).await;
        assert_eq!(report.exit_code, 5);
        assert_eq!(report.first_failure().unwrap().target, "pack");
        assert!(report
            .results
            .iter()
            .all(|r| r.target != "publish"));
    }
}
