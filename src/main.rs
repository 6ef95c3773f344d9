use clap::Parser;
use tracing::debug;

use capstan::engine::ExecutionEngine;
use capstan::error::exit_codes;
use capstan::params::ParameterBinder;
use capstan::pipeline::{self, options};
use capstan::resolver::compute_plan;
use capstan::subprocess::SubprocessManager;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build pipeline runner: plans the dependency closure of the requested
/// target and executes it in order
#[derive(Parser)]
#[command(name = "capstan")]
#[command(version = VERSION)]
#[command(about = "Declarative build target graph runner")]
struct Cli {
    /// Target to run (case-insensitive)
    #[arg(default_value = "compile")]
    target: String,

    /// Build configuration (default: Debug locally, Release under CI)
    #[arg(long)]
    configuration: Option<String>,

    /// API key for the package feed (required by publish)
    #[arg(long)]
    api_key: Option<String>,

    /// Package feed URL (required by publish)
    #[arg(long)]
    repository_url: Option<String>,

    /// Toolchain executable invoked by the pipeline targets
    #[arg(long)]
    toolchain: Option<String>,

    /// Project or solution passed to restore/build
    #[arg(long)]
    project: Option<String>,

    /// Directory holding library projects
    #[arg(long)]
    source_dir: Option<String>,

    /// Directory holding test projects
    #[arg(long)]
    tests_dir: Option<String>,

    /// Directory receiving build artifacts
    #[arg(long)]
    output_dir: Option<String>,

    /// Comma-separated project names packed into packages
    #[arg(long)]
    pack_projects: Option<String>,

    /// Opaque assembly version threaded to compile/pack
    #[arg(long)]
    assembly_version: Option<String>,

    /// Opaque file version threaded to compile/pack
    #[arg(long)]
    file_version: Option<String>,

    /// Opaque informational version threaded to compile/pack
    #[arg(long)]
    informational_version: Option<String>,

    /// List registered targets and exit
    #[arg(long)]
    list: bool,

    /// Print the computed plan without executing it
    #[arg(long)]
    plan: bool,

    /// Emit the run report as JSON instead of the summary table
    #[arg(long)]
    json: bool,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn bind_cli(cli: &Cli) -> ParameterBinder {
    let mut binder = pipeline::default_binder();
    binder.cli(options::CONFIGURATION, cli.configuration.clone());
    binder.cli(options::API_KEY, cli.api_key.clone());
    binder.cli(options::REPOSITORY_URL, cli.repository_url.clone());
    binder.cli(options::TOOLCHAIN, cli.toolchain.clone());
    binder.cli(options::PROJECT, cli.project.clone());
    binder.cli(options::SOURCE_DIR, cli.source_dir.clone());
    binder.cli(options::TESTS_DIR, cli.tests_dir.clone());
    binder.cli(options::OUTPUT_DIR, cli.output_dir.clone());
    binder.cli(options::PACK_PROJECTS, cli.pack_projects.clone());
    binder.cli(options::ASSEMBLY_VERSION, cli.assembly_version.clone());
    binder.cli(options::FILE_VERSION, cli.file_version.clone());
    binder.cli(
        options::INFORMATIONAL_VERSION,
        cli.informational_version.clone(),
    );
    binder
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let registry = match pipeline::registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };

    if cli.list {
        for target in registry.iter() {
            if target.depends_on().is_empty() {
                println!("{}", target.name());
            } else {
                println!("{} (depends on {})", target.name(), target.depends_on().join(", "));
            }
        }
        return exit_codes::SUCCESS;
    }

    let plan = match compute_plan(&registry, &cli.target) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };
    debug!("plan for '{}': {:?}", cli.target, plan.targets());

    if cli.plan {
        for name in plan.iter() {
            println!("{name}");
        }
        return exit_codes::SUCCESS;
    }

    let working_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: cannot determine working directory: {e}");
            return exit_codes::FAILURE;
        }
    };

    let engine = ExecutionEngine::new(SubprocessManager::production(), bind_cli(&cli), working_dir);

    let flag = engine.interrupt_flag();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, flag.clone()) {
            eprintln!("Warning: failed to register signal handler: {e}");
        }
    }

    let report = engine.run(&registry, &plan).await;

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: failed to serialize report: {e}"),
        }
    } else {
        print!("{}", report.render_summary());
        if let Some(failure) = report.first_failure() {
            if let Some(error) = &failure.error {
                eprintln!("Error: {error}");
            }
            for record in &failure.commands {
                if record.exit_code != Some(0) {
                    if !record.stdout.is_empty() {
                        eprintln!("{}", record.stdout.trim_end());
                    }
                    if !record.stderr.is_empty() {
                        eprintln!("{}", record.stderr.trim_end());
                    }
                }
            }
        }
    }

    report.exit_code
}
