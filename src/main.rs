//! Provisioner - main entry point

use anyhow::{Context, Result};
use provisioner::cli::{Cli, Commands};
use provisioner::{ExecutionResult, ProvisioningPlan, Settings, StepOutcome, process};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns Ok(false) when the plan ran but a step failed
fn run(cli: Cli) -> Result<bool> {
    match &cli.command {
        Commands::Validate { plan } => {
            let plan = load_plan(plan)?;
            println!("✓ Plan is valid ({} steps)", plan.len());
            Ok(true)
        }
        Commands::Show { plan } => {
            let plan = load_plan(plan)?;
            println!("{}", plan.summary());
            Ok(true)
        }
        Commands::Apply { plan, dry_run } => {
            let plan = load_plan(plan)?;
            if *dry_run {
                info!("Dry run, nothing will be applied");
                println!("{}", plan.summary());
                return Ok(true);
            }
            let settings = resolve_settings(&cli)?;
            apply(plan, &settings)
        }
    }
}

fn load_plan(path: &Path) -> Result<ProvisioningPlan> {
    info!("Loading plan from {}", path.display());
    let plan = ProvisioningPlan::load_from_file(path)
        .with_context(|| format!("Failed to load plan {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("Plan {} is invalid", path.display()))?;
    Ok(plan)
}

fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::default(),
    };
    settings.apply_env(|key| std::env::var(key).ok());
    if let Some(root) = &cli.root {
        settings.target_root = root.clone();
    }
    if let Some(env_file) = &cli.env_file {
        settings.env_file = Some(env_file.clone());
    }
    settings.validate().context("Invalid settings")?;
    debug!("Resolved settings: {:?}", settings);
    Ok(settings)
}

fn apply(plan: ProvisioningPlan, settings: &Settings) -> Result<bool> {
    // Children are still torn down by their parent-death signal if this fails
    if let Err(e) = process::install_signal_handlers() {
        warn!("Failed to install signal handlers: {}", e);
    }

    let mut provisioner = settings.host_provisioner()?;
    let result = provisioner.apply(plan);
    report(&result);
    Ok(result.is_success())
}

fn report(result: &ExecutionResult) {
    for record in &result.records {
        match &record.outcome {
            StepOutcome::Success => {
                println!("✓ [{}/{}] {}", record.index + 1, result.total_steps, record.description);
            }
            StepOutcome::Failed(err) => {
                eprintln!("✗ [{}/{}] {}", record.index + 1, result.total_steps, record.description);
                eprintln!("  {}", err);
            }
        }
    }
    if result.is_success() {
        println!("\n✓ Provisioning completed successfully");
    } else {
        let skipped = result.total_steps - result.attempted();
        eprintln!("\n✗ Provisioning failed: {}", result);
        if skipped > 0 {
            eprintln!("  {} remaining step(s) not attempted", skipped);
        }
    }
}
