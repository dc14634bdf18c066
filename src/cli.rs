use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Provisioner - apply declarative provisioning plans
#[derive(Parser, Debug)]
#[command(name = "provisioner")]
#[command(about = "Apply ordered, fail-fast provisioning plans to a container or host")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Target root directory plan paths are resolved under
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Env file receiving variables set by the plan
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and apply a plan
    Apply {
        /// Path to the plan file
        plan: PathBuf,

        /// Print the steps that would run without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a plan without applying it
    Validate {
        /// Path to the plan file
        plan: PathBuf,
    },
    /// Print a numbered summary of a plan
    Show {
        /// Path to the plan file
        plan: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
