//! Provisioner Library
//!
//! Declarative, fail-fast provisioning of a target environment: an ordered
//! plan of steps (install packages, set environment variables, fetch files,
//! run a package manager, delete or rewrite files) applied one at a time
//! through swappable capabilities.

pub mod backends;
pub mod capabilities;
pub mod cli;
pub mod error;
pub mod plan;
pub mod process;
pub mod provisioner;
pub mod settings;
pub mod types;

// Re-export main types for convenience
pub use capabilities::{EnvSnapshot, EnvironmentStore, FileFetcher, FileSystem, PackageInstaller};
pub use error::{ProvisionError, Result};
pub use plan::{ProvisioningPlan, Step};
pub use provisioner::{ExecutionResult, Provisioner, StepOutcome, StepRecord, expand_env};
pub use settings::{HostProvisioner, Settings};
pub use types::StepKind;
