//! Runtime settings for the provisioner binary.
//!
//! Resolution order, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. JSON settings file (`--config`)
//! 3. Environment variables (`PROVISIONER_ROOT`, `PROVISIONER_ENV_FILE`)
//! 4. Command-line flags

use crate::backends::{CommandPackageInstaller, FileEnvStore, HostFileSystem, HttpFetcher};
use crate::capabilities::EnvSnapshot;
use crate::error::{ProvisionError, Result};
use crate::provisioner::Provisioner;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `target_root`
pub const ENV_ROOT: &str = "PROVISIONER_ROOT";
/// Environment variable overriding `env_file`
pub const ENV_ENV_FILE: &str = "PROVISIONER_ENV_FILE";

/// Provisioner wired to the real host
pub type HostProvisioner =
    Provisioner<CommandPackageInstaller, HttpFetcher, HostFileSystem, FileEnvStore>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory plan paths are resolved under
    pub target_root: PathBuf,
    /// File receiving `SetEnv` results (host path); none keeps them in memory
    pub env_file: Option<PathBuf>,
    pub apt_program: PathBuf,
    pub pip_program: PathBuf,
    pub fetch_timeout_secs: u64,
    /// Run `apt-get update` before the first package install
    pub update_package_index: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_root: PathBuf::from("/"),
            env_file: None,
            apt_program: PathBuf::from("apt-get"),
            pip_program: PathBuf::from("pip"),
            fetch_timeout_secs: 60,
            update_package_index: true,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::config(format!(
                "Failed to read settings from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProvisionError::config(format!(
                "Failed to parse settings {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// Takes the lookup as a parameter so tests do not have to touch the
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.target_root = PathBuf::from(root);
        }
        if let Some(file) = lookup(ENV_ENV_FILE).filter(|v| !v.is_empty()) {
            self.env_file = Some(PathBuf::from(file));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_root.is_absolute() {
            return Err(ProvisionError::config(format!(
                "target_root must be absolute: {}",
                self.target_root.display()
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ProvisionError::config("fetch_timeout_secs must be > 0"));
        }
        if self.apt_program.as_os_str().is_empty() || self.pip_program.as_os_str().is_empty() {
            return Err(ProvisionError::config("package manager programs must be set"));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Build a provisioner acting on the real host. `${VAR}` references fall
    /// back to this process's environment.
    pub fn host_provisioner(&self) -> Result<HostProvisioner> {
        self.host_provisioner_with_base(process_env())
    }

    /// Build a host provisioner whose env store falls back to `base`
    pub fn host_provisioner_with_base(&self, base: EnvSnapshot) -> Result<HostProvisioner> {
        self.validate()?;
        let installer = CommandPackageInstaller::new(&self.apt_program, &self.pip_program)
            .update_index(self.update_package_index);
        let fetcher = HttpFetcher::new(self.fetch_timeout())?;
        let fs = HostFileSystem::new(&self.target_root);
        let env = match &self.env_file {
            Some(path) => FileEnvStore::open(path)?,
            None => FileEnvStore::ephemeral(),
        }
        .with_base(base);
        Ok(Provisioner::new(installer, fetcher, fs, env))
    }
}

/// The process environment, skipping entries that are not valid UTF-8
fn process_env() -> EnvSnapshot {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}
