//! Package installation through apt-get and pip
//!
//! Both tools are driven non-interactively as child processes. Their stderr
//! is scanned for the "unknown package" messages each tool prints so that a
//! typo in a plan comes back as `PackageNotFound` instead of an opaque exit
//! code.

use crate::capabilities::{EnvSnapshot, PackageInstaller};
use crate::error::{ProvisionError, Result};
use crate::process::run_tracked;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Installer shelling out to the OS and Python package managers
#[derive(Debug, Clone)]
pub struct CommandPackageInstaller {
    apt_program: PathBuf,
    pip_program: PathBuf,
    update_index: bool,
    index_updated: bool,
}

impl CommandPackageInstaller {
    pub fn new(apt_program: impl Into<PathBuf>, pip_program: impl Into<PathBuf>) -> Self {
        Self {
            apt_program: apt_program.into(),
            pip_program: pip_program.into(),
            update_index: true,
            index_updated: false,
        }
    }

    /// Whether to run `apt-get update` before the first install of a run
    pub fn update_index(mut self, enabled: bool) -> Self {
        self.update_index = enabled;
        self
    }

    fn apt(&self, env: &EnvSnapshot) -> Command {
        let mut cmd = Command::new(&self.apt_program);
        cmd.envs(env)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn ensure_index(&mut self, env: &EnvSnapshot) -> Result<()> {
        if !self.update_index || self.index_updated {
            return Ok(());
        }
        info!("Updating package index");
        let mut cmd = self.apt(env);
        cmd.arg("update");
        run_checked(&mut cmd, &self.apt_program)?;
        self.index_updated = true;
        Ok(())
    }
}

impl Default for CommandPackageInstaller {
    fn default() -> Self {
        Self::new("apt-get", "pip")
    }
}

impl PackageInstaller for CommandPackageInstaller {
    fn install_packages(&mut self, packages: &[String], env: &EnvSnapshot) -> Result<()> {
        self.ensure_index(env)?;
        let mut cmd = self.apt(env);
        cmd.args(["install", "-y", "--no-install-recommends"])
            .args(packages);
        run_checked(&mut cmd, &self.apt_program)?;
        info!("Installed {} package(s)", packages.len());
        Ok(())
    }

    fn install_manifest(&mut self, manifest: &Path, env: &EnvSnapshot) -> Result<()> {
        let mut cmd = Command::new(&self.pip_program);
        cmd.args(["install", "--no-cache-dir", "-r"])
            .arg(manifest)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        run_checked(&mut cmd, &self.pip_program)?;
        info!("Installed requirements from {}", manifest.display());
        Ok(())
    }
}

/// Run a package manager command and classify its failure
fn run_checked(cmd: &mut Command, program: &Path) -> Result<()> {
    debug!("Running {:?}", cmd);
    let output = run_tracked(cmd).map_err(|e| {
        ProvisionError::command(format!("Failed to run {}: {}", program.display(), e))
    })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    // pip reports resolution errors on stdout in some versions
    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(name) = missing_package(&stderr).or_else(|| missing_package(&stdout)) {
        return Err(ProvisionError::PackageNotFound(name));
    }

    let code = output.status.code().unwrap_or(-1);
    warn!("{} exited with code {}", program.display(), code);
    Err(ProvisionError::command(format!(
        "{} failed (exit code {}): {}",
        program.display(),
        code,
        stderr.trim()
    )))
}

/// Extract the package name from apt/pip "not found" diagnostics
pub fn missing_package(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(rest) = line.split("Unable to locate package ").nth(1) {
            return Some(rest.trim().to_string());
        }
        if let Some(rest) = line.split("No matching distribution found for ").nth(1) {
            return Some(rest.trim().to_string());
        }
        if line.contains("has no installation candidate") {
            if let Some(name) = line.split('\'').nth(1) {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_package_apt() {
        let stderr = "Reading package lists...\nE: Unable to locate package libfoo-dev\n";
        assert_eq!(missing_package(stderr).as_deref(), Some("libfoo-dev"));

        let stderr = "E: Package 'python-minimal' has no installation candidate\n";
        assert_eq!(missing_package(stderr).as_deref(), Some("python-minimal"));
    }

    #[test]
    fn test_missing_package_pip() {
        let stderr = "ERROR: Could not find a version that satisfies the requirement torchh\n\
                      ERROR: No matching distribution found for torchh\n";
        assert_eq!(missing_package(stderr).as_deref(), Some("torchh"));
    }

    #[test]
    fn test_missing_package_none() {
        assert_eq!(missing_package("E: dpkg was interrupted\n"), None);
        assert_eq!(missing_package(""), None);
    }

    #[test]
    fn test_missing_program_is_command_failure() {
        let mut installer =
            CommandPackageInstaller::new("/nonexistent/apt-get", "/nonexistent/pip")
                .update_index(false);
        let err = installer
            .install_packages(&["make".into()], &EnvSnapshot::new())
            .expect_err("program does not exist");
        assert!(matches!(err, ProvisionError::CommandFailed(_)));
    }
}
