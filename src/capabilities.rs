//! Capability contracts between the provisioner and the outside world.
//!
//! The provisioner never talks to apt, the network, the disk or the process
//! environment directly. Each of those sits behind one of the traits below so
//! that a run can be pointed at the real host (`backends::*`) or at in-memory
//! doubles (`backends::memory`) without changing the executor.
//!
//! # Contract
//!
//! - Every method either fully applies its side effect and returns `Ok`, or
//!   returns the error describing why it could not. The provisioner stops at
//!   the first `Err`.
//! - Paths handed to `FileSystem` are absolute paths *inside* the target
//!   environment. Implementations decide how they map onto the host.
//! - Environment snapshots passed to installers are the full contents of the
//!   `EnvironmentStore` at the moment the step runs.

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Snapshot of environment variables, ordered by name.
pub type EnvSnapshot = BTreeMap<String, String>;

/// Installs packages into the target environment.
pub trait PackageInstaller {
    /// Install OS packages by name.
    ///
    /// Unknown names fail with `ProvisionError::PackageNotFound`.
    fn install_packages(&mut self, packages: &[String], env: &EnvSnapshot) -> Result<()>;

    /// Run the language package manager against a manifest.
    ///
    /// `manifest` is a host path (already resolved through `FileSystem`).
    fn install_manifest(&mut self, manifest: &Path, env: &EnvSnapshot) -> Result<()>;
}

/// Retrieves remote resources.
pub trait FileFetcher {
    /// Fetch the full body at `url`. Failures are `ProvisionError::Network`.
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>>;
}

/// Filesystem of the target environment.
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;

    /// True for a regular file, following symlinks.
    fn is_file(&self, path: &Path) -> bool;

    /// Map a target path to the host path an external tool should be given.
    fn resolve(&self, path: &Path) -> PathBuf;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a file, creating parent directories as needed.
    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Remove a single file. Missing or protected targets fail with
    /// `ProvisionError::PermissionDenied`.
    fn remove(&mut self, path: &Path) -> Result<()>;
}

/// Environment variables of the target environment.
pub trait EnvironmentStore {
    fn get(&self, key: &str) -> Option<&str>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Full copy of the current variables.
    fn vars(&self) -> EnvSnapshot;
}
