//! In-memory capability implementations
//!
//! These back tests and embedders that want to evaluate a plan without
//! touching the host. Each one is `PartialEq` so that the end state of two
//! runs can be compared directly.

use crate::capabilities::{EnvSnapshot, EnvironmentStore, FileFetcher, FileSystem, PackageInstaller};
use crate::error::{ProvisionError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Package installer over a fixed catalogue.
///
/// An install request is all-or-nothing: if any name is missing from the
/// catalogue nothing is installed, matching `apt-get install`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPackageInstaller {
    pub available: BTreeSet<String>,
    pub installed: BTreeSet<String>,
    /// Manifests applied, with the environment they saw
    pub manifests: Vec<(PathBuf, EnvSnapshot)>,
}

impl MemoryPackageInstaller {
    pub fn with_available<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: packages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.installed.contains(package)
    }
}

/// Strip an apt version pin (`name=1.2`) from a package specifier
fn package_name(spec: &str) -> &str {
    spec.split('=').next().unwrap_or(spec)
}

impl PackageInstaller for MemoryPackageInstaller {
    fn install_packages(&mut self, packages: &[String], _env: &EnvSnapshot) -> Result<()> {
        if let Some(missing) = packages
            .iter()
            .map(|p| package_name(p))
            .find(|name| !self.available.contains(*name))
        {
            return Err(ProvisionError::PackageNotFound(missing.to_string()));
        }
        self.installed
            .extend(packages.iter().map(|p| package_name(p).to_string()));
        Ok(())
    }

    fn install_manifest(&mut self, manifest: &Path, env: &EnvSnapshot) -> Result<()> {
        self.manifests.push((manifest.to_path_buf(), env.clone()));
        Ok(())
    }
}

/// Fetcher answering from a fixed url -> body table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFetcher {
    pub responses: BTreeMap<String, Vec<u8>>,
    /// Every url requested, in order
    pub requests: Vec<String>,
}

impl MemoryFetcher {
    pub fn with_response(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.into(), body.into());
        self
    }
}

impl FileFetcher for MemoryFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        self.requests.push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| ProvisionError::network(url, "host unreachable"))
    }
}

/// Flat path -> contents filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFileSystem {
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    /// Paths that refuse writes and removal
    pub read_only: BTreeSet<PathBuf>,
}

impl MemoryFileSystem {
    /// Seed a file
    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn read_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.read_only.contains(path) {
            return Err(ProvisionError::permission_denied(path, "read-only file"));
        }
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ProvisionError::permission_denied(path, "no such file or directory"))
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        self.check_writable(path)?;
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ProvisionError::permission_denied(path, "no such file or directory"))
    }
}

/// Environment held in a sorted map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryEnvStore {
    vars: EnvSnapshot,
}

impl MemoryEnvStore {
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl EnvironmentStore for MemoryEnvStore {
    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.vars.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn vars(&self) -> EnvSnapshot {
        self.vars.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_all_or_nothing() {
        let mut installer = MemoryPackageInstaller::with_available(["make", "gcc"]);
        let env = EnvSnapshot::new();

        let err = installer
            .install_packages(&["make".into(), "nope".into()], &env)
            .expect_err("nope is unknown");
        assert!(matches!(err, ProvisionError::PackageNotFound(ref n) if n == "nope"));
        assert!(installer.installed.is_empty());

        installer
            .install_packages(&["make".into(), "gcc=4:9.3.0".into()], &env)
            .expect("both known");
        assert!(installer.is_installed("make"));
        assert!(installer.is_installed("gcc"));
    }

    #[test]
    fn test_fetcher_records_requests() {
        let mut fetcher = MemoryFetcher::default().with_response("http://a.example/x", "body");
        assert_eq!(fetcher.fetch("http://a.example/x").expect("known"), b"body");
        assert!(matches!(
            fetcher.fetch("http://b.example/y"),
            Err(ProvisionError::Network { .. })
        ));
        assert_eq!(fetcher.requests.len(), 2);
    }

    #[test]
    fn test_read_only_files_refuse_removal() {
        let mut fs = MemoryFileSystem::default().with_file("/etc/shadow", "x");
        fs.read_only.insert(PathBuf::from("/etc/shadow"));
        assert!(matches!(
            fs.remove(Path::new("/etc/shadow")),
            Err(ProvisionError::PermissionDenied { .. })
        ));
        assert!(fs.exists(Path::new("/etc/shadow")));
    }

    #[test]
    fn test_env_store_overwrites() {
        let mut env = MemoryEnvStore::from_vars([("LANG", "C")]);
        env.set("LANG", "C.UTF-8").expect("set");
        assert_eq!(env.get("LANG"), Some("C.UTF-8"));
        assert_eq!(env.vars().len(), 1);
    }
}
