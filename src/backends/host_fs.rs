//! Host filesystem rooted at a target directory
//!
//! Plan paths are absolute paths inside the target. With the default root of
//! `/` they are used as-is; with `--root /mnt/image` a plan path like
//! `/etc/apt/sources.list` becomes `/mnt/image/etc/apt/sources.list`.

use crate::capabilities::FileSystem;
use crate::error::{ProvisionError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HostFileSystem {
    root: PathBuf,
}

impl HostFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for HostFileSystem {
    fn default() -> Self {
        Self::new("/")
    }
}

impl FileSystem for HostFileSystem {
    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling symlink still counts as present
        fs::symlink_metadata(self.resolve(path)).is_ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        fs::metadata(self.resolve(path))
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Join `path` under the root. `..` components are dropped rather than
    /// followed, so a plan cannot step outside the target root.
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in path.components() {
            if let Component::Normal(part) = component {
                resolved.push(part);
            }
        }
        resolved
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let host = self.resolve(path);
        fs::read(&host).map_err(|e| ProvisionError::from_io(path, e))
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        let host = self.resolve(path);
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::from_io(path, e))?;
        }
        fs::write(&host, contents).map_err(|e| ProvisionError::from_io(path, e))?;
        debug!("Wrote {} bytes to {}", contents.len(), host.display());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        let host = self.resolve(path);
        let meta = fs::symlink_metadata(&host).map_err(|e| ProvisionError::from_io(path, e))?;
        if meta.is_dir() {
            return Err(ProvisionError::permission_denied(path, "is a directory"));
        }
        fs::remove_file(&host).map_err(|e| ProvisionError::from_io(path, e))
    }
}
