//! Error handling for the provisioner
//!
//! Every step failure is one of these variants. The first four make up the
//! provisioning taxonomy proper; the rest cover plan loading and plumbing.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A remote resource could not be fetched
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The package manager does not know a requested package
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// A filesystem target is missing or not writable
    #[error("Permission denied: {}: {reason}", .path.display())]
    PermissionDenied { path: PathBuf, reason: String },

    /// The manifest handed to the package manager does not exist
    #[error("Package manifest missing: {}", .0.display())]
    ManifestMissing(PathBuf),

    /// An external command exited non-zero for a reason we could not classify
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The plan itself is malformed
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Settings errors (loading, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors not attributable to a specific target path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a network error
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a permission error for a path
    pub fn permission_denied(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure
    pub fn command(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }

    /// Create a plan validation error
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map an io error on `path` into the provisioning taxonomy.
    ///
    /// Missing and unwritable targets both become `PermissionDenied`;
    /// anything else stays an `Io` error.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::permission_denied(path, "no such file or directory"),
            ErrorKind::PermissionDenied => Self::permission_denied(path, err.to_string()),
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::PackageNotFound("libfoo".into());
        assert_eq!(err.to_string(), "Package not found: libfoo");

        let err = ProvisionError::ManifestMissing(PathBuf::from("/tmp/requirements.txt"));
        assert_eq!(
            err.to_string(),
            "Package manifest missing: /tmp/requirements.txt"
        );

        let err = ProvisionError::network("http://x.example/a", "timed out");
        assert_eq!(err.to_string(), "Network error fetching http://x.example/a: timed out");
    }

    #[test]
    fn test_from_io_maps_not_found_to_permission_denied() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ProvisionError::from_io("/nonexistent/path", io_err);
        match err {
            ProvisionError::PermissionDenied { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/path"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_io_keeps_other_kinds() {
        let io_err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad");
        let err = ProvisionError::from_io("/etc/x", io_err);
        assert!(matches!(err, ProvisionError::Io(_)));
    }
}
