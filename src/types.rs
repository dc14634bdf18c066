//! Small shared types
//!
//! `StepKind` is the fieldless face of `plan::Step`, used wherever a step
//! needs to be named without carrying its payload (logs, reports, filters).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The kind of a provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    InstallPackages,
    SetEnv,
    FetchFile,
    RunPackageManager,
    DeleteFiles,
    RewriteFile,
}

impl StepKind {
    /// Short human label for progress output
    pub const fn label(self) -> &'static str {
        match self {
            Self::InstallPackages => "Installing packages",
            Self::SetEnv => "Setting environment",
            Self::FetchFile => "Fetching file",
            Self::RunPackageManager => "Running package manager",
            Self::DeleteFiles => "Deleting files",
            Self::RewriteFile => "Rewriting file",
        }
    }

    /// Returns true if this kind of step reaches outside the target
    /// filesystem (package repositories or the network)
    pub const fn needs_network(self) -> bool {
        matches!(
            self,
            Self::InstallPackages | Self::FetchFile | Self::RunPackageManager
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_step_kind_string_forms() {
        assert_eq!(StepKind::InstallPackages.to_string(), "install_packages");
        assert_eq!(StepKind::RunPackageManager.to_string(), "run_package_manager");
        assert_eq!("set_env".parse::<StepKind>().ok(), Some(StepKind::SetEnv));
        assert!("SetEnv".parse::<StepKind>().is_err());
    }

    #[test]
    fn test_step_kind_serde_matches_display() {
        for kind in StepKind::iter() {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_network_kinds() {
        assert!(StepKind::FetchFile.needs_network());
        assert!(!StepKind::DeleteFiles.needs_network());
        assert!(!StepKind::SetEnv.needs_network());
    }
}
