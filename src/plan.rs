//! Provisioning plans
//!
//! A `ProvisioningPlan` is an ordered list of declarative `Step`s. The order of
//! `steps` is the execution order; nothing else about the plan implies
//! sequencing.
//!
//! # Plan file format
//!
//! Plans are JSON documents with an internally tagged step list:
//!
//! ```json
//! {
//!   "name": "base",
//!   "steps": [
//!     { "type": "install_packages", "packages": ["make"] },
//!     { "type": "set_env", "key": "LANG", "value": "C.UTF-8" }
//!   ]
//! }
//! ```

use crate::error::{ProvisionError, Result};
use crate::types::StepKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Characters that are never valid in a package specifier
const FORBIDDEN_PACKAGE_CHARS: &[char] = &[';', '|', '&', '$', '`', '"', '\'', '(', ')', '<', '>'];

/// A single atomic provisioning action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Install OS packages through the system package manager
    InstallPackages { packages: Vec<String> },

    /// Set an environment variable in the target environment
    SetEnv { key: String, value: String },

    /// Download `url` and write it to `destination`
    FetchFile { url: String, destination: PathBuf },

    /// Run the language package manager against a manifest file
    RunPackageManager { manifest: PathBuf },

    /// Delete files, typically post-install cleanup
    DeleteFiles {
        paths: Vec<PathBuf>,
        /// Skip paths that do not exist instead of failing
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        ignore_missing: bool,
    },

    /// Replace every literal occurrence of `find` with `replace` in a file
    RewriteFile {
        path: PathBuf,
        find: String,
        replace: String,
    },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::InstallPackages { .. } => StepKind::InstallPackages,
            Self::SetEnv { .. } => StepKind::SetEnv,
            Self::FetchFile { .. } => StepKind::FetchFile,
            Self::RunPackageManager { .. } => StepKind::RunPackageManager,
            Self::DeleteFiles { .. } => StepKind::DeleteFiles,
            Self::RewriteFile { .. } => StepKind::RewriteFile,
        }
    }

    /// Check the step for internal consistency. Does no I/O.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::InstallPackages { packages } => {
                if packages.is_empty() {
                    return Err("package list is empty".into());
                }
                for pkg in packages {
                    validate_package_spec(pkg)?;
                }
            }
            Self::SetEnv { key, .. } => validate_env_key(key)?,
            Self::FetchFile { url, destination } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("unsupported URL scheme: {}", url));
                }
                require_absolute(destination)?;
            }
            Self::RunPackageManager { manifest } => require_absolute(manifest)?,
            Self::DeleteFiles { paths, .. } => {
                if paths.is_empty() {
                    return Err("no paths to delete".into());
                }
                for path in paths {
                    require_absolute(path)?;
                }
            }
            Self::RewriteFile { path, find, .. } => {
                require_absolute(path)?;
                if find.is_empty() {
                    return Err("rewrite pattern is empty".into());
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallPackages { packages } => {
                write!(f, "InstallPackages({})", packages.join(" "))
            }
            Self::SetEnv { key, value } => write!(f, "SetEnv({}={})", key, value),
            Self::FetchFile { url, destination } => {
                write!(f, "FetchFile({} -> {})", url, destination.display())
            }
            Self::RunPackageManager { manifest } => {
                write!(f, "RunPackageManager({})", manifest.display())
            }
            Self::DeleteFiles {
                paths,
                ignore_missing,
            } => {
                let list: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "DeleteFiles({}", list.join(" "))?;
                if *ignore_missing {
                    write!(f, ", ignore_missing")?;
                }
                write!(f, ")")
            }
            Self::RewriteFile {
                path,
                find,
                replace,
            } => write!(
                f,
                "RewriteFile({}: {:?} -> {:?})",
                path.display(),
                find,
                replace
            ),
        }
    }
}

fn validate_package_spec(pkg: &str) -> std::result::Result<(), String> {
    if pkg.is_empty() {
        return Err("empty package name".into());
    }
    if pkg.chars().any(char::is_whitespace) {
        return Err(format!("package name contains whitespace: {:?}", pkg));
    }
    if pkg.contains(FORBIDDEN_PACKAGE_CHARS) {
        return Err(format!("package name contains invalid characters: {:?}", pkg));
    }
    if pkg.starts_with('-') {
        return Err(format!("package name looks like an option: {:?}", pkg));
    }
    Ok(())
}

fn validate_env_key(key: &str) -> std::result::Result<(), String> {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(format!("invalid environment variable name: {:?}", key)),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid environment variable name: {:?}", key));
    }
    Ok(())
}

fn require_absolute(path: &Path) -> std::result::Result<(), String> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(format!("path must be absolute: {}", path.display()))
    }
}

/// An ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub steps: Vec<Step>,
}

impl ProvisioningPlan {
    /// Build an unnamed plan from steps, in execution order
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            name: String::new(),
            steps,
        }
    }

    pub fn named(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Load a plan from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    /// Save the plan to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(())
    }

    /// Validate every step, reporting the first problem with its 1-based
    /// step number.
    pub fn validate(&self) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|reason| {
                ProvisionError::invalid_plan(format!("step {} ({}): {}", i + 1, step.kind(), reason))
            })?;
        }
        Ok(())
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let title = if self.name.is_empty() {
            "Provisioning Plan".to_string()
        } else {
            format!("Provisioning Plan: {}", self.name)
        };
        let mut lines = vec![title, format!("  Steps ({}):", self.steps.len())];
        for (i, step) in self.steps.iter().enumerate() {
            let marker = if step.kind().needs_network() { " [net]" } else { "" };
            lines.push(format!("    {}. {}{}", i + 1, step, marker));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(pkgs: &[&str]) -> Step {
        Step::InstallPackages {
            packages: pkgs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_step_json_shape() {
        let step = Step::SetEnv {
            key: "LANG".into(),
            value: "C.UTF-8".into(),
        };
        let json = serde_json::to_string(&step).expect("serialize");
        assert_eq!(json, r#"{"type":"set_env","key":"LANG","value":"C.UTF-8"}"#);
    }

    #[test]
    fn test_delete_files_ignore_missing_defaults_false() {
        let step: Step =
            serde_json::from_str(r#"{"type":"delete_files","paths":["/a","/b"]}"#).expect("parse");
        assert_eq!(
            step,
            Step::DeleteFiles {
                paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
                ignore_missing: false,
            }
        );
    }

    #[test]
    fn test_plan_preserves_declared_order() {
        let json = r#"{"steps":[
            {"type":"set_env","key":"A","value":"1"},
            {"type":"install_packages","packages":["make"]},
            {"type":"set_env","key":"B","value":"2"}
        ]}"#;
        let plan: ProvisioningPlan = serde_json::from_str(json).expect("parse");
        let kinds: Vec<StepKind> = plan.steps.iter().map(Step::kind).collect();
        assert_eq!(
            kinds,
            vec![StepKind::SetEnv, StepKind::InstallPackages, StepKind::SetEnv]
        );
        assert!(plan.name.is_empty());
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let json = r#"{"steps":[{"type":"reboot"}]}"#;
        assert!(serde_json::from_str::<ProvisioningPlan>(json).is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed_plan() {
        let plan = ProvisioningPlan::new(vec![
            install(&["make", "libegl1", "python3-pip=23.0"]),
            Step::SetEnv {
                key: "_PRIVATE_1".into(),
                value: "".into(),
            },
            Step::FetchFile {
                url: "https://example.com/x.deb".into(),
                destination: "/tmp/x.deb".into(),
            },
            Step::RunPackageManager {
                manifest: "/tmp/requirements.txt".into(),
            },
        ]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_packages() {
        for bad in [vec![], vec!["two words"], vec!["ok", "rm;-rf"], vec!["--force"]] {
            let plan = ProvisioningPlan::new(vec![install(&bad)]);
            assert!(plan.validate().is_err(), "should reject {:?}", bad);
        }
    }

    #[test]
    fn test_validate_rejects_bad_env_key() {
        for key in ["", "1ABC", "A-B", "PATH=x"] {
            let plan = ProvisioningPlan::new(vec![Step::SetEnv {
                key: key.into(),
                value: "v".into(),
            }]);
            assert!(plan.validate().is_err(), "should reject {:?}", key);
        }
    }

    #[test]
    fn test_validate_names_step_number() {
        let plan = ProvisioningPlan::new(vec![
            install(&["make"]),
            Step::FetchFile {
                url: "ftp://example.com/x".into(),
                destination: "/tmp/x".into(),
            },
        ]);
        let err = plan.validate().expect_err("ftp is not supported");
        let msg = err.to_string();
        assert!(msg.contains("step 2"), "got: {}", msg);
        assert!(msg.contains("fetch_file"), "got: {}", msg);
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let plan = ProvisioningPlan::new(vec![Step::DeleteFiles {
            paths: vec!["usr/lib/libfoo.so".into()],
            ignore_missing: false,
        }]);
        assert!(plan.validate().is_err());

        let plan = ProvisioningPlan::new(vec![Step::RewriteFile {
            path: "/etc/apt/sources.list".into(),
            find: "".into(),
            replace: "x".into(),
        }]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_summary_lists_steps() {
        let plan = ProvisioningPlan::named(
            "demo",
            vec![
                install(&["make"]),
                Step::DeleteFiles {
                    paths: vec!["/a".into()],
                    ignore_missing: true,
                },
            ],
        );
        let summary = plan.summary();
        assert!(summary.starts_with("Provisioning Plan: demo"));
        assert!(summary.contains("1. InstallPackages(make) [net]"));
        assert!(summary.contains("2. DeleteFiles(/a, ignore_missing)"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.json");
        let plan = ProvisioningPlan::named("saved", vec![install(&["make"])]);
        plan.save_to_file(&path).expect("save");
        let loaded = ProvisioningPlan::load_from_file(&path).expect("load");
        assert_eq!(plan, loaded);
    }
}
