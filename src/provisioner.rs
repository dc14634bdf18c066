//! The provisioning executor
//!
//! `Provisioner::apply` walks a plan with a single cursor: run the step at the
//! cursor, advance on success, stop on failure. There is no retry and no
//! rollback. Whatever earlier steps changed stays changed, the same way a
//! container build leaves its previous layers in place when a later command
//! exits non-zero.
//!
//! # Step Flow
//!
//! ```text
//! step 1 ──ok──▶ step 2 ──ok──▶ ... ──ok──▶ step n ──ok──▶ Success
//!   │              │                          │
//!   └─err──────────┴─err──────────────────────┴─err──▶ Failed (halt)
//! ```

use crate::capabilities::{EnvironmentStore, FileFetcher, FileSystem, PackageInstaller};
use crate::error::{ProvisionError, Result};
use crate::plan::{ProvisioningPlan, Step};
use crate::types::StepKind;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Outcome of one attempted step
#[derive(Debug)]
pub enum StepOutcome {
    Success,
    Failed(ProvisionError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Record of one attempted step
#[derive(Debug)]
pub struct StepRecord {
    /// 0-based position in the plan
    pub index: usize,
    pub kind: StepKind,
    /// Display form of the step
    pub description: String,
    pub outcome: StepOutcome,
}

/// Result of a provisioning run.
///
/// Holds a record for every step that was attempted, in order. Steps after a
/// failure were never attempted and have no record.
#[derive(Debug)]
pub struct ExecutionResult {
    pub plan_name: String,
    pub total_steps: usize,
    pub records: Vec<StepRecord>,
}

impl ExecutionResult {
    /// True if every step in the plan ran and succeeded
    pub fn is_success(&self) -> bool {
        self.records.len() == self.total_steps && self.records.iter().all(|r| r.outcome.is_success())
    }

    /// The failing step, if any
    pub fn failure(&self) -> Option<(&StepRecord, &ProvisionError)> {
        self.records.iter().find_map(|record| match &record.outcome {
            StepOutcome::Failed(err) => Some((record, err)),
            StepOutcome::Success => None,
        })
    }

    /// Number of steps that were attempted
    pub fn attempted(&self) -> usize {
        self.records.len()
    }

    /// Collapse into a plain `Result`, keeping the failing step's error
    pub fn into_result(self) -> Result<()> {
        for record in self.records {
            if let StepOutcome::Failed(err) = record.outcome {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure() {
            None => write!(f, "{} of {} steps succeeded", self.attempted(), self.total_steps),
            Some((record, err)) => write!(
                f,
                "step {} of {} failed ({}): {}",
                record.index + 1,
                self.total_steps,
                record.kind,
                err
            ),
        }
    }
}

/// Applies plans against a target environment through its capabilities.
///
/// The provisioner owns its capabilities for the duration of a run; use the
/// accessors or `into_parts` to inspect them afterwards.
pub struct Provisioner<P, F, S, E> {
    installer: P,
    fetcher: F,
    fs: S,
    env: E,
}

impl<P, F, S, E> Provisioner<P, F, S, E>
where
    P: PackageInstaller,
    F: FileFetcher,
    S: FileSystem,
    E: EnvironmentStore,
{
    pub fn new(installer: P, fetcher: F, fs: S, env: E) -> Self {
        Self {
            installer,
            fetcher,
            fs,
            env,
        }
    }

    pub fn installer(&self) -> &P {
        &self.installer
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn filesystem(&self) -> &S {
        &self.fs
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn into_parts(self) -> (P, F, S, E) {
        (self.installer, self.fetcher, self.fs, self.env)
    }

    /// Apply every step of `plan` in order, halting at the first failure.
    pub fn apply(&mut self, plan: ProvisioningPlan) -> ExecutionResult {
        let total_steps = plan.steps.len();
        info!(
            plan = %plan.name,
            steps = total_steps,
            "Applying provisioning plan"
        );

        let mut records = Vec::with_capacity(total_steps);
        for (index, step) in plan.steps.into_iter().enumerate() {
            let kind = step.kind();
            let description = step.to_string();
            info!("[{}/{}] {}: {}", index + 1, total_steps, kind.label(), description);

            let outcome = match self.run_step(step) {
                Ok(()) => StepOutcome::Success,
                Err(err) => {
                    error!("Step {} ({}) failed: {}", index + 1, kind, err);
                    StepOutcome::Failed(err)
                }
            };
            let halted = !outcome.is_success();
            records.push(StepRecord {
                index,
                kind,
                description,
                outcome,
            });
            if halted {
                break;
            }
        }

        let result = ExecutionResult {
            plan_name: plan.name,
            total_steps,
            records,
        };
        if result.is_success() {
            info!("Provisioning complete: {}", result);
        }
        result
    }

    fn run_step(&mut self, step: Step) -> Result<()> {
        match step {
            Step::InstallPackages { packages } => {
                let env = self.env.vars();
                self.installer.install_packages(&packages, &env)
            }
            Step::SetEnv { key, value } => {
                let mut expanded = expand_env(&value, &self.env);
                if is_path_list(&key) {
                    expanded = tidy_path_list(&expanded);
                }
                if expanded != value {
                    debug!("Expanded {}={:?} to {:?}", key, value, expanded);
                }
                self.env.set(&key, &expanded)
            }
            Step::FetchFile { url, destination } => {
                let body = self.fetcher.fetch(&url)?;
                debug!("Fetched {} bytes from {}", body.len(), url);
                self.fs.write(&destination, &body)
            }
            Step::RunPackageManager { manifest } => {
                if !self.fs.is_file(&manifest) {
                    return Err(ProvisionError::ManifestMissing(manifest));
                }
                let host_path = self.fs.resolve(&manifest);
                let env = self.env.vars();
                self.installer.install_manifest(&host_path, &env)
            }
            Step::DeleteFiles {
                paths,
                ignore_missing,
            } => {
                for path in &paths {
                    if ignore_missing && !self.fs.exists(path) {
                        debug!("Skipping missing {}", path.display());
                        continue;
                    }
                    self.fs.remove(path)?;
                    debug!("Deleted {}", path.display());
                }
                Ok(())
            }
            Step::RewriteFile {
                path,
                find,
                replace,
            } => {
                let bytes = self.fs.read(&path)?;
                let content = String::from_utf8(bytes).map_err(|_| {
                    ProvisionError::invalid_plan(format!(
                        "{} is not valid UTF-8 text",
                        path.display()
                    ))
                })?;
                let count = content.matches(find.as_str()).count();
                if count == 0 {
                    warn!("Pattern {:?} not found in {}", find, path.display());
                    return Ok(());
                }
                let rewritten = content.replace(find.as_str(), &replace);
                self.fs.write(&path, rewritten.as_bytes())?;
                debug!("Replaced {} occurrence(s) in {}", count, path.display());
                Ok(())
            }
        }
    }
}

/// Colon-separated search path variables (`PATH`, `LD_LIBRARY_PATH`, ...)
fn is_path_list(key: &str) -> bool {
    key.ends_with("PATH")
}

/// Drop empty entries from a colon-separated path list. An empty entry means
/// the current directory to the loader and the shell.
pub fn tidy_path_list(value: &str) -> String {
    value
        .split(':')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

/// Expand `$NAME` and `${NAME}` references against `env`.
///
/// Unset variables expand to the empty string. `\$` produces a literal `$`.
/// A `$` not followed by a name is kept as is.
pub fn expand_env<E: EnvironmentStore + ?Sized>(value: &str, env: &E) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'$') => {
                chars.next();
                out.push('$');
            }
            '$' => match chars.peek().copied() {
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for nc in chars.by_ref() {
                        if nc == '}' {
                            closed = true;
                            break;
                        }
                        name.push(nc);
                    }
                    if closed {
                        out.push_str(env.get(&name).unwrap_or(""));
                    } else {
                        // Unterminated reference, keep it literally
                        out.push_str("${");
                        out.push_str(&name);
                    }
                }
                Some(nc) if nc.is_ascii_alphabetic() || nc == '_' => {
                    let mut name = String::new();
                    while let Some(&nc) = chars.peek() {
                        if nc.is_ascii_alphanumeric() || nc == '_' {
                            name.push(nc);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(env.get(&name).unwrap_or(""));
                }
                _ => out.push('$'),
            },
            other => out.push(other),
        }
    }
    out
}
