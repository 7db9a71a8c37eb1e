//! Orchestrator for running provisioning profiles.
//!
//! The orchestrator validates every step of every profile before touching
//! the host, then runs the profiles strictly in order:
//!
//! 1. Each step is handed to the [`StepExecutor`], which consults the oracle
//!    and applies the step only when needed.
//! 2. Each outcome is logged as `already satisfied`, `applied` or `failed`
//!    together with the profile name and step index.
//! 3. A failed `Required` step aborts the run; later steps and profiles are
//!    never attempted. A failed `BestEffort` step is logged and skipped.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::apply::{StepExecutor, StepOutcome, StepResult};
use crate::config::NetworkSettings;
use crate::error::ProvisionError;
use crate::host::Host;
use crate::profile::ProvisioningProfile;
use crate::step::Requirement;

/// Results of one profile's steps, in order.
#[derive(Debug)]
pub struct ProfileReport {
    pub name: String,
    pub results: Vec<StepResult>,
}

/// Results of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub profiles: Vec<ProfileReport>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.profiles
            .iter()
            .flat_map(|p| &p.results)
            .filter(|r| pred(&r.outcome))
            .count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn already_satisfied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::AlreadySatisfied))
    }

    /// Failures that did not abort the run (best-effort steps).
    pub fn failed(&self) -> usize {
        self.count(StepOutcome::is_failed)
    }
}

/// Per-step result of a read-only check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub profile: String,
    pub step: String,
    pub requirement: Requirement,
    pub satisfied: bool,
}

/// Runs profiles in order against a host.
///
/// Borrows the profiles built at startup; the orchestrator never mutates
/// them.
pub struct Orchestrator<'a> {
    profiles: &'a [ProvisioningProfile],
}

impl<'a> Orchestrator<'a> {
    pub fn new(profiles: &'a [ProvisioningProfile]) -> Self {
        Self { profiles }
    }

    /// Returns true if there are no steps to run.
    pub fn is_empty(&self) -> bool {
        self.profiles.iter().all(|p| p.steps.is_empty())
    }

    /// Returns the total number of steps across all profiles.
    pub fn total_steps(&self) -> usize {
        self.profiles.iter().map(|p| p.steps.len()).sum()
    }

    /// Validates every step, prefixing errors with the profile and step index.
    ///
    /// `Validation` and `Io` errors keep their variant so the exit code is
    /// unchanged; anything else is wrapped in `Validation`.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        for profile in self.profiles {
            for (index, entry) in profile.steps.iter().enumerate() {
                let location = format!("{} step {}", profile.name, index + 1);
                entry.step.validate().map_err(|e| match e {
                    ProvisionError::Validation(msg) => {
                        ProvisionError::Validation(format!("{} validation failed: {}", location, msg))
                    }
                    ProvisionError::Io {
                        context,
                        message,
                        source,
                    } => ProvisionError::Io {
                        context: format!("{} validation failed: {}", location, context),
                        message,
                        source,
                    },
                    other => {
                        ProvisionError::Validation(format!("{} validation failed: {}", location, other))
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Validates, then applies every profile in order.
    ///
    /// Returns the report of all steps on success. The first failed
    /// `Required` step is returned as an error carrying the profile name,
    /// step index and step description as context; the typed
    /// [`ProvisionError`] stays recoverable from the chain.
    pub fn run(&self, host: &Host, network: &NetworkSettings) -> Result<RunReport> {
        self.validate()?;

        let mut report = RunReport::default();
        if self.is_empty() {
            return Ok(report);
        }

        info!("starting run with {} step(s) in {} profile(s)", self.total_steps(), self.profiles.len());
        let mut executor = StepExecutor::new(host, network);
        for profile in self.profiles {
            report.profiles.push(self.run_profile(profile, &mut executor)?);
        }
        info!(
            applied = report.applied(),
            already_satisfied = report.already_satisfied(),
            failed = report.failed(),
            "run completed successfully"
        );
        Ok(report)
    }

    fn run_profile(
        &self,
        profile: &ProvisioningProfile,
        executor: &mut StepExecutor<'_>,
    ) -> Result<ProfileReport> {
        if profile.steps.is_empty() {
            debug!("skipping empty profile {}", profile.name);
            return Ok(ProfileReport {
                name: profile.name.clone(),
                results: Vec::new(),
            });
        }

        info!("running profile {} ({} step(s))", profile.name, profile.steps.len());
        let total = profile.steps.len();
        let mut results = Vec::with_capacity(total);

        for (index, entry) in profile.steps.iter().enumerate() {
            let result = executor.apply(&entry.step);
            let position = index + 1;
            match (&result.outcome, entry.requirement) {
                (StepOutcome::Failed(e), Requirement::BestEffort) => warn!(
                    profile = %profile.name,
                    "[{}] {}/{} {}: failed (best effort, continuing): {}",
                    profile.name, position, total, result.step, e
                ),
                (outcome, _) => info!(
                    profile = %profile.name,
                    "[{}] {}/{} {}: {}",
                    profile.name, position, total, result.step, outcome.label()
                ),
            }

            if entry.requirement == Requirement::Required {
                let StepResult { step, outcome } = result;
                match outcome {
                    StepOutcome::Failed(e) => {
                        return Err(anyhow::Error::new(e)).with_context(|| {
                            format!(
                                "profile {} step {}/{} ({}) failed",
                                profile.name, position, total, step
                            )
                        });
                    }
                    outcome => results.push(StepResult { step, outcome }),
                }
            } else {
                results.push(result);
            }
        }

        Ok(ProfileReport {
            name: profile.name.clone(),
            results,
        })
    }

    /// Evaluates every step with the oracle only; nothing is changed.
    pub fn check(&self, host: &Host, network: &NetworkSettings) -> Result<Vec<CheckResult>> {
        self.validate()?;

        let executor = StepExecutor::new(host, network);
        let mut results = Vec::with_capacity(self.total_steps());
        for profile in self.profiles {
            let total = profile.steps.len();
            for (index, entry) in profile.steps.iter().enumerate() {
                let satisfied = executor.check(&entry.step);
                let status = if satisfied { "satisfied" } else { "not satisfied" };
                if satisfied || entry.requirement == Requirement::BestEffort {
                    info!("[{}] {}/{} {}: {}", profile.name, index + 1, total, entry.step, status);
                } else {
                    warn!("[{}] {}/{} {}: {}", profile.name, index + 1, total, entry.step, status);
                }
                results.push(CheckResult {
                    profile: profile.name.clone(),
                    step: entry.step.to_string(),
                    requirement: entry.requirement,
                    satisfied,
                });
            }
        }
        Ok(results)
    }
}
