//! Step executor.
//!
//! Applies one [`ProvisioningStep`] at a time. Each step moves through
//! `Pending -> Satisfied` when the oracle reports the desired state is
//! already present, or `Pending -> Applying -> {Applied, Failed}` otherwise.
//! There are no retries at this layer; network retries live in the curl and
//! apt invocations themselves.

use std::fmt;

use tracing::{debug, info};

use crate::config::NetworkSettings;
use crate::error::ProvisionError;
use crate::executor::CommandSpec;
use crate::host::Host;
use crate::oracle::Oracle;
use crate::repository::{Change, RepositoryConfigurator};
use crate::step::{ArtifactCheck, ProvisioningStep, version_matches};

/// Files under this directory are APT configuration.
const APT_CONFIG_DIR: &str = "/etc/apt";

/// Outcome of applying a single step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The host already satisfied the step; nothing was done.
    AlreadySatisfied,
    /// The step was applied (or would have been, in dry-run mode).
    Applied,
    /// Applying the step failed.
    Failed(ProvisionError),
}

impl StepOutcome {
    /// Label used in logs; the three-way distinction is the observable contract.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadySatisfied => "already satisfied",
            Self::Applied => "applied",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "failed: {}", e),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of applying a step: which step and what happened.
#[derive(Debug)]
pub struct StepResult {
    pub step: String,
    pub outcome: StepOutcome,
}

/// Applies steps to a host, tracking APT index freshness across steps.
pub struct StepExecutor<'a> {
    host: &'a Host,
    network: &'a NetworkSettings,
    index_fresh: bool,
}

impl<'a> StepExecutor<'a> {
    pub fn new(host: &'a Host, network: &'a NetworkSettings) -> Self {
        Self {
            host,
            network,
            index_fresh: false,
        }
    }

    /// Applies `step` if the host does not already satisfy it.
    pub fn apply(&mut self, step: &ProvisioningStep) -> StepResult {
        let outcome = if Oracle::new(self.host).is_satisfied(step) {
            StepOutcome::AlreadySatisfied
        } else {
            debug!(kind = step.kind(), step = %step, "applying");
            match self.apply_unsatisfied(step) {
                Ok(()) => StepOutcome::Applied,
                Err(e) => StepOutcome::Failed(e),
            }
        };
        StepResult {
            step: step.to_string(),
            outcome,
        }
    }

    /// Reports whether `step` is satisfied without applying anything.
    pub fn check(&self, step: &ProvisioningStep) -> bool {
        Oracle::new(self.host).is_satisfied(step)
    }

    fn apply_unsatisfied(&mut self, step: &ProvisioningStep) -> Result<(), ProvisionError> {
        match step {
            ProvisioningStep::PackageInstalled {
                name,
                version,
                verify,
            } => {
                self.install_package(name, version.as_deref())?;
                if self.host.dry_run() {
                    return Ok(());
                }
                self.verify_package(name, version.as_deref(), verify.as_ref())
            }
            ProvisioningStep::FileContentEquals {
                path,
                content,
                mode,
            } => {
                let configurator = self.configurator();
                if path.starts_with(APT_CONFIG_DIR) {
                    configurator.ensure_apt_file(path, content.as_bytes(), *mode)?;
                } else {
                    configurator.ensure_file(path, content.as_bytes(), *mode)?;
                }
                Ok(())
            }
            ProvisioningStep::RepositoryRegistered {
                list_path,
                entry,
                keyring,
            } => {
                let configurator = self.configurator();
                let key_change = configurator.ensure_keyring(keyring)?;
                let list_change = configurator.ensure_source_entry(list_path, &with_newline(entry))?;
                if key_change == Change::Changed || list_change == Change::Changed {
                    self.index_fresh = false;
                }
                Ok(())
            }
            ProvisioningStep::AlternativeSelected { name, path } => self.run(&CommandSpec::new(
                "update-alternatives",
                ["--set", name.as_str(), path.as_str()],
            )),
            ProvisioningStep::ServiceEnabled { unit } => {
                self.run(&CommandSpec::new("systemctl", ["enable", "--now", unit.as_str()]))
            }
            ProvisioningStep::RuntimeRegistered {
                runtime,
                engine,
                config_path,
            } => {
                info!(%runtime, %engine, "registering container runtime");
                self.run(&CommandSpec::new(
                    "nvidia-ctk",
                    [
                        "runtime".to_string(),
                        "configure".to_string(),
                        format!("--runtime={}", engine),
                        format!("--config={}", self.host.resolve(config_path)),
                    ],
                ))?;
                self.run(&CommandSpec::new("systemctl", ["restart", engine.as_str()]))
            }
            ProvisioningStep::UserInGroup { user, group } => {
                self.run(&CommandSpec::new("usermod", ["-aG", group.as_str(), user.as_str()]))
            }
        }
    }

    fn configurator(&self) -> RepositoryConfigurator<'a> {
        RepositoryConfigurator::new(self.host, self.network)
    }

    /// Runs a mutating command; any failure becomes an `Execution` error.
    fn run(&self, spec: &CommandSpec) -> Result<(), ProvisionError> {
        match self.host.run(spec) {
            Ok(result) => result.check(spec).map(|_| ()),
            Err(e) => Err(ProvisionError::Execution {
                command: spec.display(),
                status: format!("{:#}", e),
            }),
        }
    }

    /// Runs an apt-get command; any failure becomes a `PackageInstall` error.
    fn run_apt(&self, spec: &CommandSpec, package: &str) -> Result<(), ProvisionError> {
        self.run(spec).map_err(|e| ProvisionError::PackageInstall {
            package: package.to_string(),
            reason: match e {
                ProvisionError::Execution { status, .. } => format!("{}: {}", spec.command, status),
                other => other.to_string(),
            },
        })
    }

    fn apt_get<'s>(&self, args: impl IntoIterator<Item = &'s str>) -> CommandSpec {
        // apt backs off exponentially by default; cap it at the fixed delay.
        let mut all = vec![
            "-o".to_string(),
            format!("Acquire::Retries={}", self.network.retries),
            "-o".to_string(),
            format!("Acquire::Retries::Delay::Maximum={}", self.network.retry_delay_secs),
        ];
        all.extend(args.into_iter().map(str::to_string));
        CommandSpec::new("apt-get", all).with_env("DEBIAN_FRONTEND", "noninteractive")
    }

    fn refresh_index(&mut self, package: &str) -> Result<(), ProvisionError> {
        if self.index_fresh {
            return Ok(());
        }
        info!("refreshing package index");
        self.run_apt(&self.apt_get(["update"]), package)?;
        self.index_fresh = true;
        Ok(())
    }

    fn install_package(&mut self, name: &str, version: Option<&str>) -> Result<(), ProvisionError> {
        self.refresh_index(name)?;
        // A full Debian version contains a revision ("-"); anything shorter is
        // a prefix that apt cannot pin, so install by name and verify after.
        let target = match version {
            Some(v) if v.contains('-') => format!("{}={}", name, v),
            _ => name.to_string(),
        };
        info!(package = %name, "installing");
        let spec = self.apt_get(["install", "-y", "--no-install-recommends", target.as_str()]);
        self.run_apt(&spec, name)
    }

    /// Re-queries the package database and artifact after installation.
    fn verify_package(
        &self,
        name: &str,
        version: Option<&str>,
        verify: Option<&ArtifactCheck>,
    ) -> Result<(), ProvisionError> {
        let oracle = Oracle::new(self.host);
        let installed = oracle
            .installed_version(name)
            .map_err(|e| ProvisionError::PostconditionNotMet {
                subject: format!("package {}", name),
                expected: "installed".to_string(),
                actual: format!("query failed: {:#}", e),
            })?
            .ok_or_else(|| ProvisionError::PostconditionNotMet {
                subject: format!("package {}", name),
                expected: version.unwrap_or("installed").to_string(),
                actual: "not installed".to_string(),
            })?;

        if let Some(requested) = version
            && !version_matches(requested, &installed)
        {
            return Err(ProvisionError::PostconditionNotMet {
                subject: format!("package {}", name),
                expected: requested.to_string(),
                actual: installed,
            });
        }

        if let Some(check) = verify {
            let reported = oracle
                .artifact_version(check)
                .map_err(|e| ProvisionError::PostconditionNotMet {
                    subject: check.command.join(" "),
                    expected: check.expected.clone(),
                    actual: format!("query failed: {:#}", e),
                })?;
            match reported {
                Some(v) if version_matches(&check.expected, &v) => {}
                Some(v) => {
                    return Err(ProvisionError::PostconditionNotMet {
                        subject: check.command.join(" "),
                        expected: check.expected.clone(),
                        actual: v,
                    });
                }
                None => {
                    return Err(ProvisionError::PostconditionNotMet {
                        subject: check.command.join(" "),
                        expected: check.expected.clone(),
                        actual: "no version reported".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn with_newline(entry: &str) -> String {
    if entry.ends_with('\n') {
        entry.to_string()
    } else {
        format!("{}\n", entry)
    }
}
