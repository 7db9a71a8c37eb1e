//! Provisioning steps: descriptions of desired end states.
//!
//! [`ProvisioningStep`] is a closed enum. Each variant describes *what* the
//! host should look like; the [`oracle`](crate::oracle) decides whether that
//! already holds and the [`apply`](crate::apply) module knows *how* to get
//! there. Adding a variant means adding a match arm in `Display`,
//! `validate`, the oracle and the step executor; the compiler enforces it.

use std::fmt;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use strum::Display;

use crate::error::ProvisionError;

/// How a downloaded signing key is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeyFormat {
    /// Stored as downloaded (ASCII-armored `.asc`).
    Armored,
    /// Converted to a binary keyring with `gpg --dearmor`.
    Dearmor,
}

/// Where a repository signing key comes from and where it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySource {
    pub url: String,
    pub path: Utf8PathBuf,
    pub format: KeyFormat,
}

/// A command whose output reports an installed artifact's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCheck {
    /// Command and arguments.
    pub command: Vec<String>,
    /// Regex whose first capture group extracts the version from stdout+stderr.
    pub pattern: String,
    /// Version the capture must match (see [`version_matches`]).
    pub expected: String,
}

impl ArtifactCheck {
    /// Extracts the reported version from command output.
    pub fn extract(&self, output: &str) -> Result<Option<String>, ProvisionError> {
        let re = Regex::new(&self.pattern).map_err(|e| {
            ProvisionError::Validation(format!("invalid version pattern '{}': {}", self.pattern, e))
        })?;
        Ok(re
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()))
    }
}

/// One desired end state of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningStep {
    /// A Debian package is installed, optionally at a version and with its
    /// artifact reporting an expected version.
    PackageInstalled {
        name: String,
        version: Option<String>,
        verify: Option<ArtifactCheck>,
    },
    /// A file has exactly this content and mode.
    FileContentEquals {
        path: Utf8PathBuf,
        content: String,
        mode: u32,
    },
    /// An APT repository is registered: keyring present, entry in list file.
    RepositoryRegistered {
        list_path: Utf8PathBuf,
        entry: String,
        keyring: KeySource,
    },
    /// `update-alternatives` selects `path` for `name`.
    AlternativeSelected { name: String, path: Utf8PathBuf },
    /// A systemd unit is enabled and running.
    ServiceEnabled { unit: String },
    /// A container runtime is registered in the engine's daemon config.
    RuntimeRegistered {
        runtime: String,
        engine: String,
        config_path: Utf8PathBuf,
    },
    /// A user is a supplementary member of a group.
    UserInGroup { user: String, group: String },
}

impl ProvisioningStep {
    /// Shorthand for an unversioned package.
    pub fn package(name: impl Into<String>) -> Self {
        Self::PackageInstalled {
            name: name.into(),
            version: None,
            verify: None,
        }
    }

    /// Shorthand for a file with content and mode.
    pub fn file(path: impl Into<Utf8PathBuf>, content: impl Into<String>, mode: u32) -> Self {
        Self::FileContentEquals {
            path: path.into(),
            content: content.into(),
            mode,
        }
    }

    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PackageInstalled { .. } => "package",
            Self::FileContentEquals { .. } => "file",
            Self::RepositoryRegistered { .. } => "repository",
            Self::AlternativeSelected { .. } => "alternative",
            Self::ServiceEnabled { .. } => "service",
            Self::RuntimeRegistered { .. } => "runtime",
            Self::UserInGroup { .. } => "group",
        }
    }

    /// Validates the step's static data.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        match self {
            Self::PackageInstalled {
                name,
                version,
                verify,
            } => {
                validate_package_name(name)?;
                if let Some(v) = version
                    && (v.is_empty() || v.contains(char::is_whitespace))
                {
                    return Err(ProvisionError::Validation(format!(
                        "package {} has an invalid version '{}'",
                        name, v
                    )));
                }
                if let Some(check) = verify {
                    if check.command.is_empty() {
                        return Err(ProvisionError::Validation(format!(
                            "package {} has an empty verification command",
                            name
                        )));
                    }
                    let re = Regex::new(&check.pattern).map_err(|e| {
                        ProvisionError::Validation(format!(
                            "package {} has an invalid version pattern: {}",
                            name, e
                        ))
                    })?;
                    if re.captures_len() < 2 {
                        return Err(ProvisionError::Validation(format!(
                            "package {} version pattern '{}' needs a capture group",
                            name, check.pattern
                        )));
                    }
                }
                Ok(())
            }
            Self::FileContentEquals { path, mode, .. } => {
                validate_host_path(path, "file")?;
                if *mode > 0o7777 {
                    return Err(ProvisionError::Validation(format!(
                        "file {} has an invalid mode {:o}",
                        path, mode
                    )));
                }
                Ok(())
            }
            Self::RepositoryRegistered {
                list_path,
                entry,
                keyring,
            } => {
                validate_host_path(list_path, "source list")?;
                validate_host_path(&keyring.path, "keyring")?;
                validate_https_url(&keyring.url, "signing key")?;
                if entry.trim().is_empty() {
                    return Err(ProvisionError::Validation(format!(
                        "source list {} has an empty entry",
                        list_path
                    )));
                }
                if !entry.lines().all(|l| l.starts_with("deb ") || l.starts_with("deb-src ")) {
                    return Err(ProvisionError::Validation(format!(
                        "source list {} entry must consist of deb/deb-src lines",
                        list_path
                    )));
                }
                Ok(())
            }
            Self::AlternativeSelected { name, path } => {
                validate_identifier(name, "alternative")?;
                validate_host_path(path, "alternative target")
            }
            Self::ServiceEnabled { unit } => validate_identifier(unit, "service unit"),
            Self::RuntimeRegistered {
                runtime,
                engine,
                config_path,
            } => {
                validate_identifier(runtime, "runtime")?;
                validate_identifier(engine, "container engine")?;
                validate_host_path(config_path, "daemon config")
            }
            Self::UserInGroup { user, group } => {
                validate_identifier(user, "user")?;
                validate_identifier(group, "group")
            }
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageInstalled {
                name,
                version: Some(v),
                ..
            } => write!(f, "package {} ({})", name, v),
            Self::PackageInstalled { name, .. } => write!(f, "package {}", name),
            Self::FileContentEquals { path, .. } => write!(f, "file {}", path),
            Self::RepositoryRegistered { list_path, .. } => write!(f, "repository {}", list_path),
            Self::AlternativeSelected { name, path } => write!(f, "alternative {} -> {}", name, path),
            Self::ServiceEnabled { unit } => write!(f, "service {}", unit),
            Self::RuntimeRegistered { runtime, engine, .. } => {
                write!(f, "runtime {} for {}", runtime, engine)
            }
            Self::UserInGroup { user, group } => write!(f, "user {} in group {}", user, group),
        }
    }
}

/// Whether a step failure aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Requirement {
    /// Failure aborts the run.
    #[default]
    Required,
    /// Failure is logged and the run continues.
    BestEffort,
}

/// A step within a profile together with its failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStep {
    pub step: ProvisioningStep,
    pub requirement: Requirement,
}

impl ProfileStep {
    pub fn required(step: ProvisioningStep) -> Self {
        Self {
            step,
            requirement: Requirement::Required,
        }
    }

    pub fn best_effort(step: ProvisioningStep) -> Self {
        Self {
            step,
            requirement: Requirement::BestEffort,
        }
    }
}

/// Returns true if `installed` satisfies the requested version.
///
/// Exact equality always matches. Otherwise `requested` must be a prefix of
/// `installed` followed by a version separator (`.`, `-`, `+`, `~`, `:`), so
/// `17` matches `17.0.9+9-1` but not `170`.
pub fn version_matches(requested: &str, installed: &str) -> bool {
    if requested == installed {
        return true;
    }
    installed
        .strip_prefix(requested)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| matches!(c, '.' | '-' | '+' | '~' | ':'))
}

/// Validates that a path contains no `..` components.
pub(crate) fn validate_no_parent_dirs(path: &Utf8Path, label: &str) -> Result<(), ProvisionError> {
    if path.components().any(|c| c == Utf8Component::ParentDir) {
        return Err(ProvisionError::Validation(format!(
            "{} path '{}' contains '..' components, \
            which is not allowed for security reasons",
            label, path
        )));
    }
    Ok(())
}

fn validate_host_path(path: &Utf8Path, label: &str) -> Result<(), ProvisionError> {
    if !path.is_absolute() {
        return Err(ProvisionError::Validation(format!(
            "{} path '{}' must be absolute",
            label, path
        )));
    }
    validate_no_parent_dirs(path, label)
}

fn validate_https_url(raw: &str, label: &str) -> Result<(), ProvisionError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ProvisionError::Validation(format!("{} URL '{}' is invalid: {}", label, raw, e)))?;
    if parsed.scheme() != "https" {
        return Err(ProvisionError::Validation(format!(
            "{} URL '{}' must use https",
            label, raw
        )));
    }
    Ok(())
}

fn validate_package_name(name: &str) -> Result<(), ProvisionError> {
    // Debian policy 5.6.1: lowercase alphanumerics and + - ., at least two
    // characters, starting with an alphanumeric.
    let valid = name.len() >= 2
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(ProvisionError::Validation(format!("invalid package name '{}'", name)));
    }
    Ok(())
}

fn validate_identifier(value: &str, label: &str) -> Result<(), ProvisionError> {
    if value.is_empty()
        || value.starts_with('-')
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(ProvisionError::Validation(format!("invalid {} name '{}'", label, value)));
    }
    Ok(())
}
