//! Domain-specific error types for rsprovision.
//!
//! This module defines `ProvisionError`, a `thiserror`-based enum with one
//! variant per failure class of a provisioning run. Component operations
//! return `Result<T, ProvisionError>`, while composition boundaries (profiles,
//! the orchestrator, the CLI) use `anyhow::Result` with added context.
//!
//! `ProvisionError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically. [`exit_code`] walks an `anyhow::Error` chain to
//! recover the typed error and map it to a process exit code.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for rsprovision.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// The host OS descriptor is missing, unparsable, or names an unsupported distribution.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The host CPU architecture is not supported (globally or by a profile).
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A repository signing key could not be downloaded.
    #[error("failed to fetch signing key from {url}: {reason}")]
    KeyFetch { url: String, reason: String },

    /// A repository signing key could not be stored.
    #[error("failed to write signing key to {path}: {reason}")]
    KeyWrite { path: String, reason: String },

    /// An APT source-list or preferences file could not be written.
    #[error("repository configuration failed for {path}: {reason}")]
    RepositoryConfig { path: String, reason: String },

    /// The package manager failed to install a package.
    #[error("failed to install package {package}: {reason}")]
    PackageInstall { package: String, reason: String },

    /// A step was applied but the resulting state does not match what was requested.
    #[error("postcondition not met for {subject}: expected {expected}, found {actual}")]
    PostconditionNotMet {
        subject: String,
        expected: String,
        actual: String,
    },

    /// The process lacks the privilege required to mutate the host.
    #[error("insufficient privilege: {0}")]
    Privilege(String),

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command execution failed (non-zero exit, spawn failure, wait failure, etc.).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Exit code, signal information, or a description of the internal error.
        status: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually including a path.
        context: String,
        /// Derived from [`io_error_kind_message`].
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Creates an `Io` variant with the `message` field automatically derived
    /// from the `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Process exit code for this error class.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 1 | unclassified failure (execution, I/O) |
    /// | 2 | configuration or validation error |
    /// | 3 | unsupported environment or architecture |
    /// | 4 | insufficient privilege |
    /// | 5 | key fetch/write or repository configuration error |
    /// | 6 | package installation error |
    /// | 7 | postcondition not met |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) => 2,
            Self::UnsupportedEnvironment(_) | Self::UnsupportedArchitecture(_) => 3,
            Self::Privilege(_) => 4,
            Self::KeyFetch { .. } | Self::KeyWrite { .. } | Self::RepositoryConfig { .. } => 5,
            Self::PackageInstall { .. } => 6,
            Self::PostconditionNotMet { .. } => 7,
            Self::Execution { .. } | Self::Io { .. } => 1,
        }
    }
}

/// Maps an error chain to a process exit code.
///
/// The first `ProvisionError` found in the chain decides the code; errors
/// without a typed cause exit with 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProvisionError>())
        .map_or(1, ProvisionError::exit_code)
}
