use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::profile::ProfileKind;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring the host to the state described by the given profiles
    Apply(ApplyArgs),

    /// Report which steps are not yet satisfied, without changing anything
    Check(CheckArgs),

    /// List the available profiles in the order they run
    List,

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

/// Arguments shared by `apply` and `check`.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Profiles to process; all profiles when omitted
    #[arg(value_enum)]
    pub profiles: Vec<ProfileKind>,

    /// Path to an optional YAML settings file
    #[arg(short, long)]
    pub config: Option<Utf8PathBuf>,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Alternate root for file reads and writes; apply requires --dry-run with it
    #[arg(long, default_value = "/", hide = true)]
    pub root: Utf8PathBuf,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not change anything, just show what would be done
    #[arg(long)]
    pub dry_run: bool,

    /// Add the invoking user (SUDO_USER) to the docker group
    #[arg(long, env = "RSPROVISION_DOCKER_GROUP", value_parser = clap::builder::BoolishValueParser::new())]
    pub docker_group: bool,

    /// User added to the docker group by --docker-group
    #[arg(long, env = "SUDO_USER", hide = true)]
    pub invoking_user: Option<String>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// Maps directly onto the `tracing` levels; `--log-level debug` also shows
/// oracle queries and commands skipped in dry-run mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}
