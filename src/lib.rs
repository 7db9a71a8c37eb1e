pub mod apply;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod oracle;
pub mod orchestrator;
pub mod privilege;
pub mod probe;
pub mod profile;
pub mod repository;
pub mod step;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use strum::IntoEnumIterator;
use tracing::{info, warn};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::config::Settings;
use crate::executor::CommandExecutor;
use crate::host::Host;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::profile::ProfileKind;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(filter)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Loads the settings file if one was given, otherwise the defaults.
fn load_settings(common: &cli::CommonArgs) -> Result<Settings> {
    match &common.config {
        Some(path) => config::load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path)),
        None => Ok(Settings::default()),
    }
}

/// Probes the host and builds the requested profiles.
fn prepare(
    common: &cli::CommonArgs,
    settings: &Settings,
    host: &Host,
) -> Result<Vec<profile::ProvisioningProfile>> {
    let system = probe::probe(host).context("failed to probe host")?;
    let profiles = profile::build_profiles(&common.profiles, &system, settings)
        .context("failed to build profiles")?;
    Ok(profiles)
}

/// Applies the requested profiles to the host under `opts.common.root`.
///
/// A root other than `/` is accepted only for dry runs. The caller is
/// responsible for the privilege check; see [`privilege::require_root`].
pub fn run_apply(opts: &cli::ApplyArgs, executor: Arc<dyn CommandExecutor>) -> Result<RunReport> {
    privilege::ensure_live_root(&opts.common.root, opts.dry_run)?;
    let mut settings = load_settings(&opts.common)?;
    if opts.docker_group {
        match privilege::group_member(opts.invoking_user.as_deref()) {
            Some(user) => settings.docker.group_user = Some(user),
            None => warn!("docker group membership requested but SUDO_USER is not set; skipping"),
        }
    }

    let host = Host::new(opts.common.root.clone(), executor, opts.dry_run);
    let profiles = prepare(&opts.common, &settings, &host)?;
    if opts.dry_run {
        info!("dry run: no changes will be made");
    }
    Orchestrator::new(&profiles).run(&host, &settings.network)
}

/// Checks the requested profiles without changing anything.
///
/// Returns `true` when every required step is satisfied. Unsatisfied
/// best-effort steps are logged but do not count as drift.
pub fn run_check(opts: &cli::CheckArgs, executor: Arc<dyn CommandExecutor>) -> Result<bool> {
    let settings = load_settings(&opts.common)?;
    let host = Host::new(opts.common.root.clone(), executor, true);
    let profiles = prepare(&opts.common, &settings, &host)?;

    let results = Orchestrator::new(&profiles).check(&host, &settings.network)?;
    let drift = results
        .iter()
        .filter(|r| !r.satisfied && r.requirement == step::Requirement::Required)
        .count();
    if drift == 0 {
        info!("all {} step(s) satisfied", results.len());
    } else {
        warn!("{} of {} step(s) not satisfied", drift, results.len());
    }
    Ok(drift == 0)
}

/// Writes the profile catalogue, in run order, to `out`.
pub fn run_list(out: &mut impl Write) -> Result<()> {
    for kind in ProfileKind::iter() {
        writeln!(out, "{:<26}{}", kind.to_string(), kind.description())
            .context("failed to write profile list")?;
    }
    Ok(())
}
