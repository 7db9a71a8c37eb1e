//! Repository configurator.
//!
//! Manages APT keyring files, source-list entries and other small
//! configuration files. Every operation compares the current state with the
//! desired one first and only writes when they differ, so repeated calls with
//! identical inputs are no-ops.

use camino::Utf8Path;
use tracing::{debug, info};

use crate::config::NetworkSettings;
use crate::error::ProvisionError;
use crate::executor::CommandSpec;
use crate::host::{FILE_MODE, Host, TempFileGuard};
use crate::oracle::Oracle;
use crate::step::{KeyFormat, KeySource};

/// Whether an `ensure_*` call modified the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Change {
    Changed,
    Unchanged,
}

/// Writes keyrings and source entries onto a [`Host`].
pub struct RepositoryConfigurator<'a> {
    host: &'a Host,
    network: &'a NetworkSettings,
}

impl<'a> RepositoryConfigurator<'a> {
    pub fn new(host: &'a Host, network: &'a NetworkSettings) -> Self {
        Self { host, network }
    }

    /// Downloads and stores a signing key unless a non-empty keyring exists.
    ///
    /// The key is fetched into a temporary file next to the destination and
    /// moved (armored) or dearmored into place, then given mode 0644.
    pub fn ensure_keyring(&self, key: &KeySource) -> Result<Change, ProvisionError> {
        let oracle = Oracle::new(self.host);
        if oracle.keyring_present(key).map_err(|e| key_write_error(&key.path, e))? {
            debug!(path = %key.path, "keyring already present");
            return Ok(Change::Unchanged);
        }

        if let Some(parent) = key.path.parent() {
            self.host
                .create_dir_all(parent)
                .map_err(|e| key_write_error(&key.path, e))?;
        }

        info!(url = %key.url, path = %key.path, format = %key.format, "fetching signing key");
        let download = TempFileGuard::new(self.host.resolve(&self.host.temp_path_for(&key.path)));
        let fetch = CommandSpec::new(
            "curl",
            [
                "-fsSL".to_string(),
                "--retry".to_string(),
                self.network.retries.to_string(),
                "--retry-delay".to_string(),
                self.network.retry_delay_secs.to_string(),
                "-o".to_string(),
                download.path().to_string(),
                key.url.clone(),
            ],
        );
        let reason = match self.host.run(&fetch) {
            Ok(result) => result.check(&fetch).err().map(|e| e.to_string()),
            Err(e) => Some(format!("{:#}", e)),
        };
        if let Some(reason) = reason {
            return Err(ProvisionError::KeyFetch {
                url: key.url.clone(),
                reason,
            });
        }

        if self.host.dry_run() {
            return Ok(Change::Changed);
        }

        let downloaded = std::fs::metadata(download.path()).map(|m| m.len()).unwrap_or(0);
        if downloaded == 0 {
            return Err(ProvisionError::KeyFetch {
                url: key.url.clone(),
                reason: "downloaded key is empty".to_string(),
            });
        }

        let destination = self.host.resolve(&key.path);
        match key.format {
            KeyFormat::Armored => {
                std::fs::rename(download.path(), &destination).map_err(|e| {
                    key_write_error(&key.path, ProvisionError::io("failed to move key into place", e))
                })?;
            }
            KeyFormat::Dearmor => {
                let dearmor = CommandSpec::new(
                    "gpg",
                    [
                        "--batch",
                        "--yes",
                        "--dearmor",
                        "-o",
                        destination.as_str(),
                        download.path().as_str(),
                    ],
                );
                self.host
                    .run(&dearmor)
                    .map_err(|e| ProvisionError::KeyWrite {
                        path: key.path.to_string(),
                        reason: format!("{:#}", e),
                    })?
                    .check(&dearmor)
                    .map_err(|e| key_write_error(&key.path, e))?;
            }
        }

        self.host
            .set_mode(&key.path, FILE_MODE)
            .map_err(|e| key_write_error(&key.path, e))?;
        info!(path = %key.path, "stored signing key");
        Ok(Change::Changed)
    }

    /// Writes `expected` to `path` unless the file already holds exactly that content.
    ///
    /// A file with matching content but a different mode is only chmod-ed.
    pub fn ensure_source_entry(
        &self,
        path: &Utf8Path,
        expected: &str,
    ) -> Result<Change, ProvisionError> {
        self.ensure_apt_file(path, expected.as_bytes(), FILE_MODE)
    }

    /// [`ensure_file`](Self::ensure_file) for APT configuration such as pin
    /// preferences; failures are reported as `RepositoryConfig`.
    pub fn ensure_apt_file(
        &self,
        path: &Utf8Path,
        content: &[u8],
        mode: u32,
    ) -> Result<Change, ProvisionError> {
        self.ensure_file(path, content, mode)
            .map_err(|e| ProvisionError::RepositoryConfig {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Content-gated write of an arbitrary file with the given mode.
    pub fn ensure_file(
        &self,
        path: &Utf8Path,
        content: &[u8],
        mode: u32,
    ) -> Result<Change, ProvisionError> {
        match self.host.read(path)? {
            Some(current) if current == content => {
                if self.host.mode(path)? == Some(mode) {
                    debug!(%path, "content already up to date");
                    return Ok(Change::Unchanged);
                }
                self.host.set_mode(path, mode)?;
                info!(%path, mode = format!("{:o}", mode), "corrected file mode");
                Ok(Change::Changed)
            }
            _ => {
                self.host.write_atomic(path, content, mode)?;
                info!(%path, "wrote file");
                Ok(Change::Changed)
            }
        }
    }
}

fn key_write_error(path: &Utf8Path, err: ProvisionError) -> ProvisionError {
    ProvisionError::KeyWrite {
        path: path.to_string(),
        reason: err.to_string(),
    }
}
