//! Idempotency oracle.
//!
//! Answers "does the host already satisfy this step?" without changing
//! anything. Query failures never surface as errors: they are logged at
//! debug level and reported as "not satisfied", leaving the step executor to
//! attempt the change and report a concrete failure.

use camino::Utf8Path;
use regex::Regex;
use tracing::debug;

use crate::error::ProvisionError;
use crate::executor::CommandSpec;
use crate::host::Host;
use crate::step::{ArtifactCheck, KeySource, ProvisioningStep, version_matches};

/// Path of the group database.
pub const GROUP_FILE: &str = "/etc/group";

/// `dpkg-query` status of a fully installed package.
const INSTALLED_STATUS: &str = "install ok installed";

/// Read-only view over the host used to evaluate steps.
pub struct Oracle<'a> {
    host: &'a Host,
}

impl<'a> Oracle<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self { host }
    }

    /// Returns true if the host already satisfies `step`.
    pub fn is_satisfied(&self, step: &ProvisioningStep) -> bool {
        match self.check(step) {
            Ok(satisfied) => satisfied,
            Err(e) => {
                debug!(step = %step, "state query failed, treating as not satisfied: {:#}", e);
                false
            }
        }
    }

    fn check(&self, step: &ProvisioningStep) -> anyhow::Result<bool> {
        match step {
            ProvisioningStep::PackageInstalled {
                name,
                version,
                verify,
            } => {
                let Some(installed) = self.installed_version(name)? else {
                    return Ok(false);
                };
                if let Some(requested) = version
                    && !version_matches(requested, &installed)
                {
                    debug!(package = %name, %requested, %installed, "installed version differs");
                    return Ok(false);
                }
                match verify {
                    Some(check) => Ok(self
                        .artifact_version(check)?
                        .is_some_and(|v| version_matches(&check.expected, &v))),
                    None => Ok(true),
                }
            }
            ProvisioningStep::FileContentEquals {
                path,
                content,
                mode,
            } => Ok(self.file_matches(path, content.as_bytes(), *mode)?),
            ProvisioningStep::RepositoryRegistered {
                list_path,
                entry,
                keyring,
            } => Ok(self.keyring_present(keyring)? && self.entry_present(list_path, entry)?),
            ProvisioningStep::AlternativeSelected { name, path } => {
                let spec = CommandSpec::query("update-alternatives", ["--query", name.as_str()]);
                let result = self.host.run(&spec)?;
                if !result.success() {
                    return Ok(false);
                }
                Ok(alternative_value(&result.stdout).is_some_and(|v| v == path.as_str()))
            }
            ProvisioningStep::ServiceEnabled { unit } => {
                for query in ["is-enabled", "is-active"] {
                    let spec = CommandSpec::query("systemctl", [query, "--quiet", unit.as_str()]);
                    if !self.host.run(&spec)?.success() {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ProvisioningStep::RuntimeRegistered {
                runtime,
                config_path,
                ..
            } => {
                let Some(bytes) = self.host.read(config_path)? else {
                    return Ok(false);
                };
                Ok(runtime_registered(&String::from_utf8_lossy(&bytes), runtime))
            }
            ProvisioningStep::UserInGroup { user, group } => {
                let Some(bytes) = self.host.read(Utf8Path::new(GROUP_FILE))? else {
                    return Ok(false);
                };
                Ok(group_has_member(&String::from_utf8_lossy(&bytes), group, user))
            }
        }
    }

    /// Returns the installed version of a package, `None` if not fully installed.
    pub fn installed_version(&self, name: &str) -> anyhow::Result<Option<String>> {
        let spec = CommandSpec::query("dpkg-query", ["-W", "-f=${Status}\t${Version}", name]);
        let result = self.host.run(&spec)?;
        if !result.success() {
            return Ok(None);
        }
        Ok(parse_dpkg_status(&result.stdout))
    }

    /// Runs an artifact check and returns the version it reports.
    pub fn artifact_version(&self, check: &ArtifactCheck) -> anyhow::Result<Option<String>> {
        let Some((program, args)) = check.command.split_first() else {
            return Ok(None);
        };
        let spec = CommandSpec::query(program.as_str(), args.iter().map(String::as_str));
        let result = self.host.run(&spec)?;
        if !result.success() {
            return Ok(None);
        }
        Ok(check.extract(&result.combined_output())?)
    }

    /// True if the file exists with exactly `content` and `mode`.
    pub fn file_matches(
        &self,
        path: &Utf8Path,
        content: &[u8],
        mode: u32,
    ) -> Result<bool, ProvisionError> {
        match self.host.read(path)? {
            Some(current) if current == content => Ok(self.host.mode(path)? == Some(mode)),
            _ => Ok(false),
        }
    }

    /// True if the keyring file exists and is non-empty.
    pub fn keyring_present(&self, key: &KeySource) -> Result<bool, ProvisionError> {
        Ok(self.host.read(&key.path)?.is_some_and(|bytes| !bytes.is_empty()))
    }

    /// True if every line of `entry` appears verbatim as a line of the list file.
    pub fn entry_present(&self, list_path: &Utf8Path, entry: &str) -> Result<bool, ProvisionError> {
        let Some(bytes) = self.host.read(list_path)? else {
            return Ok(false);
        };
        let current = String::from_utf8_lossy(&bytes);
        Ok(entry
            .lines()
            .filter(|l| !l.trim().is_empty())
            .all(|wanted| current.lines().any(|line| line.trim_end() == wanted.trim_end())))
    }
}

/// Parses `dpkg-query -f '${Status}\t${Version}'` output.
pub fn parse_dpkg_status(output: &str) -> Option<String> {
    let line = output.lines().next()?;
    let (status, version) = line.split_once('\t')?;
    (status.trim() == INSTALLED_STATUS && !version.trim().is_empty())
        .then(|| version.trim().to_string())
}

/// Extracts the `Value:` field of `update-alternatives --query` output.
pub fn alternative_value(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Value:"))
        .map(str::trim)
}

/// True if `runtime` is a key of the `"runtimes"` object in a Docker daemon config.
pub fn runtime_registered(config: &str, runtime: &str) -> bool {
    let Ok(start_re) = Regex::new(r#""runtimes"\s*:\s*\{"#) else {
        return false;
    };
    let Some(start) = start_re.find(config) else {
        return false;
    };
    // Scan to the matching brace of the runtimes object.
    let body = &config[start.end()..];
    let mut depth = 1usize;
    let mut end = body.len();
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = i;
                    break;
                }
            }
            _ => {}
        }
    }
    let Ok(key_re) = Regex::new(&format!(r#""{}"\s*:"#, regex::escape(runtime))) else {
        return false;
    };
    key_re.is_match(&body[..end])
}

/// True if `/etc/group` content lists `user` as a member of `group`.
pub fn group_has_member(content: &str, group: &str, user: &str) -> bool {
    content.lines().any(|line| {
        let mut fields = line.split(':');
        fields.next() == Some(group)
            && fields
                .nth(2)
                .is_some_and(|members| members.split(',').any(|m| m.trim() == user))
    })
}
