//! Environment prober.
//!
//! Reads the OS identity from `/etc/os-release` (see os-release(5)) and the
//! machine architecture and kernel release from `uname(2)`, producing an
//! immutable [`SystemProfile`]. Unsupported distributions and architectures
//! are rejected here, before anything on the host is touched.

use std::collections::HashMap;

use camino::Utf8Path;
use strum::Display;

use crate::error::ProvisionError;
use crate::host::Host;

/// Well-known path of the OS descriptor.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Supported distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Distribution {
    Debian,
    Ubuntu,
}

impl Distribution {
    /// Parses an os-release `ID` value.
    pub fn from_id(id: &str) -> Result<Self, ProvisionError> {
        match id {
            "debian" => Ok(Self::Debian),
            "ubuntu" => Ok(Self::Ubuntu),
            other => Err(ProvisionError::UnsupportedEnvironment(format!(
                "distribution '{}' is not supported (expected debian or ubuntu)",
                other
            ))),
        }
    }
}

/// Supported CPU architectures, named as dpkg names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    /// Maps a `uname -m` machine name to a dpkg architecture.
    pub fn from_machine(machine: &str) -> Result<Self, ProvisionError> {
        match machine {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            other => Err(ProvisionError::UnsupportedArchitecture(format!(
                "machine '{}' is not supported (expected x86_64 or aarch64)",
                other
            ))),
        }
    }

    /// Returns the `uname -m` spelling, used by vendor repository paths.
    pub fn machine(&self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
        }
    }
}

/// Immutable snapshot of the host identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    pub distribution: Distribution,
    pub version_id: String,
    pub codename: String,
    pub architecture: Architecture,
    pub kernel_release: String,
}

impl SystemProfile {
    /// Fails with `UnsupportedArchitecture` unless the host architecture is in `allowed`.
    pub fn require_architecture(
        &self,
        allowed: &[Architecture],
        what: &str,
    ) -> Result<(), ProvisionError> {
        if allowed.contains(&self.architecture) {
            return Ok(());
        }
        let allowed = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(ProvisionError::UnsupportedArchitecture(format!(
            "{} requires {}, host is {}",
            what, allowed, self.architecture
        )))
    }

    /// Returns the version id with dots removed (`22.04` becomes `2204`).
    pub fn compact_version(&self) -> String {
        self.version_id.replace('.', "")
    }
}

/// Parses os-release content into key/value pairs.
///
/// Blank lines and `#` comments are skipped; values may be unquoted,
/// single-quoted or double-quoted with backslash escapes.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim())))
        .collect()
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            let inner = &value[1..value.len() - 1];
            if first == b'\'' {
                return inner.to_string();
            }
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            return out;
        }
    }
    value.to_string()
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    fields.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Derives the codename from `VERSION_CODENAME`, `UBUNTU_CODENAME`, or the
/// parenthesised word of `VERSION` (e.g. `12 (bookworm)`).
fn codename(fields: &HashMap<String, String>) -> Option<String> {
    if let Some(c) = non_empty(fields, "VERSION_CODENAME").or(non_empty(fields, "UBUNTU_CODENAME")) {
        return Some(c.to_string());
    }
    let version = non_empty(fields, "VERSION")?;
    let start = version.find('(')? + 1;
    let end = start + version[start..].find(')')?;
    version[start..end]
        .split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(',').to_lowercase())
}

/// Builds a [`SystemProfile`] from os-release content and `uname` values.
pub fn profile_from_parts(
    os_release: &str,
    machine: &str,
    kernel_release: &str,
) -> Result<SystemProfile, ProvisionError> {
    let fields = parse_os_release(os_release);

    let id = non_empty(&fields, "ID").ok_or_else(|| {
        ProvisionError::UnsupportedEnvironment(format!("{} has no ID", OS_RELEASE_PATH))
    })?;
    let distribution = Distribution::from_id(id)?;

    let version_id = non_empty(&fields, "VERSION_ID").ok_or_else(|| {
        ProvisionError::UnsupportedEnvironment(format!("{} has no VERSION_ID", OS_RELEASE_PATH))
    })?;
    let codename = codename(&fields).ok_or_else(|| {
        ProvisionError::UnsupportedEnvironment(format!(
            "{} has no VERSION_CODENAME, UBUNTU_CODENAME or codename in VERSION",
            OS_RELEASE_PATH
        ))
    })?;

    let architecture = Architecture::from_machine(machine)?;

    Ok(SystemProfile {
        distribution,
        version_id: version_id.to_string(),
        codename,
        architecture,
        kernel_release: kernel_release.to_string(),
    })
}

/// Probes the host. Read-only.
pub fn probe(host: &Host) -> Result<SystemProfile, ProvisionError> {
    let path = Utf8Path::new(OS_RELEASE_PATH);
    let content = match host.read(path) {
        Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(None) => {
            return Err(ProvisionError::UnsupportedEnvironment(format!(
                "{} not found",
                OS_RELEASE_PATH
            )));
        }
        Err(e) => {
            return Err(ProvisionError::UnsupportedEnvironment(format!(
                "{} is unreadable: {}",
                OS_RELEASE_PATH, e
            )));
        }
    };

    let uname = rustix::system::uname();
    let machine = uname.machine().to_string_lossy();
    let release = uname.release().to_string_lossy();

    let profile = profile_from_parts(&content, &machine, &release)?;
    tracing::info!(
        distribution = %profile.distribution,
        version = %profile.version_id,
        codename = %profile.codename,
        architecture = %profile.architecture,
        "probed host"
    );
    Ok(profile)
}
