//! Privilege checks.
//!
//! Applying profiles installs packages and writes under `/etc`, so it needs
//! an effective uid of 0. Dry runs, checks and listings only read.
//!
//! Only file I/O honours an alternate root; apt, dpkg, systemctl and
//! usermod always act on the running system. Applying for real is
//! therefore limited to `/`.

use camino::Utf8Path;

use crate::error::ProvisionError;

/// Fails with `Privilege` unless the process runs as root.
pub fn require_root() -> Result<(), ProvisionError> {
    ensure_root(rustix::process::geteuid().is_root())
}

fn ensure_root(is_root: bool) -> Result<(), ProvisionError> {
    if is_root {
        Ok(())
    } else {
        Err(ProvisionError::Privilege(
            "apply must run as root (try sudo, or pass --dry-run)".to_string(),
        ))
    }
}

/// Fails with `Validation` when a real apply targets a root other than `/`.
pub fn ensure_live_root(root: &Utf8Path, dry_run: bool) -> Result<(), ProvisionError> {
    if dry_run || root == Utf8Path::new("/") {
        Ok(())
    } else {
        Err(ProvisionError::Validation(format!(
            "--root {} is only supported with --dry-run; packages and services would change on the running system",
            root
        )))
    }
}

/// Normalises the sudo-invoking user (`SUDO_USER`) into a group member.
///
/// Root is ignored; adding root to a group is pointless.
pub fn group_member(sudo_user: Option<&str>) -> Option<String> {
    sudo_user
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "root")
        .map(str::to_string)
}
