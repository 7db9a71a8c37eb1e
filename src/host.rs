//! The host being provisioned.
//!
//! [`Host`] bundles the two capabilities every component needs: a
//! [`CommandExecutor`] for the process boundary and a filesystem root under
//! which all absolute host paths are resolved. Production uses `/`; tests
//! point the root at a temporary directory and inject a fake executor, so no
//! component touches the real system directly.

use std::fs;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};

/// Mode for keyring, source-list and snippet files.
pub const FILE_MODE: u32 = 0o644;
/// Mode for directories created on demand.
pub const DIR_MODE: u32 = 0o755;

/// RAII guard to ensure temporary file cleanup even on error.
pub(crate) struct TempFileGuard {
    path: Utf8PathBuf,
}

impl TempFileGuard {
    pub(crate) fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("cleaned up temp file: {}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %self.path,
                    error_kind = ?e.kind(),
                    "failed to cleanup temp file: {}",
                    e,
                );
            }
        }
    }
}

/// Sets Unix file permissions on the given path.
pub(crate) fn set_file_mode(path: &Utf8Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Returns the permission bits of an existing file.
pub(crate) fn file_mode(path: &Utf8Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

/// Provisioning target: filesystem root plus command executor.
#[derive(Clone)]
pub struct Host {
    root: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
    dry_run: bool,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("root", &self.root)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Creates a host rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, executor: Arc<dyn CommandExecutor>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            executor,
            dry_run,
        }
    }

    /// Returns the filesystem root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns true if mutations are only logged.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Translates an absolute host path to a path under the root.
    ///
    /// `/etc/apt/keyrings/docker.asc` becomes `<root>/etc/apt/keyrings/docker.asc`.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.root.join(path.as_str().trim_start_matches('/'))
    }

    /// Runs a command, failing if it cannot be started.
    ///
    /// In dry-run mode mutating commands are logged and reported as
    /// [`ExecutionResult::skipped()`]; queries still run.
    pub fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        if self.dry_run && spec.mutating {
            info!("dry run: {}", spec.display());
            return Ok(ExecutionResult::skipped());
        }
        debug!("running: {}", spec.display());
        self.executor.execute(spec)
    }

    /// Reads a file, returning `None` when it does not exist.
    pub fn read(&self, path: &Utf8Path) -> Result<Option<Vec<u8>>, ProvisionError> {
        let resolved = self.resolve(path);
        match fs::read(&resolved) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProvisionError::io(format!("failed to read {}", path), e)),
        }
    }

    /// Returns the mode bits of a file, `None` if it does not exist.
    pub fn mode(&self, path: &Utf8Path) -> Result<Option<u32>, ProvisionError> {
        match file_mode(&self.resolve(path)) {
            Ok(mode) => Ok(Some(mode)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProvisionError::io(format!("failed to read metadata: {}", path), e)),
        }
    }

    /// Creates a directory and any missing parents with [`DIR_MODE`].
    pub fn create_dir_all(&self, path: &Utf8Path) -> Result<(), ProvisionError> {
        let resolved = self.resolve(path);
        if resolved.is_dir() {
            return Ok(());
        }
        if self.dry_run {
            info!("dry run: create directory {}", path);
            return Ok(());
        }
        fs::create_dir_all(&resolved)
            .map_err(|e| ProvisionError::io(format!("failed to create directory {}", path), e))?;
        set_file_mode(&resolved, DIR_MODE).map_err(|e| {
            ProvisionError::io(format!("failed to set permissions on {}", path), e)
        })?;
        Ok(())
    }

    /// Returns a unique temporary path next to `path` (same filesystem, so
    /// a rename into place is atomic).
    pub fn temp_path_for(&self, path: &Utf8Path) -> Utf8PathBuf {
        let name = path.file_name().unwrap_or("file");
        let parent = path.parent().unwrap_or(Utf8Path::new("/"));
        parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
    }

    /// Atomically replaces `path` with `content` and sets `mode`.
    ///
    /// The parent directory is created if missing. In dry-run mode the write
    /// is only logged.
    pub fn write_atomic(&self, path: &Utf8Path, content: &[u8], mode: u32) -> Result<(), ProvisionError> {
        if self.dry_run {
            info!("dry run: write {} ({} bytes, mode {:o})", path, content.len(), mode);
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let guard = TempFileGuard::new(self.resolve(&self.temp_path_for(path)));
        fs::write(guard.path(), content)
            .map_err(|e| ProvisionError::io(format!("failed to write {}", path), e))?;
        set_file_mode(guard.path(), mode)
            .map_err(|e| ProvisionError::io(format!("failed to set permissions on {}", path), e))?;
        fs::rename(guard.path(), self.resolve(path))
            .map_err(|e| ProvisionError::io(format!("failed to move file into place: {}", path), e))?;
        debug!("wrote {}", path);
        Ok(())
    }

    /// Sets the mode of an existing file.
    pub fn set_mode(&self, path: &Utf8Path, mode: u32) -> Result<(), ProvisionError> {
        if self.dry_run {
            info!("dry run: chmod {:o} {}", mode, path);
            return Ok(());
        }
        set_file_mode(&self.resolve(path), mode)
            .map_err(|e| ProvisionError::io(format!("failed to set permissions on {}", path), e))
    }
}
