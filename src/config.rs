//! Settings file handling.
//!
//! Settings are optional: without a file every profile uses the defaults
//! below. A YAML file may override any subset, for example:
//!
//! ```yaml
//! java:
//!   version: "21"
//! cuda:
//!   toolkit_package: cuda-toolkit-12-4
//! network:
//!   retries: 5
//! ```

use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, io_error_kind_message};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub java: JavaSettings,
    pub docker: DockerSettings,
    pub cuda: CudaSettings,
    pub nvidia_container_toolkit: ToolkitSettings,
    pub network: NetworkSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct JavaSettings {
    /// OpenJDK feature release, e.g. `17`.
    pub version: String,
}

impl Default for JavaSettings {
    fn default() -> Self {
        Self {
            version: "17".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerSettings {
    /// Base URL of the Docker APT repositories (`/<distro>` is appended).
    pub repository_url: String,
    /// User to add to the `docker` group, if any.
    pub group_user: Option<String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            repository_url: "https://download.docker.com/linux".to_string(),
            group_user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CudaSettings {
    /// Base URL of the NVIDIA CUDA repositories.
    pub repository_url: String,
    /// Toolkit package, e.g. `cuda-toolkit` or `cuda-toolkit-12-4`.
    pub toolkit_package: String,
    /// Install headers for the running kernel (best-effort).
    pub kernel_headers: bool,
}

impl Default for CudaSettings {
    fn default() -> Self {
        Self {
            repository_url: "https://developer.download.nvidia.com/compute/cuda/repos".to_string(),
            toolkit_package: "cuda-toolkit".to_string(),
            kernel_headers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolkitSettings {
    /// Base URL of the libnvidia-container repository.
    pub repository_url: String,
}

impl Default for ToolkitSettings {
    fn default() -> Self {
        Self {
            repository_url: "https://nvidia.github.io/libnvidia-container".to_string(),
        }
    }
}

/// Bounded, fixed-delay retries for network operations (curl, apt).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSettings {
    pub retries: u32,
    pub retry_delay_secs: u32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_secs: 5,
        }
    }
}

impl Settings {
    /// Validates field values that serde cannot check.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.java.version.is_empty() || !self.java.version.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProvisionError::Config(format!(
                "java.version must be a number, got '{}'",
                self.java.version
            )));
        }
        for (key, raw) in [
            ("docker.repository_url", &self.docker.repository_url),
            ("cuda.repository_url", &self.cuda.repository_url),
            ("nvidia_container_toolkit.repository_url", &self.nvidia_container_toolkit.repository_url),
        ] {
            let parsed = url::Url::parse(raw)
                .map_err(|e| ProvisionError::Config(format!("{} '{}' is invalid: {}", key, raw, e)))?;
            if parsed.scheme() != "https" {
                return Err(ProvisionError::Config(format!("{} '{}' must use https", key, raw)));
            }
        }
        if self.network.retries > 20 {
            return Err(ProvisionError::Config(format!(
                "network.retries must be at most 20, got {}",
                self.network.retries
            )));
        }
        Ok(())
    }
}

/// Loads settings from a YAML file.
pub fn load_settings(path: &Utf8Path) -> Result<Settings, ProvisionError> {
    let file = File::open(path).map_err(|e| {
        ProvisionError::Config(format!("failed to open {}: {}", path, io_error_kind_message(&e)))
    })?;
    let reader = BufReader::new(file);
    let settings: Settings = serde_yaml::from_reader(reader)
        .map_err(|e| ProvisionError::Config(format!("failed to parse {}: {}", path, e)))?;
    settings.validate()?;
    Ok(settings)
}
