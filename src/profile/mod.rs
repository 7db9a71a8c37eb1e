//! Provisioning profiles.
//!
//! A profile is a named, ordered list of steps that together install one
//! capability (Docker, CUDA, ...). Profiles are built once at startup from
//! the probed [`SystemProfile`] and the [`Settings`], and never change
//! during a run.
//!
//! The catalogue order of [`ProfileKind`] is the dependency order: later
//! profiles may rely on earlier ones (the base packages provide `curl` and
//! `gpg`; the NVIDIA Container Toolkit registers itself with Docker).

mod base;
mod cuda;
mod docker;
mod java;
mod nvidia;

use clap::ValueEnum;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::config::Settings;
use crate::error::ProvisionError;
use crate::probe::SystemProfile;
use crate::step::ProfileStep;

/// The profiles this tool knows, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum ProfileKind {
    /// System packages needed by the other profiles
    Base,
    /// OpenJDK runtime with JAVA_HOME
    Java,
    /// Docker Engine from the Docker APT repository
    Docker,
    /// CUDA toolkit from the NVIDIA APT repository (x86_64 only)
    Cuda,
    /// NVIDIA Container Toolkit registered with Docker
    NvidiaContainerToolkit,
}

impl ProfileKind {
    /// Builds the profile's steps for the given host.
    pub fn build(
        self,
        system: &SystemProfile,
        settings: &Settings,
    ) -> Result<ProvisioningProfile, ProvisionError> {
        let steps = match self {
            Self::Base => base::steps(system),
            Self::Java => java::steps(system, &settings.java),
            Self::Docker => docker::steps(system, &settings.docker),
            Self::Cuda => cuda::steps(system, &settings.cuda)?,
            Self::NvidiaContainerToolkit => nvidia::steps(system, &settings.nvidia_container_toolkit),
        };
        Ok(ProvisioningProfile {
            name: self.to_string(),
            steps,
        })
    }

    /// One-line description for listings.
    pub fn description(self) -> &'static str {
        match self {
            Self::Base => "system packages needed by the other profiles",
            Self::Java => "OpenJDK runtime with JAVA_HOME",
            Self::Docker => "Docker Engine from the Docker APT repository",
            Self::Cuda => "CUDA toolkit from the NVIDIA APT repository (x86_64 only)",
            Self::NvidiaContainerToolkit => "NVIDIA Container Toolkit registered with Docker",
        }
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningProfile {
    pub name: String,
    pub steps: Vec<ProfileStep>,
}

impl ProvisioningProfile {
    pub fn new(name: impl Into<String>, steps: Vec<ProfileStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// Builds the requested profiles in catalogue order.
///
/// An empty request selects every profile. Duplicates are ignored. All
/// profiles are built before anything runs, so an unsupported architecture
/// is reported before the host is touched.
pub fn build_profiles(
    requested: &[ProfileKind],
    system: &SystemProfile,
    settings: &Settings,
) -> Result<Vec<ProvisioningProfile>, ProvisionError> {
    ProfileKind::iter()
        .filter(|kind| requested.is_empty() || requested.contains(kind))
        .map(|kind| kind.build(system, settings))
        .collect()
}
