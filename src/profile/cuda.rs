//! CUDA toolkit from NVIDIA's APT repository.
//!
//! NVIDIA publishes one repository per distribution release
//! (`ubuntu2204`, `debian12`, ...) and only the x86_64 tree carries the full
//! toolkit, so the profile refuses other architectures up front.

use camino::Utf8PathBuf;

use crate::config::CudaSettings;
use crate::error::ProvisionError;
use crate::host::FILE_MODE;
use crate::probe::{Architecture, Distribution, SystemProfile};
use crate::step::{KeyFormat, KeySource, ProfileStep, ProvisioningStep};

const KEYRING: &str = "/usr/share/keyrings/cuda-archive-keyring.gpg";
const SOURCE_LIST: &str = "/etc/apt/sources.list.d/cuda.list";
const PIN_FILE: &str = "/etc/apt/preferences.d/cuda-repository-pin-600";
const SIGNING_KEY: &str = "3bf863cc.pub";

/// Keeps distribution-built nsight tools from shadowing NVIDIA's and
/// prefers the NVIDIA repository for everything else it ships.
const PIN_PREFERENCES: &str = "\
Package: nsight-compute
Pin: origin *ubuntu.com*
Pin-Priority: -1

Package: nsight-systems
Pin: origin *ubuntu.com*
Pin-Priority: -1

Package: *
Pin: release l=NVIDIA CUDA
Pin-Priority: 600
";

const ENV_SNIPPET: &str = "\
# Managed by rsprovision.
export PATH=\"/usr/local/cuda/bin${PATH:+:${PATH}}\"
export LD_LIBRARY_PATH=\"/usr/local/cuda/lib64${LD_LIBRARY_PATH:+:${LD_LIBRARY_PATH}}\"
";

fn repository_dir(system: &SystemProfile) -> String {
    match system.distribution {
        Distribution::Ubuntu => format!("ubuntu{}", system.compact_version()),
        Distribution::Debian => format!("debian{}", system.version_id),
    }
}

pub(super) fn steps(
    system: &SystemProfile,
    settings: &CudaSettings,
) -> Result<Vec<ProfileStep>, ProvisionError> {
    system.require_architecture(&[Architecture::Amd64], "the cuda profile")?;

    let repository = format!(
        "{}/{}/{}",
        settings.repository_url.trim_end_matches('/'),
        repository_dir(system),
        system.architecture.machine()
    );

    let mut steps = vec![
        ProfileStep::required(ProvisioningStep::RepositoryRegistered {
            list_path: Utf8PathBuf::from(SOURCE_LIST),
            entry: format!("deb [signed-by={}] {}/ /", KEYRING, repository),
            keyring: KeySource {
                url: format!("{}/{}", repository, SIGNING_KEY),
                path: Utf8PathBuf::from(KEYRING),
                format: KeyFormat::Dearmor,
            },
        }),
        ProfileStep::required(ProvisioningStep::file(PIN_FILE, PIN_PREFERENCES, FILE_MODE)),
    ];

    if settings.kernel_headers {
        // Headers for custom or cloud kernels are often not in the archive;
        // the toolkit installs fine without them.
        steps.push(ProfileStep::best_effort(ProvisioningStep::package(format!(
            "linux-headers-{}",
            system.kernel_release
        ))));
    }

    steps.push(ProfileStep::required(ProvisioningStep::package(
        settings.toolkit_package.clone(),
    )));
    steps.push(ProfileStep::required(ProvisioningStep::file(
        "/etc/profile.d/cuda.sh",
        ENV_SNIPPET,
        FILE_MODE,
    )));
    Ok(steps)
}
