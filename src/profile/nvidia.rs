use camino::Utf8PathBuf;

use crate::config::ToolkitSettings;
use crate::probe::SystemProfile;
use crate::step::{KeyFormat, KeySource, ProfileStep, ProvisioningStep};

const KEYRING: &str = "/usr/share/keyrings/nvidia-container-toolkit-keyring.gpg";
const SOURCE_LIST: &str = "/etc/apt/sources.list.d/nvidia-container-toolkit.list";
const DOCKER_DAEMON_CONFIG: &str = "/etc/docker/daemon.json";

pub(super) fn steps(system: &SystemProfile, settings: &ToolkitSettings) -> Vec<ProfileStep> {
    let base = settings.repository_url.trim_end_matches('/');
    vec![
        ProfileStep::required(ProvisioningStep::RepositoryRegistered {
            list_path: Utf8PathBuf::from(SOURCE_LIST),
            // The upstream list file uses `$(ARCH)`; it is expanded here so the
            // entry compares equal to what ends up on disk.
            entry: format!(
                "deb [signed-by={}] {}/stable/deb/{} /",
                KEYRING, base, system.architecture
            ),
            keyring: KeySource {
                url: format!("{}/gpgkey", base),
                path: Utf8PathBuf::from(KEYRING),
                format: KeyFormat::Dearmor,
            },
        }),
        ProfileStep::required(ProvisioningStep::package("nvidia-container-toolkit")),
        ProfileStep::required(ProvisioningStep::RuntimeRegistered {
            runtime: "nvidia".to_string(),
            engine: "docker".to_string(),
            config_path: Utf8PathBuf::from(DOCKER_DAEMON_CONFIG),
        }),
    ]
}
