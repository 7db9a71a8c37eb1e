use camino::Utf8PathBuf;

use crate::config::DockerSettings;
use crate::probe::SystemProfile;
use crate::step::{KeyFormat, KeySource, ProfileStep, ProvisioningStep};

const KEYRING: &str = "/etc/apt/keyrings/docker.asc";
const SOURCE_LIST: &str = "/etc/apt/sources.list.d/docker.list";
const PACKAGES: &[&str] = &[
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

pub(super) fn steps(system: &SystemProfile, settings: &DockerSettings) -> Vec<ProfileStep> {
    let repository = format!(
        "{}/{}",
        settings.repository_url.trim_end_matches('/'),
        system.distribution
    );

    let mut steps = vec![ProfileStep::required(ProvisioningStep::RepositoryRegistered {
        list_path: Utf8PathBuf::from(SOURCE_LIST),
        entry: format!(
            "deb [arch={} signed-by={}] {} {} stable",
            system.architecture, KEYRING, repository, system.codename
        ),
        keyring: KeySource {
            url: format!("{}/gpg", repository),
            path: Utf8PathBuf::from(KEYRING),
            format: KeyFormat::Armored,
        },
    })];

    steps.extend(
        PACKAGES
            .iter()
            .map(|name| ProfileStep::required(ProvisioningStep::package(*name))),
    );
    steps.push(ProfileStep::required(ProvisioningStep::ServiceEnabled {
        unit: "docker".to_string(),
    }));

    if let Some(user) = &settings.group_user {
        steps.push(ProfileStep::required(ProvisioningStep::UserInGroup {
            user: user.clone(),
            group: "docker".to_string(),
        }));
    }
    steps
}
