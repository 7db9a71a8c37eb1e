use crate::probe::{Distribution, SystemProfile};
use crate::step::{ProfileStep, ProvisioningStep};

const PACKAGES: &[&str] = &[
    "apt-transport-https",
    "ca-certificates",
    "curl",
    "gnupg",
    "lsb-release",
];

pub(super) fn steps(system: &SystemProfile) -> Vec<ProfileStep> {
    let mut steps: Vec<ProfileStep> = PACKAGES
        .iter()
        .map(|name| ProfileStep::required(ProvisioningStep::package(*name)))
        .collect();
    match system.distribution {
        Distribution::Ubuntu => steps.push(ProfileStep::required(ProvisioningStep::package(
            "software-properties-common",
        ))),
        Distribution::Debian => {}
    }
    steps
}
