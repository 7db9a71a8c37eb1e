//! OpenJDK from the distribution archive.
//!
//! The package name alone does not prove which runtime ends up installed
//! (metapackages and defaults drift between releases), so the package step
//! runs the JDK's own `java -version` and requires the requested feature
//! release.

use camino::Utf8PathBuf;

use crate::config::JavaSettings;
use crate::host::FILE_MODE;
use crate::probe::SystemProfile;
use crate::step::{ArtifactCheck, ProfileStep, ProvisioningStep};

/// Matches `openjdk version "17.0.9"` as well as the legacy `"1.8.0_392"`.
const VERSION_PATTERN: &str = r#"version "(?:1\.)?(\d+)"#;

pub(super) fn steps(system: &SystemProfile, settings: &JavaSettings) -> Vec<ProfileStep> {
    let version = &settings.version;
    let java_home = Utf8PathBuf::from(format!(
        "/usr/lib/jvm/java-{}-openjdk-{}",
        version, system.architecture
    ));
    let java = java_home.join("bin/java");

    vec![
        ProfileStep::required(ProvisioningStep::PackageInstalled {
            name: format!("openjdk-{}-jdk-headless", version),
            version: None,
            verify: Some(ArtifactCheck {
                command: vec![java.to_string(), "-version".to_string()],
                pattern: VERSION_PATTERN.to_string(),
                expected: version.clone(),
            }),
        }),
        ProfileStep::required(ProvisioningStep::AlternativeSelected {
            name: "java".to_string(),
            path: java,
        }),
        ProfileStep::required(ProvisioningStep::file(
            "/etc/profile.d/java.sh",
            format!(
                "# Managed by rsprovision.\nexport JAVA_HOME={}\n",
                java_home
            ),
            FILE_MODE,
        )),
    ]
}
