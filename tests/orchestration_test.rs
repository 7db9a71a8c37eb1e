mod helpers;

use std::sync::Arc;

use rsprovision::cli::{ApplyArgs, CheckArgs, CommonArgs, LogLevel};
use rsprovision::config::Settings;
use rsprovision::error::{ProvisionError, exit_code};
use rsprovision::orchestrator::{Orchestrator, RunReport};
use rsprovision::profile::{ProfileKind, build_profiles};
use rsprovision::{run_apply, run_check};

use helpers::{FEDORA_OS_RELEASE, TestHost, debian_arm64, ubuntu_amd64};

fn settings_with_group() -> Settings {
    let mut settings = Settings::default();
    settings.docker.group_user = Some("alice".into());
    settings
}

fn common(host: &TestHost, profiles: Vec<ProfileKind>) -> CommonArgs {
    CommonArgs {
        profiles,
        config: None,
        log_level: LogLevel::Error,
        root: host.root(),
    }
}

#[test]
fn full_catalogue_converges_and_second_run_is_a_no_op() {
    let test = TestHost::new();
    let settings = settings_with_group();
    let profiles = build_profiles(&[], &ubuntu_amd64(), &settings).unwrap();
    let orchestrator = Orchestrator::new(&profiles);
    let host = test.host(false);

    let first = orchestrator.run(&host, &settings.network).expect("first run succeeds");
    assert_eq!(first.applied(), orchestrator.total_steps());
    assert_eq!(first.failed(), 0);

    assert_eq!(test.system.installed("docker-ce").as_deref(), Some("1.0-1"));
    assert!(test.system.service_running("docker"));
    assert!(test.read("/etc/group").unwrap().contains("docker:x:999:alice"));
    assert!(test.read("/etc/docker/daemon.json").unwrap().contains("\"nvidia\""));
    assert_eq!(
        test.read("/etc/profile.d/java.sh").unwrap(),
        "# Managed by rsprovision.\nexport JAVA_HOME=/usr/lib/jvm/java-17-openjdk-amd64\n"
    );

    test.system.clear_calls();
    let second = orchestrator.run(&host, &settings.network).expect("second run succeeds");
    assert_eq!(second.already_satisfied(), orchestrator.total_steps());
    assert_eq!(second.applied(), 0);
    assert!(
        test.system.mutating_calls().is_empty(),
        "second run mutated the host: {:?}",
        test.system.mutating_calls()
    );
}

#[test]
fn partially_configured_host_converges() {
    let test = TestHost::new();
    test.system.install("curl", "7.81.0-1ubuntu1.15");
    test.write("/etc/apt/keyrings/docker.asc", "existing key\n");
    test.write(
        "/etc/apt/sources.list.d/docker.list",
        "deb [arch=amd64] https://download.docker.com/linux/ubuntu focal stable\n",
    );

    let settings = Settings::default();
    let profiles =
        build_profiles(&[ProfileKind::Base, ProfileKind::Docker], &ubuntu_amd64(), &settings)
            .unwrap();
    let host = test.host(false);
    let report = Orchestrator::new(&profiles).run(&host, &settings.network).unwrap();

    assert_eq!(report.already_satisfied(), 1, "only curl was in place");
    assert_eq!(test.system.installed("curl").as_deref(), Some("7.81.0-1ubuntu1.15"));
    assert_eq!(test.read("/etc/apt/keyrings/docker.asc").unwrap(), "existing key\n");
    assert_eq!(
        test.read("/etc/apt/sources.list.d/docker.list").unwrap(),
        "deb [arch=amd64 signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/ubuntu jammy stable\n"
    );
    assert!(
        !test
            .system
            .calls()
            .iter()
            .any(|c| c.command == "curl"),
        "existing keyring must not be re-downloaded"
    );
}

#[test]
fn required_failure_stops_the_run() {
    let test = TestHost::new();
    test.system.break_package("docker-ce");

    let settings = Settings::default();
    let profiles = build_profiles(&[], &ubuntu_amd64(), &settings).unwrap();
    let host = test.host(false);
    let err = Orchestrator::new(&profiles)
        .run(&host, &settings.network)
        .expect_err("docker-ce install fails");

    assert_eq!(exit_code(&err), 6);
    let message = format!("{:#}", err);
    assert!(message.contains("profile docker step 2/"), "{}", message);
    assert!(message.contains("docker-ce"), "{}", message);

    let calls = test.system.calls();
    assert!(
        !calls.iter().any(|c| c.line().contains("docker-ce-cli")),
        "steps after the failure were attempted"
    );
    assert!(
        !calls.iter().any(|c| c.line().contains("cuda") || c.command == "nvidia-ctk"),
        "later profiles were attempted"
    );
    assert!(test.system.installed("openjdk-17-jdk-headless").is_some());
}

#[test]
fn best_effort_failure_is_skipped() {
    let test = TestHost::new();
    test.system.break_package("linux-headers-6.5.0-41-generic");

    let settings = Settings::default();
    let profiles = build_profiles(&[ProfileKind::Cuda], &ubuntu_amd64(), &settings).unwrap();
    let host = test.host(false);
    let report = Orchestrator::new(&profiles)
        .run(&host, &settings.network)
        .expect("best-effort failure does not abort");

    assert_eq!(report.failed(), 1);
    assert_eq!(test.system.installed("cuda-toolkit").as_deref(), Some("1.0-1"));
    assert!(test.read("/etc/profile.d/cuda.sh").is_some());
    assert!(
        test.read("/usr/share/keyrings/cuda-archive-keyring.gpg")
            .unwrap()
            .starts_with("DEARMORED:")
    );
}

#[test]
fn unsupported_architecture_fails_before_any_command() {
    let test = TestHost::new();
    let err = build_profiles(&[ProfileKind::Docker, ProfileKind::Cuda], &debian_arm64(), &Settings::default())
        .unwrap_err();
    assert!(matches!(err, ProvisionError::UnsupportedArchitecture(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(test.system.calls().is_empty());
}

#[test]
fn postcondition_mismatch_is_reported() {
    let test = TestHost::new();
    test.system.java_reports("11");

    let settings = Settings::default();
    let profiles = build_profiles(&[ProfileKind::Java], &ubuntu_amd64(), &settings).unwrap();
    let host = test.host(false);
    let err = Orchestrator::new(&profiles)
        .run(&host, &settings.network)
        .expect_err("java 11 does not satisfy 17");

    assert_eq!(exit_code(&err), 7);
    let cause = err
        .chain()
        .find_map(|c| c.downcast_ref::<ProvisionError>())
        .expect("typed cause");
    match cause {
        ProvisionError::PostconditionNotMet {
            expected, actual, ..
        } => {
            assert_eq!(expected, "17");
            assert_eq!(actual, "11");
        }
        other => panic!("expected PostconditionNotMet, got {:?}", other),
    }
    assert!(test.read("/etc/profile.d/java.sh").is_none(), "later steps ran");
}

#[test]
fn dry_run_writes_nothing() {
    let test = TestHost::new();
    let before = test.files();

    let settings = settings_with_group();
    let profiles = build_profiles(&[], &ubuntu_amd64(), &settings).unwrap();
    let orchestrator = Orchestrator::new(&profiles);
    let report = orchestrator.run(&test.host(true), &settings.network).unwrap();

    assert_eq!(report.applied(), orchestrator.total_steps());
    assert_eq!(test.files(), before);
    assert!(test.system.mutating_calls().is_empty());
    assert!(test.system.installed("docker-ce").is_none());
}

#[test]
fn run_apply_probes_the_root() {
    let test = TestHost::new();
    let opts = ApplyArgs {
        common: common(&test, vec![ProfileKind::Docker, ProfileKind::Base]),
        dry_run: true,
        docker_group: false,
        invoking_user: None,
    };

    let report = run_apply(&opts, Arc::new(test.system.clone())).expect("dry run succeeds");
    let names: Vec<_> = report.profiles.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["base", "docker"]);
    assert!(test.system.mutating_calls().is_empty());
}

#[test]
fn run_apply_rejects_unsupported_distribution() {
    let test = TestHost::new();
    test.write("/etc/os-release", FEDORA_OS_RELEASE);
    let opts = ApplyArgs {
        common: common(&test, Vec::new()),
        dry_run: true,
        docker_group: false,
        invoking_user: None,
    };

    let err = run_apply(&opts, Arc::new(test.system.clone())).unwrap_err();
    assert_eq!(exit_code(&err), 3);
    assert!(format!("{:#}", err).contains("fedora"), "{:#}", err);
    assert!(test.system.calls().is_empty());
}

#[test]
fn run_apply_reports_missing_settings_file_as_config_error() {
    let test = TestHost::new();
    let mut common = common(&test, vec![ProfileKind::Base]);
    common.config = Some(test.path("/nonexistent.yml"));
    let opts = ApplyArgs {
        common,
        dry_run: true,
        docker_group: false,
        invoking_user: None,
    };

    let err = run_apply(&opts, Arc::new(test.system.clone())).unwrap_err();
    assert_eq!(exit_code(&err), 2);
}

#[test]
fn run_check_detects_drift_and_convergence() {
    let test = TestHost::new();
    let opts = CheckArgs {
        common: common(&test, vec![ProfileKind::Base, ProfileKind::Docker]),
    };

    assert!(!run_check(&opts, Arc::new(test.system.clone())).unwrap());
    assert!(test.system.mutating_calls().is_empty());

    let settings = Settings::default();
    let profiles =
        build_profiles(&[ProfileKind::Base, ProfileKind::Docker], &ubuntu_amd64(), &settings).unwrap();
    Orchestrator::new(&profiles).run(&test.host(false), &settings.network).unwrap();

    assert!(run_check(&opts, Arc::new(test.system.clone())).unwrap());
}

#[test]
fn run_apply_refuses_alternate_root_without_dry_run() {
    let test = TestHost::new();
    let before = test.files();
    let opts = ApplyArgs {
        common: common(&test, vec![ProfileKind::Docker]),
        dry_run: false,
        docker_group: false,
        invoking_user: None,
    };

    let err = run_apply(&opts, Arc::new(test.system.clone())).unwrap_err();
    assert_eq!(exit_code(&err), 2);
    assert!(format!("{:#}", err).contains("--dry-run"), "{:#}", err);
    assert!(test.system.calls().is_empty(), "{:?}", test.system.calls());
    assert_eq!(test.files(), before);
}

fn docker_group_opts(test: &TestHost, invoking_user: Option<&str>) -> ApplyArgs {
    ApplyArgs {
        common: common(test, vec![ProfileKind::Docker]),
        dry_run: true,
        docker_group: true,
        invoking_user: invoking_user.map(str::to_string),
    }
}

fn docker_steps(report: &RunReport) -> Vec<String> {
    report
        .profiles
        .iter()
        .flat_map(|p| p.results.iter().map(|r| r.step.clone()))
        .collect()
}

#[test]
fn docker_group_adds_the_sudo_user() {
    let test = TestHost::new();

    let report = run_apply(&docker_group_opts(&test, Some("alice")), Arc::new(test.system.clone()))
        .expect("dry run succeeds");
    let steps = docker_steps(&report);
    assert_eq!(steps.last().map(String::as_str), Some("user alice in group docker"), "{:?}", steps);
}

#[test]
fn docker_group_without_sudo_user_is_skipped() {
    for user in [None, Some("root"), Some("")] {
        let test = TestHost::new();
        let report = run_apply(&docker_group_opts(&test, user), Arc::new(test.system.clone()))
            .expect("dry run succeeds");
        let steps = docker_steps(&report);
        assert!(steps.iter().all(|s| !s.starts_with("user ")), "{:?}: {:?}", user, steps);
    }
}

#[test]
fn sudo_user_is_ignored_without_docker_group() {
    let test = TestHost::new();
    let mut opts = docker_group_opts(&test, Some("alice"));
    opts.docker_group = false;

    let report = run_apply(&opts, Arc::new(test.system.clone())).expect("dry run succeeds");
    assert!(docker_steps(&report).iter().all(|s| !s.starts_with("user ")));
}
