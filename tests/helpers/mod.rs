//! Shared fixtures for integration tests.
//!
//! [`FakeSystem`] stands in for the tools rsprovision drives (`dpkg-query`,
//! `apt-get`, `curl`, `gpg`, `update-alternatives`, `systemctl`, `usermod`,
//! `nvidia-ctk` and `java -version`). It keeps package, alternative and
//! service state in memory and writes files under a temporary root, so a
//! [`Host`] built on it behaves like a small Debian system.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use rsprovision::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use rsprovision::host::Host;
use rsprovision::probe::{Architecture, Distribution, SystemProfile};

pub const UBUNTU_OS_RELEASE: &str = r#"PRETTY_NAME="Ubuntu 22.04.4 LTS"
NAME="Ubuntu"
VERSION_ID="22.04"
VERSION="22.04.4 LTS (Jammy Jellyfish)"
VERSION_CODENAME=jammy
ID=ubuntu
ID_LIKE=debian
UBUNTU_CODENAME=jammy
"#;

pub const FEDORA_OS_RELEASE: &str = r#"NAME="Fedora Linux"
VERSION="39 (Workstation Edition)"
ID=fedora
VERSION_ID=39
"#;

/// Version the fake apt-get installs when none was requested.
pub const DEFAULT_PACKAGE_VERSION: &str = "1.0-1";

/// One recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mutating: bool,
}

impl Call {
    pub fn line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
struct State {
    /// package name -> installed version
    packages: BTreeMap<String, String>,
    /// package name -> version apt-get will install
    available: BTreeMap<String, String>,
    /// packages whose installation fails
    broken: BTreeSet<String>,
    alternatives: BTreeMap<String, String>,
    services: BTreeSet<String>,
    /// url -> key body served by curl; unknown urls get a generic key
    keys: BTreeMap<String, String>,
    failing_urls: BTreeSet<String>,
    gpg_fails: bool,
    /// feature release `java -version` reports, overriding the package name
    java_reports: Option<String>,
    calls: Vec<Call>,
}

/// In-memory Debian-like system rooted in a temporary directory.
#[derive(Clone)]
pub struct FakeSystem {
    root: Utf8PathBuf,
    state: Arc<Mutex<State>>,
}

impl FakeSystem {
    pub fn new(root: &Utf8Path) -> Self {
        Self {
            root: root.to_path_buf(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn install(&self, name: &str, version: &str) {
        self.state.lock().unwrap().packages.insert(name.to_string(), version.to_string());
    }

    pub fn offer(&self, name: &str, version: &str) {
        self.state.lock().unwrap().available.insert(name.to_string(), version.to_string());
    }

    pub fn break_package(&self, name: &str) {
        self.state.lock().unwrap().broken.insert(name.to_string());
    }

    pub fn serve_key(&self, url: &str, body: &str) {
        self.state.lock().unwrap().keys.insert(url.to_string(), body.to_string());
    }

    pub fn fail_url(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.to_string());
    }

    pub fn fail_gpg(&self) {
        self.state.lock().unwrap().gpg_fails = true;
    }

    pub fn java_reports(&self, release: &str) {
        self.state.lock().unwrap().java_reports = Some(release.to_string());
    }

    pub fn installed(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().packages.get(name).cloned()
    }

    pub fn service_running(&self, unit: &str) -> bool {
        self.state.lock().unwrap().services.contains(unit)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn host_path(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn dpkg_query(state: &State, args: &[String]) -> ExecutionResult {
        let name = args.last().map(String::as_str).unwrap_or_default();
        match state.packages.get(name) {
            Some(version) => {
                ExecutionResult::exited(0, format!("install ok installed\t{}", version), "")
            }
            None => ExecutionResult::exited(
                1,
                "",
                format!("dpkg-query: no packages found matching {}\n", name),
            ),
        }
    }

    fn apt_get(&self, state: &mut State, args: &[String]) -> Result<ExecutionResult> {
        if args.iter().any(|a| a == "update") {
            return Ok(ExecutionResult::exited(0, "", ""));
        }
        if !args.iter().any(|a| a == "install") {
            bail!("fake apt-get: unsupported invocation {:?}", args);
        }
        let target = args.last().map(String::as_str).unwrap_or_default();
        let (name, pinned) = match target.split_once('=') {
            Some((name, version)) => (name, Some(version)),
            None => (target, None),
        };
        if state.broken.contains(name) {
            return Ok(ExecutionResult::exited(
                100,
                "",
                format!("E: Unable to locate package {}\n", name),
            ));
        }
        let version = pinned
            .map(str::to_string)
            .or_else(|| state.available.get(name).cloned())
            .unwrap_or_else(|| DEFAULT_PACKAGE_VERSION.to_string());
        state.packages.insert(name.to_string(), version);
        if name == "docker-ce" {
            self.append(&self.host_path("/etc/group"), "docker:x:999:\n")?;
        }
        Ok(ExecutionResult::exited(0, "", ""))
    }

    fn java(state: &State, command: &str) -> ExecutionResult {
        // /usr/lib/jvm/java-17-openjdk-amd64/bin/java
        let release = state.java_reports.clone().or_else(|| {
            command
                .split('/')
                .find_map(|part| part.strip_prefix("java-"))
                .and_then(|rest| rest.split('-').next())
                .map(str::to_string)
        });
        let package_installed = state.packages.keys().any(|p| p.starts_with("openjdk-"));
        match release {
            Some(release) if package_installed => ExecutionResult::exited(
                0,
                "",
                format!(
                    "openjdk version \"{0}.0.9\" 2023-10-17\nOpenJDK Runtime Environment (build {0}.0.9+9)\n",
                    release
                ),
            ),
            _ => ExecutionResult::exited(127, "", format!("{}: not found\n", command)),
        }
    }

    fn curl(state: &State, args: &[String]) -> Result<ExecutionResult> {
        let Some(url) = args.last() else {
            bail!("fake curl: no url");
        };
        let Some(output) = args.iter().position(|a| a == "-o").and_then(|i| args.get(i + 1)) else {
            bail!("fake curl: no -o");
        };
        if state.failing_urls.contains(url) {
            return Ok(ExecutionResult::exited(
                22,
                "",
                "curl: (22) The requested URL returned error: 404\n",
            ));
        }
        let body = state
            .keys
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("-----BEGIN PGP PUBLIC KEY BLOCK-----\n{}\n", url));
        fs::write(output, body)?;
        Ok(ExecutionResult::exited(0, "", ""))
    }

    fn gpg(state: &State, args: &[String]) -> Result<ExecutionResult> {
        if state.gpg_fails {
            return Ok(ExecutionResult::exited(2, "", "gpg: no valid OpenPGP data found.\n"));
        }
        let Some(output) = args.iter().position(|a| a == "-o").and_then(|i| args.get(i + 1)) else {
            bail!("fake gpg: no -o");
        };
        let Some(input) = args.last() else {
            bail!("fake gpg: no input");
        };
        let armored = fs::read(input)?;
        let mut binary = b"DEARMORED:".to_vec();
        binary.extend(armored);
        fs::write(output, binary)?;
        Ok(ExecutionResult::exited(0, "", ""))
    }

    fn alternatives(state: &mut State, args: &[String]) -> ExecutionResult {
        match args {
            [flag, name] if flag == "--query" => match state.alternatives.get(name) {
                Some(value) => ExecutionResult::exited(
                    0,
                    format!("Name: {}\nLink: /usr/bin/{}\nStatus: manual\nBest: {}\nValue: {}\n", name, name, value, value),
                    "",
                ),
                None => ExecutionResult::exited(2, "", format!("update-alternatives: error: no alternatives for {}\n", name)),
            },
            [flag, name, path] if flag == "--set" => {
                state.alternatives.insert(name.clone(), path.clone());
                ExecutionResult::exited(0, "", "")
            }
            _ => ExecutionResult::exited(2, "", "update-alternatives: unsupported\n"),
        }
    }

    fn systemctl(state: &mut State, args: &[String]) -> ExecutionResult {
        let unit = args.last().cloned().unwrap_or_default();
        match args.first().map(String::as_str) {
            Some("is-enabled") | Some("is-active") => {
                let code = if state.services.contains(&unit) { 0 } else { 1 };
                ExecutionResult::exited(code, "", "")
            }
            Some("enable") => {
                if !state.packages.contains_key("docker-ce") && unit == "docker" {
                    return ExecutionResult::exited(
                        1,
                        "",
                        format!("Failed to enable unit: Unit file {}.service does not exist.\n", unit),
                    );
                }
                state.services.insert(unit);
                ExecutionResult::exited(0, "", "")
            }
            Some("restart") => ExecutionResult::exited(0, "", ""),
            _ => ExecutionResult::exited(1, "", "systemctl: unsupported\n"),
        }
    }

    fn usermod(&self, args: &[String]) -> Result<ExecutionResult> {
        let [flag, group, user] = args else {
            bail!("fake usermod: unsupported invocation {:?}", args);
        };
        if flag != "-aG" {
            bail!("fake usermod: unsupported flag {}", flag);
        }
        let path = self.host_path("/etc/group");
        let content = fs::read_to_string(&path).unwrap_or_default();
        let prefix = format!("{}:", group);
        if !content.lines().any(|l| l.starts_with(&prefix)) {
            return Ok(ExecutionResult::exited(
                6,
                "",
                format!("usermod: group '{}' does not exist\n", group),
            ));
        }
        let updated: String = content
            .lines()
            .map(|line| {
                if !line.starts_with(&prefix) {
                    return format!("{}\n", line);
                }
                if line.ends_with(':') {
                    format!("{}{}\n", line, user)
                } else {
                    format!("{},{}\n", line, user)
                }
            })
            .collect();
        fs::write(&path, updated)?;
        Ok(ExecutionResult::exited(0, "", ""))
    }

    fn nvidia_ctk(&self, args: &[String]) -> Result<ExecutionResult> {
        let Some(config) = args.iter().find_map(|a| a.strip_prefix("--config=")) else {
            bail!("fake nvidia-ctk: no --config");
        };
        let config = Utf8PathBuf::from(config);
        if let Some(parent) = config.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            &config,
            "{\n    \"runtimes\": {\n        \"nvidia\": {\n            \"args\": [],\n            \"path\": \"nvidia-container-runtime\"\n        }\n    }\n}\n",
        )?;
        Ok(ExecutionResult::exited(0, "", ""))
    }

    fn append(&self, path: &Utf8Path, line: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = fs::read_to_string(path).unwrap_or_default();
        if !content.contains(line) {
            content.push_str(line);
            fs::write(path, content)?;
        }
        Ok(())
    }
}

impl CommandExecutor for FakeSystem {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            mutating: spec.mutating,
        });
        let args = spec.args.as_slice();
        match spec.command.as_str() {
            "dpkg-query" => Ok(Self::dpkg_query(&state, args)),
            "apt-get" => self.apt_get(&mut state, args),
            "curl" => Self::curl(&state, args),
            "gpg" => Self::gpg(&state, args),
            "update-alternatives" => Ok(Self::alternatives(&mut state, args)),
            "systemctl" => Ok(Self::systemctl(&mut state, args)),
            "usermod" => self.usermod(args),
            "nvidia-ctk" => self.nvidia_ctk(args),
            command if command.ends_with("/bin/java") => Ok(Self::java(&state, command)),
            other => bail!("fake system: unexpected command {}", other),
        }
    }
}

/// A temporary root with a fake system and a host bound to both.
pub struct TestHost {
    pub dir: TempDir,
    pub system: FakeSystem,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let system = FakeSystem::new(Self::utf8(&dir));
        let host = Self { dir, system };
        host.write("/etc/os-release", UBUNTU_OS_RELEASE);
        host.write("/etc/group", "root:x:0:\nsudo:x:27:alice\n");
        host
    }

    fn utf8(dir: &TempDir) -> &Utf8Path {
        Utf8Path::from_path(dir.path()).expect("temp dir path is not UTF-8")
    }

    pub fn root(&self) -> Utf8PathBuf {
        Self::utf8(&self.dir).to_path_buf()
    }

    pub fn host(&self, dry_run: bool) -> Host {
        Host::new(self.root(), Arc::new(self.system.clone()), dry_run)
    }

    pub fn path(&self, path: &str) -> Utf8PathBuf {
        self.root().join(path.trim_start_matches('/'))
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.path(path);
        fs::create_dir_all(full.parent().expect("path has a parent")).unwrap();
        fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.path(path)).ok()
    }

    /// Every regular file under the root, relative to it.
    pub fn files(&self) -> BTreeSet<String> {
        fn walk(dir: &Utf8Path, root: &Utf8Path, out: &mut BTreeSet<String>) {
            for entry in dir.read_dir_utf8().unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    walk(path, root, out);
                } else {
                    out.insert(format!("/{}", path.strip_prefix(root).unwrap()));
                }
            }
        }
        let root = self.root();
        let mut out = BTreeSet::new();
        walk(&root, &root, &mut out);
        out
    }
}

pub fn ubuntu_amd64() -> SystemProfile {
    SystemProfile {
        distribution: Distribution::Ubuntu,
        version_id: "22.04".into(),
        codename: "jammy".into(),
        architecture: Architecture::Amd64,
        kernel_release: "6.5.0-41-generic".into(),
    }
}

pub fn debian_arm64() -> SystemProfile {
    SystemProfile {
        distribution: Distribution::Debian,
        version_id: "12".into(),
        codename: "bookworm".into(),
        architecture: Architecture::Arm64,
        kernel_release: "6.1.0-18-arm64".into(),
    }
}
