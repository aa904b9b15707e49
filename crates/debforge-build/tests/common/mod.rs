//! In-memory collaborators for build tests
//!
//! `MockWorld` implements every collaborator trait. It records the
//! operations it was asked to perform, fails steps on request and publishes
//! into an index that only becomes visible after index regeneration, like
//! a real repository.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use debforge_build::{Collaborators, Orchestrator};
use debforge_config::Config;
use debforge_core::{
    AvailablePackage, BuildEnvironment, BuildMode, DependencySource, EnvironmentStatus,
    PackageId, PackageIndex, PackagingSteps, PolicyGate, Publisher, StepOutput, StepRequest,
    UpstreamRegistry, UpstreamSource, Verdict,
};
use tempfile::TempDir;

pub fn id(name: &str) -> PackageId {
    PackageId::new(name).unwrap()
}

pub fn ids(names: &[&str]) -> Vec<PackageId> {
    names.iter().map(|n| id(n)).collect()
}

#[derive(Clone, Default)]
pub struct MockWorld {
    /// Operations performed, e.g. `build:a` or `regenerate_index`
    operations: Arc<Mutex<Vec<String>>>,
    /// `step:package` keys that fail with the given exit status
    failures: Arc<Mutex<HashMap<String, i32>>>,
    /// Managed packages and their declared build dependencies
    managed: Arc<Mutex<BTreeMap<PackageId, Vec<PackageId>>>>,
    /// Dependencies found in the prepared source, when they differ
    derived: Arc<Mutex<HashMap<PackageId, Vec<PackageId>>>>,
    /// Visible index
    index: Arc<Mutex<BTreeMap<PackageId, String>>>,
    /// Published but not yet indexed
    published: Arc<Mutex<Vec<PackageId>>>,
    retired: Arc<Mutex<HashMap<PackageId, String>>>,
    snapshot_denied: Arc<Mutex<HashSet<PackageId>>>,
    unregistered: Arc<Mutex<HashSet<PackageId>>>,
    missing_tools: Arc<Mutex<Vec<String>>>,
    environment_ready: Arc<Mutex<bool>>,
    environment_creatable: Arc<Mutex<bool>>,
    build_delay: Arc<Mutex<Option<Duration>>>,
    /// Set this signal when the named package is built
    interrupt_on: Arc<Mutex<Option<(PackageId, Arc<AtomicBool>)>>>,
    /// Make publishing fail
    publish_fails: Arc<Mutex<bool>>,
    /// Report artifacts explicitly instead of leaving them to be collected
    report_artifacts: Arc<Mutex<bool>>,
}

impl MockWorld {
    pub fn new() -> Self {
        let world = Self::default();
        *world.environment_ready.lock().unwrap() = true;
        world
    }

    pub fn package(self, name: &str, deps: &[&str]) -> Self {
        self.managed.lock().unwrap().insert(id(name), ids(deps));
        self
    }

    pub fn available(self, name: &str, version: &str) -> Self {
        self.index.lock().unwrap().insert(id(name), version.to_string());
        self
    }

    pub fn derives(self, name: &str, deps: &[&str]) -> Self {
        self.derived.lock().unwrap().insert(id(name), ids(deps));
        self
    }

    pub fn fail(&self, step: &str, package: &str, status: i32) {
        self.failures.lock().unwrap().insert(format!("{step}:{package}"), status);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn retire(&self, package: &str, reason: &str) {
        self.retired.lock().unwrap().insert(id(package), reason.to_string());
    }

    pub fn deny_snapshot(&self, package: &str) {
        self.snapshot_denied.lock().unwrap().insert(id(package));
    }

    pub fn unregister(&self, package: &str) {
        self.unregistered.lock().unwrap().insert(id(package));
    }

    pub fn set_missing_tools(&self, tools: &[&str]) {
        *self.missing_tools.lock().unwrap() = tools.iter().map(|t| t.to_string()).collect();
    }

    pub fn set_environment(&self, ready: bool, creatable: bool) {
        *self.environment_ready.lock().unwrap() = ready;
        *self.environment_creatable.lock().unwrap() = creatable;
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = Some(delay);
    }

    pub fn interrupt_when_building(&self, package: &str, signal: Arc<AtomicBool>) {
        *self.interrupt_on.lock().unwrap() = Some((id(package), signal));
    }

    pub fn set_publish_fails(&self, fails: bool) {
        *self.publish_fails.lock().unwrap() = fails;
    }

    pub fn set_report_artifacts(&self, report: bool) {
        *self.report_artifacts.lock().unwrap() = report;
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.operations().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Packages the build step ran for, in order
    pub fn built(&self) -> Vec<String> {
        self.operations()
            .iter()
            .filter_map(|op| op.strip_prefix("build:").map(str::to_string))
            .collect()
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.index.lock().unwrap().contains_key(&id(name))
    }

    pub fn collaborators(&self) -> Collaborators {
        let world = Arc::new(self.clone());
        Collaborators {
            index: world.clone(),
            source: world.clone(),
            gate: world.clone(),
            registry: world.clone(),
            environment: world.clone(),
            steps: world.clone(),
            publisher: world,
        }
    }

    fn record(&self, operation: String) {
        self.operations.lock().unwrap().push(operation);
    }

    fn failure(&self, step: &str, package: &PackageId) -> Option<i32> {
        self.failures.lock().unwrap().get(&format!("{step}:{package}")).copied()
    }

    fn step(&self, step: &str, request: &StepRequest) -> StepOutput {
        self.record(format!("{step}:{}", request.package));
        match self.failure(step, &request.package) {
            Some(status) => StepOutput::failure(status, format!("{step} of {} failed", request.package)),
            None => StepOutput::ok(),
        }
    }
}

impl PackageIndex for MockWorld {
    fn lookup(&self, id: &PackageId) -> Option<AvailablePackage> {
        self.index
            .lock()
            .unwrap()
            .get(id)
            .map(|version| AvailablePackage { id: id.clone(), version: version.clone() })
    }
}

impl DependencySource for MockWorld {
    fn declared_build_deps(&self, id: &PackageId) -> Option<Vec<PackageId>> {
        self.managed.lock().unwrap().get(id).cloned()
    }
}

impl PolicyGate for MockWorld {
    fn retirement(&self, id: &PackageId) -> Verdict {
        match self.retired.lock().unwrap().get(id) {
            Some(reason) => Verdict::block(reason.clone()),
            None => Verdict::Allow,
        }
    }

    fn eligibility(&self, id: &PackageId, mode: BuildMode) -> Verdict {
        if mode == BuildMode::Snapshot && self.snapshot_denied.lock().unwrap().contains(id) {
            Verdict::block("snapshot builds are not allowed")
        } else {
            Verdict::Allow
        }
    }
}

impl UpstreamRegistry for MockWorld {
    fn resolve(&self, id: &PackageId) -> Option<UpstreamSource> {
        if self.unregistered.lock().unwrap().contains(id) {
            return None;
        }
        Some(UpstreamSource {
            url: format!("https://opendev.org/openstack/{id}"),
            branch: None,
            explicit: false,
        })
    }
}

#[async_trait]
impl BuildEnvironment for MockWorld {
    async fn missing_tools(&self, required: &[String]) -> Vec<String> {
        let missing = self.missing_tools.lock().unwrap().clone();
        required.iter().filter(|t| missing.contains(t)).cloned().collect()
    }

    async fn is_ready(&self, _series: &str) -> bool {
        *self.environment_ready.lock().unwrap()
    }

    fn supports_create(&self) -> bool {
        *self.environment_creatable.lock().unwrap()
    }

    async fn create(&self, series: &str) -> debforge_core::Result<EnvironmentStatus> {
        self.record(format!("create_environment:{series}"));
        *self.environment_ready.lock().unwrap() = true;
        Ok(EnvironmentStatus { series: series.to_string(), created: true, location: None })
    }
}

#[async_trait]
impl PackagingSteps for MockWorld {
    async fn fetch(&self, request: &StepRequest) -> StepOutput {
        self.step("fetch", request)
    }

    async fn prepare(&self, request: &StepRequest) -> StepOutput {
        let output = self.step("prepare", request);
        if !output.success {
            return output;
        }
        let tarball = request.workdir.join(format!("{}_1.0.orig.tar.gz", request.package));
        std::fs::write(&tarball, b"upstream").unwrap();
        output
            .with_data("version", "1.0")
            .with_data("tarball", tarball.display().to_string())
            .with_data("verification", "verified")
    }

    async fn derive_build_deps(&self, request: &StepRequest) -> debforge_core::Result<Vec<PackageId>> {
        self.record(format!("derive:{}", request.package));
        if let Some(derived) = self.derived.lock().unwrap().get(&request.package) {
            return Ok(derived.clone());
        }
        Ok(self.managed.lock().unwrap().get(&request.package).cloned().unwrap_or_default())
    }

    async fn import_and_patch(&self, request: &StepRequest) -> StepOutput {
        self.step("import_patch", request)
    }

    async fn build(&self, request: &StepRequest) -> StepOutput {
        let delay = *self.build_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let interrupt = self.interrupt_on.lock().unwrap().clone();
        if let Some((package, signal)) = interrupt {
            if package == request.package {
                signal.store(true, Ordering::Release);
            }
        }

        let output = self.step("build", request);
        if !output.success {
            return output;
        }
        let deb = write_deb(&request.workdir, &request.package);
        if *self.report_artifacts.lock().unwrap() {
            output.with_artifact(deb)
        } else {
            output
        }
    }
}

#[async_trait]
impl Publisher for MockWorld {
    async fn publish(&self, package: &PackageId, artifacts: &[PathBuf]) -> StepOutput {
        self.record(format!("publish:{package}"));
        if *self.publish_fails.lock().unwrap() {
            return StepOutput::failure(1, "No space left on device");
        }
        assert!(artifacts.iter().all(|a| a.exists()));
        self.published.lock().unwrap().push(package.clone());
        StepOutput::ok()
    }

    async fn regenerate_index(&self) -> StepOutput {
        self.record("regenerate_index".to_string());
        let published: Vec<PackageId> = self.published.lock().unwrap().drain(..).collect();
        let mut index = self.index.lock().unwrap();
        for package in published {
            index.insert(package, "1.0-1".to_string());
        }
        StepOutput::ok()
    }
}

fn write_deb(workdir: &Path, package: &PackageId) -> PathBuf {
    std::fs::create_dir_all(workdir).unwrap();
    let path = workdir.join(format!("{package}_1.0-1_all.deb"));
    std::fs::write(&path, format!("deb for {package}")).unwrap();
    path
}

/// Configuration rooted in a temporary directory with fast retries
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.workspace = dir.path().join("work");
    config.repository = dir.path().join("repo");
    config.packages = dir.path().join("packages.yaml");
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

pub fn orchestrator(world: &MockWorld, config: Config) -> Orchestrator {
    Orchestrator::new(config, world.collaborators()).unwrap()
}
