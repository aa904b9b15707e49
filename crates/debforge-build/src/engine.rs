//! Single-package phase engine
//!
//! Runs the fixed phase pipeline for one package and produces exactly one
//! [`BuildOutcome`]. The first failing phase halts the pipeline, except
//! provenance, whose failure is logged and ignored. Missing dependencies
//! discovered after `prepare` are built by nested invocations of the same
//! engine, guarded by the chain of packages currently being built and a
//! depth limit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use debforge_config::IndexRefresh;
use debforge_core::{
    BuildEnvironment, BuildOutcome, DependencySource, EnvironmentStatus, ExitCode, FailureKind,
    PackageId, PackageIndex, PackagingSteps, Phase, PolicyGate, Publisher, StepOutput,
    StepRequest, UpstreamRegistry,
};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactCollector;
use crate::context::{
    BuildInputs, BuildRecord, DependencyRecord, PhaseContext, PhasePayload, PhaseResult,
    PrepareRecord, ProvenanceRecord, PublishRecord, ResolvedTarget, StepRecord,
};
use crate::log::PackageLog;
use crate::progress_ui::{ProgressEvent, ProgressUI};
use crate::provenance::Provenance;

/// External collaborators used by the engine and the graph builder
#[derive(Clone)]
pub struct Collaborators {
    pub index: Arc<dyn PackageIndex>,
    pub source: Arc<dyn DependencySource>,
    pub gate: Arc<dyn PolicyGate>,
    pub registry: Arc<dyn UpstreamRegistry>,
    pub environment: Arc<dyn BuildEnvironment>,
    pub steps: Arc<dyn PackagingSteps>,
    pub publisher: Arc<dyn Publisher>,
}

/// Nested auto-builds currently running, shared by engine clones
///
/// A dependency missing for several packages at once is built by the first
/// package that asks; the others wait for that outcome.
#[derive(Default)]
struct AutoBuilds {
    in_flight: HashMap<PackageId, watch::Sender<Option<BuildOutcome>>>,
    /// Package to the dependency it is waiting for
    waiting: HashMap<PackageId, PackageId>,
}

impl AutoBuilds {
    /// Packages that would wait on each other if `chain` waited for `dep`
    fn wait_cycle(&self, dep: &PackageId, chain: &[PackageId]) -> Option<Vec<PackageId>> {
        let mut path = vec![dep.clone()];
        let mut current = dep;
        while let Some(next) = self.waiting.get(current) {
            if path.contains(next) {
                return None;
            }
            path.push(next.clone());
            if chain.contains(next) {
                return Some(path);
            }
            current = next;
        }
        None
    }
}

/// How a missing dependency was obtained
enum AutoBuild {
    /// Built by this package
    Built(BuildOutcome),
    /// Built by another package; `None` when that build was abandoned
    Joined(Option<BuildOutcome>),
    /// Published while this package was being prepared
    Available,
    /// Waiting would deadlock with builds running elsewhere
    Cycle(Vec<PackageId>),
}

/// Phase pipeline runner
///
/// Cheap to clone; clones share the repository lock so publication and
/// index regeneration are never concurrent, and they share in-flight
/// auto-builds so a dependency is never built twice at the same time.
#[derive(Clone)]
pub struct PhaseEngine {
    collaborators: Collaborators,
    repo_lock: Arc<Mutex<()>>,
    auto_builds: Arc<Mutex<AutoBuilds>>,
    progress: Option<Arc<dyn ProgressUI>>,
    shutdown: Arc<AtomicBool>,
}

impl PhaseEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            repo_lock: Arc::new(Mutex::new(())),
            auto_builds: Arc::new(Mutex::new(AutoBuilds::default())),
            progress: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressUI>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop at the next phase boundary once `signal` is set
    pub fn with_shutdown_signal(mut self, signal: Arc<AtomicBool>) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Lock guarding every write to the shared repository
    pub fn repo_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.repo_lock)
    }

    /// Run the full pipeline for one package
    pub async fn run(&self, inputs: &BuildInputs) -> BuildOutcome {
        self.run_nested(inputs.clone(), Vec::new()).await
    }

    fn run_nested(&self, inputs: BuildInputs, chain: Vec<PackageId>) -> BoxFuture<'_, BuildOutcome> {
        async move {
            let started = Utc::now();
            let log = PackageLog::new(inputs.log_path());
            let mut chain = chain;
            chain.push(inputs.package.clone());

            info!("Building {} (run {}, depth {})", inputs.package, inputs.run_id, inputs.depth);
            log.line(format!(
                "build of {} started in run {} at depth {}",
                inputs.package, inputs.run_id, inputs.depth
            ));

            let mut context = PhaseContext::default();
            for phase in Phase::ALL {
                if self.shutdown.load(Ordering::Acquire) {
                    log.line(format!("[{phase}] interrupted"));
                    return self.interrupted(&inputs, &context, phase, started);
                }
                if let Some(progress) = &self.progress {
                    progress.update(&ProgressEvent::PhaseStarted {
                        package: inputs.package.clone(),
                        phase,
                    });
                }

                let result = self.execute_phase(phase, &inputs, &context, &chain, &log).await;
                if result.success {
                    debug!("{}: phase {} ok", inputs.package, phase);
                    if result.message.is_empty() {
                        log.line(format!("[{phase}] ok"));
                    } else {
                        log.line(format!("[{phase}] ok: {}", result.message));
                    }
                    context.merge(result);
                } else if phase == Phase::Provenance {
                    warn!("{}: provenance not recorded: {}", inputs.package, result.message);
                    log.line(format!("[{phase}] warning: {}", result.message));
                } else {
                    warn!("{}: phase {} failed: {}", inputs.package, phase, result.message);
                    log.line(format!(
                        "[{phase}] failed with {}: {}",
                        result.exit_code, result.message
                    ));
                    return self.failed(&inputs, &context, result, started);
                }
            }

            let mut outcome = BuildOutcome::succeeded(inputs.package.clone(), started);
            outcome.artifacts = context.build.map(|b| b.artifacts).unwrap_or_default();
            outcome.provenance = context.provenance.map(|p| p.path);
            outcome.version = context.prepare.and_then(|p| p.version);
            outcome.mode = context.target.map(|t| t.mode);
            info!("Built {} with {} artifacts", inputs.package, outcome.artifacts.len());
            outcome
        }
        .boxed()
    }

    async fn execute_phase(
        &self,
        phase: Phase,
        inputs: &BuildInputs,
        context: &PhaseContext,
        chain: &[PackageId],
        log: &PackageLog,
    ) -> PhaseResult {
        match phase {
            Phase::ResolveType => self.resolve_type(inputs),
            Phase::RetirementCheck => self.retirement_check(inputs),
            Phase::RegistryResolution => self.registry_resolution(inputs),
            Phase::PolicyCheck => self.policy_check(inputs, context, log),
            Phase::EnvironmentPreparation => self.prepare_environment(inputs).await,
            Phase::Fetch => self.fetch(inputs, context, log).await,
            Phase::Prepare => self.prepare(inputs, context, log).await,
            Phase::ValidateDependencies => {
                self.validate_dependencies(inputs, context, chain, log).await
            }
            Phase::ImportAndPatch => self.import_and_patch(inputs, context, log).await,
            Phase::Build => self.build(inputs, context, log).await,
            Phase::VerifyAndPublish => self.verify_and_publish(inputs, context).await,
            Phase::Provenance => self.record_provenance(inputs, context).await,
            Phase::Report => PhaseResult::ok(phase, PhasePayload::None),
        }
    }

    fn resolve_type(&self, inputs: &BuildInputs) -> PhaseResult {
        let phase = Phase::ResolveType;
        if inputs.series.trim().is_empty() {
            return PhaseResult::fail(phase, ExitCode::ConfigError, "no target series configured");
        }
        let mode = inputs
            .mode
            .or_else(|| self.collaborators.source.mode(&inputs.package))
            .unwrap_or(inputs.options.default_mode);
        PhaseResult::ok(
            phase,
            PhasePayload::Target(ResolvedTarget { mode, series: inputs.series.clone() }),
        )
        .with_message(format!("{mode} for {}", inputs.series))
    }

    fn retirement_check(&self, inputs: &BuildInputs) -> PhaseResult {
        let phase = Phase::RetirementCheck;
        let verdict = self.collaborators.gate.retirement(&inputs.package);
        if let Some(reason) = verdict.reason() {
            if !inputs.options.include_retired {
                return PhaseResult::fail(
                    phase,
                    ExitCode::RetiredProject,
                    format!("{} is retired: {reason}", inputs.package),
                );
            }
            let message = format!("retired ({reason}), building anyway");
            return PhaseResult::ok(phase, PhasePayload::Retirement { verdict })
                .with_message(message);
        }
        PhaseResult::ok(phase, PhasePayload::Retirement { verdict })
    }

    fn registry_resolution(&self, inputs: &BuildInputs) -> PhaseResult {
        let phase = Phase::RegistryResolution;
        match self.collaborators.registry.resolve(&inputs.package) {
            Some(upstream) => {
                let message = upstream.url.clone();
                PhaseResult::ok(phase, PhasePayload::Upstream(upstream)).with_message(message)
            }
            None => PhaseResult::fail(
                phase,
                ExitCode::RegistryError,
                format!("no registry entry or default rule applies to {}", inputs.package),
            ),
        }
    }

    fn policy_check(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::PolicyCheck;
        let verdict = self.collaborators.gate.eligibility(&inputs.package, context.mode());
        if let Some(reason) = verdict.reason() {
            if !inputs.options.force {
                return PhaseResult::fail(
                    phase,
                    ExitCode::PolicyBlocked,
                    format!("{} may not be built as {}: {reason}", inputs.package, context.mode()),
                );
            }
            warn!("{}: policy override with force: {}", inputs.package, reason);
            log.line(format!("[{phase}] policy blocked ({reason}), continuing with force"));
        }
        PhaseResult::ok(phase, PhasePayload::Policy { verdict })
    }

    async fn prepare_environment(&self, inputs: &BuildInputs) -> PhaseResult {
        let phase = Phase::EnvironmentPreparation;
        let environment = &self.collaborators.environment;

        let missing = environment.missing_tools(&inputs.options.required_tools).await;
        if !missing.is_empty() {
            return PhaseResult::fail(
                phase,
                ExitCode::ToolMissing,
                format!("required tools not found: {}", missing.join(", ")),
            );
        }

        if environment.is_ready(&inputs.series).await {
            let status =
                EnvironmentStatus { series: inputs.series.clone(), created: false, location: None };
            return PhaseResult::ok(phase, PhasePayload::Environment(status));
        }

        if !environment.supports_create() {
            return PhaseResult::fail_with(
                phase,
                ExitCode::ToolMissing,
                FailureKind::Environment,
                format!("build environment for {} is not ready", inputs.series),
            );
        }

        info!("Creating build environment for {}", inputs.series);
        match environment.create(&inputs.series).await {
            Ok(status) => PhaseResult::ok(phase, PhasePayload::Environment(status))
                .with_message(format!("created environment for {}", inputs.series)),
            Err(e) => PhaseResult::fail_with(
                phase,
                ExitCode::ToolMissing,
                FailureKind::Environment,
                format!("cannot create build environment for {}: {e}", inputs.series),
            ),
        }
    }

    async fn fetch(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::Fetch;
        let workdir = inputs.workdir();
        if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
            return PhaseResult::fail(
                phase,
                ExitCode::FetchFailed,
                format!("cannot create {}: {e}", workdir.display()),
            );
        }

        let output = self.collaborators.steps.fetch(&request(inputs, context)).await;
        log.block("fetch output", &output.message);
        if !output.success {
            return step_failure(phase, ExitCode::FetchFailed, "fetch", &output);
        }
        PhaseResult::ok(phase, PhasePayload::Fetch(output.into()))
    }

    async fn prepare(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::Prepare;
        let output = self.collaborators.steps.prepare(&request(inputs, context)).await;
        log.block("prepare output", &output.message);
        if !output.success {
            return step_failure(phase, ExitCode::FetchFailed, "prepare", &output);
        }

        let record = PrepareRecord {
            version: output.data.get("version").cloned(),
            tarball: output.data.get("tarball").map(PathBuf::from),
            verification: output.data.get("verification").cloned(),
            step: output.into(),
        };
        let message = record.version.clone().unwrap_or_default();
        PhaseResult::ok(phase, PhasePayload::Prepare(record)).with_message(message)
    }

    async fn validate_dependencies(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        chain: &[PackageId],
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::ValidateDependencies;
        let derived = match self.collaborators.steps.derive_build_deps(&request(inputs, context)).await
        {
            Ok(derived) => derived,
            Err(e) => {
                return PhaseResult::fail(
                    phase,
                    e.exit_code(),
                    format!("cannot derive build dependencies: {e}"),
                );
            }
        };

        let mut record = DependencyRecord {
            derived: Vec::new(),
            assumed: Vec::new(),
            satisfied_by_index: Vec::new(),
            auto_built: Vec::new(),
        };
        let mut missing = Vec::new();
        for dep in derived {
            if dep == inputs.package || record.derived.contains(&dep) {
                continue;
            }
            record.derived.push(dep.clone());
            if inputs.assumed_deps.contains(&dep) {
                record.assumed.push(dep);
            } else if self.collaborators.index.lookup(&dep).is_some() {
                record.satisfied_by_index.push(dep);
            } else {
                missing.push(dep);
            }
        }

        if missing.is_empty() {
            return PhaseResult::ok(phase, PhasePayload::Dependencies(record));
        }

        let unbuildable: Vec<&PackageId> = missing
            .iter()
            .filter(|dep| self.collaborators.source.declared_build_deps(dep).is_none())
            .collect();
        if !inputs.options.auto_build || !unbuildable.is_empty() {
            let listed = if unbuildable.is_empty() { missing.iter().collect() } else { unbuildable };
            return PhaseResult::fail(
                phase,
                ExitCode::MissingPackages,
                format!("missing build dependencies: {}", join_ids(listed)),
            );
        }

        for dep in missing {
            if let Some(position) = chain.iter().position(|id| *id == dep) {
                let mut cycle: Vec<&PackageId> = chain[position..].iter().collect();
                cycle.push(&dep);
                return PhaseResult::fail(
                    phase,
                    ExitCode::CycleDetected,
                    format!("dependency cycle: {}", join_ids_with(cycle, " -> ")),
                );
            }
            if inputs.depth >= inputs.options.max_auto_build_depth {
                return PhaseResult::fail(
                    phase,
                    ExitCode::MissingPackages,
                    format!(
                        "auto-build depth limit {} reached before building {dep}",
                        inputs.options.max_auto_build_depth
                    ),
                );
            }

            info!("{}: auto-building missing dependency {}", inputs.package, dep);
            log.line(format!("[{phase}] auto-building missing dependency {dep}"));
            let child = match self.auto_build(inputs, &dep, chain).await {
                AutoBuild::Built(child) => child,
                AutoBuild::Joined(Some(child)) if child.success => {
                    log.line(format!("[{phase}] {dep} was built by another package"));
                    record.satisfied_by_index.push(dep);
                    continue;
                }
                AutoBuild::Joined(Some(child)) => child,
                AutoBuild::Joined(None) => {
                    return PhaseResult::fail_with(
                        phase,
                        ExitCode::MissingPackages,
                        FailureKind::MissingDep,
                        format!("dependency {dep} could not be built: its build was abandoned"),
                    );
                }
                AutoBuild::Available => {
                    log.line(format!("[{phase}] {dep} became available"));
                    record.satisfied_by_index.push(dep);
                    continue;
                }
                AutoBuild::Cycle(cycle) => {
                    let mut cycle: Vec<&PackageId> = cycle.iter().collect();
                    cycle.insert(0, &inputs.package);
                    return PhaseResult::fail(
                        phase,
                        ExitCode::CycleDetected,
                        format!("dependency cycle: {}", join_ids_with(cycle, " -> ")),
                    );
                }
            };
            if !child.success {
                let kind = if child.is_interrupted() {
                    FailureKind::Interrupted
                } else {
                    FailureKind::MissingDep
                };
                return PhaseResult::fail_with(
                    phase,
                    child.exit_code,
                    kind,
                    format!(
                        "dependency {dep} could not be built: {}",
                        child.error.unwrap_or_default()
                    ),
                );
            }
            log.line(format!("[{phase}] dependency {dep} built"));
            record.auto_built.push(dep);
        }

        if let Err(e) = self.collaborators.index.refresh() {
            warn!("Index refresh after auto-build failed: {}", e);
        }
        let message = format!("auto-built {}", join_ids(record.auto_built.iter().collect()));
        PhaseResult::ok(phase, PhasePayload::Dependencies(record)).with_message(message)
    }

    /// Build `dep` for `inputs`, or wait for a build of it already running
    async fn auto_build(&self, inputs: &BuildInputs, dep: &PackageId, chain: &[PackageId]) -> AutoBuild {
        let requester = inputs.package.clone();
        let joined = {
            let mut builds = self.auto_builds.lock().await;
            match builds.in_flight.get(dep) {
                Some(sender) => {
                    if let Some(cycle) = builds.wait_cycle(dep, chain) {
                        return AutoBuild::Cycle(cycle);
                    }
                    let receiver = sender.subscribe();
                    builds.waiting.insert(requester.clone(), dep.clone());
                    Some(receiver)
                }
                None if self.collaborators.index.lookup(dep).is_some() => {
                    return AutoBuild::Available;
                }
                None => {
                    let (sender, _) = watch::channel(None);
                    builds.in_flight.insert(dep.clone(), sender);
                    builds.waiting.insert(requester.clone(), dep.clone());
                    None
                }
            }
        };

        let result = match joined {
            Some(mut receiver) => {
                debug!("{}: waiting for the running build of {}", requester, dep);
                let outcome = match receiver.wait_for(Option::is_some).await {
                    Ok(outcome) => outcome.clone(),
                    Err(_) => None,
                };
                AutoBuild::Joined(outcome)
            }
            None => {
                let outcome =
                    self.run_nested(inputs.for_dependency(dep.clone()), chain.to_vec()).await;
                if let Some(sender) = self.auto_builds.lock().await.in_flight.remove(dep) {
                    sender.send_replace(Some(outcome.clone()));
                }
                AutoBuild::Built(outcome)
            }
        };
        self.auto_builds.lock().await.waiting.remove(&requester);
        result
    }

    async fn import_and_patch(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::ImportAndPatch;
        let output = self.collaborators.steps.import_and_patch(&request(inputs, context)).await;
        log.block("import-and-patch output", &output.message);
        if !output.success {
            return step_failure(phase, ExitCode::PatchFailed, "import and patch", &output);
        }
        PhaseResult::ok(phase, PhasePayload::Patch(StepRecord::from(output)))
    }

    async fn build(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        log: &PackageLog,
    ) -> PhaseResult {
        let phase = Phase::Build;
        let output = self.collaborators.steps.build(&request(inputs, context)).await;
        log.block("build output", &output.message);
        if !output.success {
            return PhaseResult::fail(
                phase,
                ExitCode::BuildFailed,
                format!("build tool exited with status {}: {}", output.exit_code, output.message),
            );
        }

        let collected = if output.artifacts.is_empty() {
            ArtifactCollector::new(inputs.workdir()).collect()
        } else {
            ArtifactCollector::describe_all(&output.artifacts)
        };
        let artifacts = match collected {
            Ok(artifacts) => artifacts,
            Err(e) => return PhaseResult::fail(phase, ExitCode::BuildFailed, e.to_string()),
        };
        if artifacts.is_empty() {
            return PhaseResult::fail(
                phase,
                ExitCode::BuildFailed,
                format!("build succeeded but produced no artifacts in {}", inputs.workdir().display()),
            );
        }

        let message = format!("{} artifacts", artifacts.len());
        PhaseResult::ok(
            phase,
            PhasePayload::Build(BuildRecord { tool_exit_code: output.exit_code, artifacts }),
        )
        .with_message(message)
    }

    async fn verify_and_publish(&self, inputs: &BuildInputs, context: &PhaseContext) -> PhaseResult {
        let phase = Phase::VerifyAndPublish;
        let paths: Vec<PathBuf> = context
            .build
            .as_ref()
            .map(|b| b.artifacts.iter().map(|a| a.path.clone()).collect())
            .unwrap_or_default();

        if let Some(gone) = paths.iter().find(|p| !p.exists()) {
            return publish_failure(format!("artifact {} disappeared before publishing", gone.display()));
        }

        let regenerate = inputs.options.index_refresh == IndexRefresh::PerPackage;
        {
            let _guard = self.repo_lock.lock().await;
            let output = self.collaborators.publisher.publish(&inputs.package, &paths).await;
            if !output.success {
                return publish_failure(format!(
                    "repository write failed (status {}): {}",
                    output.exit_code, output.message
                ));
            }
            if regenerate {
                let output = self.collaborators.publisher.regenerate_index().await;
                if !output.success {
                    return publish_failure(format!(
                        "index regeneration failed (status {}): {}",
                        output.exit_code, output.message
                    ));
                }
            }
        }

        if regenerate {
            if let Err(e) = self.collaborators.index.refresh() {
                warn!("Index refresh after publishing {} failed: {}", inputs.package, e);
            }
        }

        let message = format!("published {} files", paths.len());
        PhaseResult::ok(
            phase,
            PhasePayload::Publish(PublishRecord { published: paths, index_regenerated: regenerate }),
        )
        .with_message(message)
    }

    async fn record_provenance(&self, inputs: &BuildInputs, context: &PhaseContext) -> PhaseResult {
        let phase = Phase::Provenance;
        let path = inputs.provenance_path();
        match Provenance::from_context(inputs, context).write(&path).await {
            Ok(()) => PhaseResult::ok(phase, PhasePayload::Provenance(ProvenanceRecord { path })),
            Err(e) => PhaseResult::fail_with(
                phase,
                ExitCode::BuildFailed,
                FailureKind::Unknown,
                format!("cannot write {}: {e}", path.display()),
            ),
        }
    }

    fn failed(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        result: PhaseResult,
        started: DateTime<Utc>,
    ) -> BuildOutcome {
        let mut outcome = BuildOutcome::failed(
            inputs.package.clone(),
            result.phase,
            result.exit_code,
            result.failure_kind.unwrap_or(FailureKind::Unknown),
            result.message,
            started,
        );
        outcome.version = context.version().map(str::to_string);
        outcome.mode = context.target.as_ref().map(|t| t.mode);
        outcome
    }

    fn interrupted(
        &self,
        inputs: &BuildInputs,
        context: &PhaseContext,
        phase: Phase,
        started: DateTime<Utc>,
    ) -> BuildOutcome {
        info!("{}: interrupted before {}", inputs.package, phase);
        let result = PhaseResult::fail_with(
            phase,
            ExitCode::PartialFailure,
            FailureKind::Interrupted,
            format!("interrupted before {phase}"),
        );
        self.failed(inputs, context, result, started)
    }
}

fn request(inputs: &BuildInputs, context: &PhaseContext) -> StepRequest {
    StepRequest {
        package: inputs.package.clone(),
        mode: context.mode(),
        series: inputs.series.clone(),
        workdir: inputs.workdir(),
        upstream: context.upstream.clone(),
        version: context.version().map(str::to_string),
        binary: inputs.options.binary,
        data: context.step_data(),
    }
}

fn step_failure(phase: Phase, exit_code: ExitCode, step: &str, output: &StepOutput) -> PhaseResult {
    PhaseResult::fail(
        phase,
        exit_code,
        format!("{step} failed (status {}): {}", output.exit_code, output.message),
    )
}

fn publish_failure(message: String) -> PhaseResult {
    PhaseResult::fail_with(
        Phase::VerifyAndPublish,
        ExitCode::BuildFailed,
        FailureKind::PublishFailed,
        message,
    )
}

fn join_ids(ids: Vec<&PackageId>) -> String {
    join_ids_with(ids, ", ")
}

fn join_ids_with(ids: Vec<&PackageId>, separator: &str) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(separator)
}
