//! Sequential and parallel schedulers
//!
//! Both executors walk the batch plan in order and share the per-node
//! decision and failure policy below. The parallel executor runs one worker
//! task per package, bounded by a semaphore, and workers report back over a
//! channel; the coordinating task is the only writer of [`RunState`].

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use debforge_config::IndexRefresh;
use debforge_core::{BuildOutcome, ExitCode, FailureKind, NodeStatus, PackageId, Phase};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::{BuildInputs, BuildOptions};
use crate::engine::PhaseEngine;
use crate::error::{BuildError, Result};
use crate::progress_ui::{ProgressEvent, ProgressUI};
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::state::{PlannedNode, RunOptions, RunState, RunStateStore};

/// Why an executor stopped before the end of the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    FailFast,
    MaxFailures,
    Interrupted,
}

/// What one executor invocation did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Phase engine invocations
    pub invoked: usize,
    pub succeeded: usize,
    /// Failures recorded by this invocation
    pub failures: usize,
    /// Failures the run already recorded before this invocation
    pub recorded_failures: usize,
    pub skipped: usize,
    pub stopped: Option<StopReason>,
}

impl ExecutionStats {
    /// Empty stats carrying the failures `state` already records
    pub fn for_run(state: &RunState) -> Self {
        Self { recorded_failures: state.with_status(NodeStatus::Failed).len(), ..Self::default() }
    }
}

/// Scheduler over a stored run
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, state: &mut RunState) -> Result<ExecutionStats>;
}

/// What to do with one node at dispatch time
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Run,
    AlreadySucceeded,
    PreviouslyFailed,
    Blocked,
    DependencyFailed(PackageId),
    DependencyNotBuilt(PackageId),
}

pub(crate) fn decide(state: &RunState, node: &PlannedNode) -> Decision {
    match state.status(&node.id) {
        NodeStatus::Succeeded => return Decision::AlreadySucceeded,
        NodeStatus::Failed => return Decision::PreviouslyFailed,
        NodeStatus::SkippedBlocked => return Decision::Blocked,
        _ => {}
    }
    for dep in &node.dependencies {
        match state.status(dep) {
            NodeStatus::Succeeded => {}
            NodeStatus::Failed | NodeStatus::SkippedBlocked | NodeStatus::SkippedDependencyFailed => {
                return Decision::DependencyFailed(dep.clone());
            }
            _ => return Decision::DependencyNotBuilt(dep.clone()),
        }
    }
    Decision::Run
}

/// Failure policy: fail-fast stops at the first new failure, keep-going
/// once the run holds `max_failures` failures when that is non-zero
///
/// Failures kept from before a resume count towards `max_failures` but do
/// not trigger fail-fast.
pub fn should_stop(options: &RunOptions, stats: &ExecutionStats) -> Option<StopReason> {
    if !options.keep_going {
        return (stats.failures > 0).then_some(StopReason::FailFast);
    }
    let total = stats.recorded_failures + stats.failures;
    if options.max_failures > 0 && total >= options.max_failures {
        return Some(StopReason::MaxFailures);
    }
    None
}

/// Stop before dispatching anything when the run is already over budget
fn stop_before_start(state: &RunState, stats: &mut ExecutionStats) -> bool {
    match should_stop(&state.options, stats) {
        Some(reason) => {
            warn!(
                "Run {} already holds {} failures, nothing dispatched",
                state.run_id, stats.recorded_failures
            );
            stats.stopped = Some(reason);
            true
        }
        None => false,
    }
}

/// Everything an executor needs besides the run state
#[derive(Clone)]
pub struct ExecutionContext {
    pub engine: PhaseEngine,
    pub store: RunStateStore,
    pub series: String,
    pub options: BuildOptions,
    pub retry: RetryConfig,
    pub progress: Arc<dyn ProgressUI>,
    pub shutdown: Arc<AtomicBool>,
}

impl ExecutionContext {
    fn inputs(&self, state: &RunState, node: &PlannedNode) -> BuildInputs {
        let mut assumed = node.dependencies.clone();
        assumed.extend(state.plan.external.keys().cloned());
        BuildInputs::new(
            node.id.clone(),
            self.series.clone(),
            state.run_id.clone(),
            self.store.run_dir(&state.run_id),
            self.options.clone(),
        )
        .with_mode(Some(node.mode))
        .with_assumed_deps(assumed)
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Apply a non-run decision; returns true when a skip was recorded
    async fn apply_skip(
        &self,
        state: &mut RunState,
        node: &PlannedNode,
        decision: &Decision,
    ) -> Result<bool> {
        match decision {
            Decision::DependencyFailed(dep) => {
                let message = format!("dependency {dep} failed or was skipped");
                if state.status(&node.id) != NodeStatus::SkippedDependencyFailed {
                    info!("Skipping {}: {}", node.id, message);
                    self.store
                        .mark(state, &node.id, NodeStatus::SkippedDependencyFailed, Some(message.clone()))
                        .await?;
                }
                self.progress.update(&ProgressEvent::PackageFinished {
                    package: node.id.clone(),
                    status: NodeStatus::SkippedDependencyFailed,
                    message: Some(message),
                });
                Ok(true)
            }
            Decision::DependencyNotBuilt(dep) => {
                warn!("Leaving {} pending: dependency {} was not built", node.id, dep);
                Ok(false)
            }
            Decision::AlreadySucceeded | Decision::PreviouslyFailed | Decision::Blocked => {
                debug!("{}: {:?}, not dispatched", node.id, decision);
                Ok(false)
            }
            Decision::Run => Ok(false),
        }
    }

    async fn start(&self, state: &mut RunState, id: &PackageId) -> Result<()> {
        self.store.mark(state, id, NodeStatus::Running, None).await?;
        self.progress.update(&ProgressEvent::PackageStarted { package: id.clone() });
        Ok(())
    }

    /// Record an outcome and update the tallies
    async fn finish(
        &self,
        state: &mut RunState,
        outcome: &BuildOutcome,
        log_path: PathBuf,
        stats: &mut ExecutionStats,
    ) -> Result<()> {
        self.store.record(state, outcome, Some(log_path)).await?;
        let status = state.status(&outcome.package);
        if outcome.success {
            stats.succeeded += 1;
        } else if !outcome.is_interrupted() {
            stats.failures += 1;
            error!(
                "{} failed in {}: {}",
                outcome.package,
                outcome.failed_phase.map(Phase::name).unwrap_or("worker"),
                outcome.error.as_deref().unwrap_or_default()
            );
        }
        self.progress.update(&ProgressEvent::PackageFinished {
            package: outcome.package.clone(),
            status,
            message: outcome.error.clone(),
        });
        Ok(())
    }

    /// Regenerate the repository index once for a finished batch
    pub(crate) async fn regenerate_index(&self) -> Result<()> {
        let lock = self.engine.repo_lock();
        let _guard = lock.lock().await;
        let publisher = Arc::clone(&self.engine.collaborators().publisher);

        retry_with_backoff(
            "regenerate repository index",
            || {
                let publisher = Arc::clone(&publisher);
                async move {
                    let output = publisher.regenerate_index().await;
                    if output.success {
                        Ok(())
                    } else {
                        Err(BuildError::IndexRegeneration {
                            reason: format!("status {}: {}", output.exit_code, output.message),
                        })
                    }
                }
            },
            &self.retry,
            Some(Arc::clone(&self.shutdown)),
        )
        .await?;

        self.engine.collaborators().index.refresh()?;
        debug!("Repository index regenerated");
        Ok(())
    }
}

/// Runs packages one at a time in batch order
pub struct SequentialExecutor {
    context: ExecutionContext,
}

impl SequentialExecutor {
    pub fn new(context: ExecutionContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    async fn execute(&self, state: &mut RunState) -> Result<ExecutionStats> {
        let ctx = &self.context;
        let per_batch = ctx.options.index_refresh == IndexRefresh::PerBatch;
        let batches = state.plan.batches.clone();
        let mut stats = ExecutionStats::for_run(state);
        if stop_before_start(state, &mut stats) {
            return Ok(stats);
        }

        for batch in &batches {
            ctx.progress.update(&ProgressEvent::BatchStarted {
                index: batch.index,
                batches: batches.len(),
                size: batch.members.len(),
            });
            let mut published = false;

            for id in &batch.members {
                if ctx.interrupted() {
                    stats.stopped = Some(StopReason::Interrupted);
                    break;
                }
                let Some(node) = state.plan.node(id).cloned() else {
                    continue;
                };
                let decision = decide(state, &node);
                if decision != Decision::Run {
                    if ctx.apply_skip(state, &node, &decision).await? {
                        stats.skipped += 1;
                    }
                    continue;
                }

                let inputs = ctx.inputs(state, &node);
                ctx.start(state, id).await?;
                let outcome = ctx.engine.run(&inputs).await;
                stats.invoked += 1;
                published |= outcome.success;
                ctx.finish(state, &outcome, inputs.log_path(), &mut stats).await?;

                if outcome.is_interrupted() {
                    stats.stopped = Some(StopReason::Interrupted);
                    break;
                }
                if let Some(reason) = should_stop(&state.options, &stats) {
                    warn!("Stopping run {}: {:?} after {} failures", state.run_id, reason, stats.failures);
                    stats.stopped = Some(reason);
                    break;
                }
            }

            if per_batch && published {
                ctx.regenerate_index().await?;
            }
            if stats.stopped.is_some() {
                break;
            }
        }

        Ok(stats)
    }
}

enum WorkerEvent {
    Started { package: PackageId },
    Finished { outcome: BuildOutcome, log_path: PathBuf },
    NotStarted { package: PackageId },
}

/// Runs the members of each batch concurrently, one batch at a time
pub struct ParallelExecutor {
    context: ExecutionContext,
    concurrency: usize,
}

impl ParallelExecutor {
    /// Index regeneration is forced to once per batch
    pub fn new(mut context: ExecutionContext, concurrency: usize) -> Self {
        if context.options.index_refresh == IndexRefresh::PerPackage {
            warn!("Per-package index regeneration is not supported in parallel runs, using per-batch");
            context.options.index_refresh = IndexRefresh::PerBatch;
        }
        Self { context, concurrency: concurrency.max(1) }
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        inputs: BuildInputs,
        permits: Arc<Semaphore>,
        halt: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        let engine = self.context.engine.clone();
        let shutdown = Arc::clone(&self.context.shutdown);
        workers.spawn(async move {
            let package = inputs.package.clone();
            let Ok(_permit) = permits.acquire_owned().await else {
                let _ = events.send(WorkerEvent::NotStarted { package });
                return;
            };
            if shutdown.load(Ordering::Acquire) || halt.load(Ordering::Acquire) {
                let _ = events.send(WorkerEvent::NotStarted { package });
                return;
            }

            let _ = events.send(WorkerEvent::Started { package: package.clone() });
            let outcome = match AssertUnwindSafe(engine.run(&inputs)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let mut outcome = BuildOutcome::failed(
                        package,
                        Phase::Report,
                        ExitCode::BuildFailed,
                        FailureKind::Unknown,
                        "build worker panicked",
                        chrono::Utc::now(),
                    );
                    outcome.failed_phase = None;
                    outcome
                }
            };
            let _ = events.send(WorkerEvent::Finished { outcome, log_path: inputs.log_path() });
        });
    }
}

#[async_trait]
impl Executor for ParallelExecutor {
    async fn execute(&self, state: &mut RunState) -> Result<ExecutionStats> {
        let ctx = &self.context;
        let batches = state.plan.batches.clone();
        let mut stats = ExecutionStats::for_run(state);
        if stop_before_start(state, &mut stats) {
            return Ok(stats);
        }
        info!("Running {} batches with {} workers", batches.len(), self.concurrency);

        for batch in &batches {
            if ctx.interrupted() {
                stats.stopped = Some(StopReason::Interrupted);
                break;
            }
            ctx.progress.update(&ProgressEvent::BatchStarted {
                index: batch.index,
                batches: batches.len(),
                size: batch.members.len(),
            });

            // Dependencies live in earlier batches, so every decision for
            // this batch can be made before dispatching any of it.
            let mut runnable = Vec::new();
            for id in &batch.members {
                let Some(node) = state.plan.node(id).cloned() else {
                    continue;
                };
                let decision = decide(state, &node);
                if decision == Decision::Run {
                    runnable.push(ctx.inputs(state, &node));
                } else if ctx.apply_skip(state, &node, &decision).await? {
                    stats.skipped += 1;
                }
            }
            if runnable.is_empty() {
                continue;
            }

            let permits = Arc::new(Semaphore::new(self.concurrency));
            let halt = Arc::new(AtomicBool::new(false));
            let (events, mut receiver) = mpsc::unbounded_channel();
            let mut workers = JoinSet::new();
            for inputs in runnable {
                self.spawn_worker(&mut workers, inputs, Arc::clone(&permits), Arc::clone(&halt), events.clone());
            }
            drop(events);

            let mut published = false;
            let mut interrupted = false;
            while let Some(event) = receiver.recv().await {
                match event {
                    WorkerEvent::Started { package } => ctx.start(state, &package).await?,
                    WorkerEvent::Finished { outcome, log_path } => {
                        stats.invoked += 1;
                        published |= outcome.success;
                        interrupted |= outcome.is_interrupted();
                        ctx.finish(state, &outcome, log_path, &mut stats).await?;
                        if should_stop(&state.options, &stats).is_some() {
                            halt.store(true, Ordering::Release);
                        }
                    }
                    WorkerEvent::NotStarted { package } => {
                        debug!("{} not started in this run", package);
                    }
                }
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Build worker ended abnormally: {}", e);
                }
            }

            if published {
                ctx.regenerate_index().await?;
            }
            if interrupted || ctx.interrupted() {
                stats.stopped = Some(StopReason::Interrupted);
                break;
            }
            if let Some(reason) = should_stop(&state.options, &stats) {
                warn!("Stopping run {}: {:?} after {} failures", state.run_id, reason, stats.failures);
                stats.stopped = Some(reason);
                break;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use debforge_core::BuildMode;
    use debforge_graph::Batch;

    use super::*;
    use crate::state::RunPlan;

    fn id(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn node(name: &str, deps: &[&str]) -> PlannedNode {
        PlannedNode { id: id(name), mode: BuildMode::Release, dependencies: deps.iter().map(|d| id(d)).collect() }
    }

    fn state() -> RunState {
        let plan = RunPlan {
            nodes: vec![node("c", &[]), node("b", &["c"]), node("a", &["b"])],
            batches: vec![
                Batch { index: 0, members: vec![id("c")] },
                Batch { index: 1, members: vec![id("b")] },
                Batch { index: 2, members: vec![id("a")] },
            ],
            ..RunPlan::default()
        };
        RunState::new("r".into(), vec![id("a")], RunOptions::default(), plan)
    }

    #[test]
    fn test_decide() {
        let mut state = state();
        assert_eq!(decide(&state, &node("c", &[])), Decision::Run);
        assert_eq!(decide(&state, &node("b", &["c"])), Decision::DependencyNotBuilt(id("c")));

        state.packages.get_mut(&id("c")).unwrap().status = NodeStatus::Failed;
        assert_eq!(decide(&state, &node("c", &[])), Decision::PreviouslyFailed);
        assert_eq!(decide(&state, &node("b", &["c"])), Decision::DependencyFailed(id("c")));

        state.packages.get_mut(&id("c")).unwrap().status = NodeStatus::Succeeded;
        assert_eq!(decide(&state, &node("c", &[])), Decision::AlreadySucceeded);
        assert_eq!(decide(&state, &node("b", &["c"])), Decision::Run);

        state.packages.get_mut(&id("b")).unwrap().status = NodeStatus::SkippedBlocked;
        assert_eq!(decide(&state, &node("b", &["c"])), Decision::Blocked);
        assert_eq!(decide(&state, &node("a", &["b"])), Decision::DependencyFailed(id("b")));
    }

    fn tally(recorded_failures: usize, failures: usize) -> ExecutionStats {
        ExecutionStats { recorded_failures, failures, ..ExecutionStats::default() }
    }

    #[test]
    fn test_should_stop() {
        let fail_fast = RunOptions { concurrency: 1, keep_going: false, max_failures: 0 };
        assert_eq!(should_stop(&fail_fast, &tally(0, 0)), None);
        assert_eq!(should_stop(&fail_fast, &tally(0, 1)), Some(StopReason::FailFast));
        assert_eq!(should_stop(&fail_fast, &tally(3, 0)), None);

        let keep_going = RunOptions { concurrency: 4, keep_going: true, max_failures: 0 };
        assert_eq!(should_stop(&keep_going, &tally(0, 100)), None);

        let bounded = RunOptions { concurrency: 4, keep_going: true, max_failures: 2 };
        assert_eq!(should_stop(&bounded, &tally(0, 1)), None);
        assert_eq!(should_stop(&bounded, &tally(0, 2)), Some(StopReason::MaxFailures));
        assert_eq!(should_stop(&bounded, &tally(1, 1)), Some(StopReason::MaxFailures));
        assert_eq!(should_stop(&bounded, &tally(2, 0)), Some(StopReason::MaxFailures));
    }
}
