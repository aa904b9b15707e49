//! Entry points: graph planning, single-package builds and multi-package runs

use std::path::PathBuf;
use std::sync::Arc;

use debforge_config::Config;
use debforge_core::{BuildMode, BuildOutcome, NodeStatus, PackageId};
use debforge_graph::{DependencyGraph, GraphBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::{BuildInputs, BuildOptions};
use crate::engine::{Collaborators, PhaseEngine};
use crate::error::{BuildError, Result};
use crate::executor::{
    ExecutionContext, ExecutionStats, Executor, ParallelExecutor, SequentialExecutor, StopReason,
};
use crate::graceful_shutdown::{check_shutdown, ShutdownManager};
use crate::progress_ui::{ProgressEvent, ProgressUI, ProgressUIFactory};
use crate::recovery::RetryConfig;
use crate::report::{ReportGenerator, RunReport};
use crate::state::{
    write_atomic, GraphFailure, ResumeMode, RunOptions, RunPlan, RunState, RunStateStore,
};

const OUTCOME_FILE: &str = "outcome.json";

/// Result of a single-package build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleBuild {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub outcome: BuildOutcome,
}

/// Main build orchestrator
pub struct Orchestrator {
    config: Config,
    collaborators: Collaborators,
    store: RunStateStore,
    retry: RetryConfig,
    force_rebuild: Vec<PackageId>,
    progress: Arc<dyn ProgressUI>,
    shutdown_manager: Arc<ShutdownManager>,
}

impl Orchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        let force_rebuild = config
            .build
            .force_rebuild
            .iter()
            .map(PackageId::new)
            .collect::<debforge_core::Result<Vec<_>>>()?;
        let retry = RetryConfig::from(&config.retry);
        let store = RunStateStore::new(config.runs_dir(), retry.clone());

        Ok(Self {
            config,
            collaborators,
            store,
            retry,
            force_rebuild,
            progress: ProgressUIFactory::create_noop(),
            shutdown_manager: Arc::new(ShutdownManager::new()),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressUI>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_shutdown_manager(mut self, manager: Arc<ShutdownManager>) -> Self {
        self.shutdown_manager = manager;
        self
    }

    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        Arc::clone(&self.shutdown_manager)
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn engine(&self) -> PhaseEngine {
        PhaseEngine::new(self.collaborators.clone())
            .with_progress(Arc::clone(&self.progress))
            .with_shutdown_signal(self.shutdown_manager.shutdown_signal())
    }

    fn execution_context(&self, options: BuildOptions) -> ExecutionContext {
        ExecutionContext {
            engine: self.engine(),
            store: self.store.clone(),
            series: self.config.series.clone(),
            options,
            retry: self.retry.clone(),
            progress: Arc::clone(&self.progress),
            shutdown: self.shutdown_manager.shutdown_signal(),
        }
    }

    /// Resolve the dependency graph of `roots`
    pub fn plan(&self, roots: &[PackageId]) -> Result<DependencyGraph> {
        let graph = GraphBuilder::new(
            self.collaborators.index.as_ref(),
            self.collaborators.source.as_ref(),
        )
        .with_policy(self.collaborators.gate.as_ref())
        .force_rebuild(self.force_rebuild.iter().cloned())
        .include_retired(self.config.build.include_retired)
        .default_mode(self.config.default_mode)
        .build(roots)?;
        Ok(graph)
    }

    /// Build one package, and any missing dependencies, in a fresh run directory
    pub async fn build_package(
        &self,
        package: PackageId,
        mode: Option<BuildMode>,
        force: bool,
    ) -> Result<SingleBuild> {
        let run_id = RunStateStore::new_run_id();
        let run_dir = self.store.run_dir(&run_id);
        let mut options = BuildOptions::from_config(&self.config, self.config.index_refresh.single);
        options.force = force;

        let inputs = BuildInputs::new(
            package.clone(),
            self.config.series.clone(),
            run_id.clone(),
            run_dir.clone(),
            options.clone(),
        )
        .with_mode(mode);

        info!("Single build of {} in run {}", package, run_id);
        self.progress.update(&ProgressEvent::RunStarted { total: 1 });
        self.progress.update(&ProgressEvent::PackageStarted { package: package.clone() });
        let context = self.execution_context(options);
        let outcome = context.engine.run(&inputs).await;

        if outcome.success && context.options.index_refresh == debforge_config::IndexRefresh::PerBatch {
            context.regenerate_index().await?;
        }

        let status = if outcome.success { NodeStatus::Succeeded } else { NodeStatus::Failed };
        self.progress.update(&ProgressEvent::PackageFinished {
            package,
            status,
            message: outcome.error.clone(),
        });
        self.progress.update(&ProgressEvent::RunFinished {
            succeeded: usize::from(outcome.success),
            failed: usize::from(!outcome.success),
            skipped: 0,
        });
        self.progress.finish();

        write_atomic(&run_dir.join(OUTCOME_FILE), serde_json::to_string_pretty(&outcome)?.as_bytes())
            .await?;
        Ok(SingleBuild { run_id, run_dir, outcome })
    }

    /// Plan and run a multi-package build
    ///
    /// A graph failure still produces a run and a report, so the missing
    /// packages or cycle are recorded alongside other runs.
    pub async fn run(
        &self,
        roots: Vec<PackageId>,
        options: RunOptions,
        run_id: Option<String>,
    ) -> Result<RunReport> {
        options.validate()?;
        let run_id = run_id.unwrap_or_else(RunStateStore::new_run_id);

        let planned = self.plan(&roots).and_then(|graph| {
            let plan = RunPlan::from_graph(&graph)?;
            Ok((graph, plan))
        });
        let (graph, plan) = match planned {
            Ok(planned) => planned,
            Err(BuildError::Graph(error)) => {
                warn!("Planning run {} failed: {}", run_id, error);
                let mut state =
                    self.store.create(Some(run_id), roots, options, RunPlan::default()).await?;
                state.graph_failure = Some(GraphFailure::from(&error));
                return self.finish_run(&mut state, None).await;
            }
            Err(other) => return Err(other),
        };

        let mut state = self.store.create(Some(run_id), roots, options, plan).await?;
        let mut blocked = false;
        for node in graph.blocked() {
            if let Some(entry) = state.packages.get_mut(&node.id) {
                entry.status = NodeStatus::SkippedBlocked;
                entry.message = node.reason.clone();
                blocked = true;
            }
        }
        if blocked {
            self.store.save(&state).await?;
        }

        info!(
            "Run {}: {} packages in {} batches, {} external, {} excluded",
            state.run_id,
            state.plan.nodes.len(),
            state.plan.batches.len(),
            state.plan.external.len(),
            state.plan.excluded.len()
        );
        self.execute(&mut state).await
    }

    /// Continue a stored run
    pub async fn resume(
        &self,
        run_id: Option<&str>,
        mode: ResumeMode,
        concurrency: Option<usize>,
    ) -> Result<RunReport> {
        let mut state = match run_id {
            Some(run_id) => self.store.load(run_id).await?,
            None => self.store.latest().await?,
        };
        info!("Resuming run {} ({:?})", state.run_id, mode);

        if state.graph_failure.is_some() {
            warn!("Run {} never got past planning, nothing to resume", state.run_id);
            return ReportGenerator::write(&state, &self.store.run_dir(&state.run_id)).await;
        }
        if let Some(concurrency) = concurrency {
            state.options.concurrency = concurrency.max(1);
        }

        let requeued = state.prepare_resume(mode);
        if !requeued.is_empty() {
            info!("Re-queued {} previously failed packages", requeued.len());
        }
        self.store.save(&state).await?;
        self.execute(&mut state).await
    }

    /// Render the reports of a stored run again
    pub async fn report(&self, run_id: Option<&str>) -> Result<RunReport> {
        let state = match run_id {
            Some(run_id) => self.store.load(run_id).await?,
            None => self.store.latest().await?,
        };
        ReportGenerator::write(&state, &self.store.run_dir(&state.run_id)).await
    }

    async fn execute(&self, state: &mut RunState) -> Result<RunReport> {
        check_shutdown(&self.shutdown_manager.shutdown_signal())?;
        let options = BuildOptions::from_config(&self.config, self.config.index_refresh.run);
        let context = self.execution_context(options);
        let executor: Box<dyn Executor> = if state.options.is_parallel() {
            Box::new(ParallelExecutor::new(context, state.options.concurrency))
        } else {
            Box::new(SequentialExecutor::new(context))
        };

        self.progress.update(&ProgressEvent::RunStarted { total: state.packages.len() });
        let stats = executor.execute(state).await?;
        self.finish_run(state, Some(stats)).await
    }

    async fn finish_run(
        &self,
        state: &mut RunState,
        stats: Option<ExecutionStats>,
    ) -> Result<RunReport> {
        let summary = ReportGenerator::summarize(state);
        self.progress.update(&ProgressEvent::RunFinished {
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped + summary.blocked,
        });
        self.progress.finish();

        let interrupted = stats.as_ref().and_then(|s| s.stopped) == Some(StopReason::Interrupted);
        if interrupted {
            // Left open so a resume continues where this one stopped
            warn!("Run {} interrupted; resume with the same run id", state.run_id);
            state.summary = Some(summary);
            self.store.save(state).await?;
        } else {
            self.store.finalize(state, summary).await?;
        }

        let report = ReportGenerator::write(state, &self.store.run_dir(&state.run_id)).await?;
        info!("Run {} finished with {}", state.run_id, report.exit_code());
        Ok(report)
    }
}
