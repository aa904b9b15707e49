//! Durable run state
//!
//! One JSON document per run at `<runs>/<run-id>/state/run-state.json`,
//! rewritten atomically after every package transition. Only the scheduler
//! coordinator writes it, so a run has a single writer; the store's lock
//! additionally serializes writes from concurrent callers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use debforge_config::RunConfig;
use debforge_core::{BuildMode, BuildOutcome, ExitCode, FailureKind, NodeStatus, PackageId};
use debforge_graph::{Batch, DependencyGraph, ExcludedNode, GraphError, MissingPackage};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BuildError, Result};
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::report::RunSummary;

const STATE_DIR: &str = "state";
const STATE_FILE: &str = "run-state.json";

/// Scheduling options of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Concurrent phase engine invocations; 1 selects the sequential executor
    pub concurrency: usize,
    pub keep_going: bool,
    /// Stop dispatching after this many failures; 0 disables the limit
    pub max_failures: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { concurrency: 1, keep_going: false, max_failures: 0 }
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            keep_going: config.keep_going,
            max_failures: config.max_failures,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BuildError::invalid_options("concurrency must be at least 1"));
        }
        Ok(())
    }

    pub fn is_parallel(&self) -> bool {
        self.concurrency > 1
    }
}

/// How a resumed run treats previously failed packages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeMode {
    /// Keep failed packages failed and do not run them again
    #[default]
    SkipFailed,
    /// Queue failed packages and their skipped dependents again
    RetryFailed,
}

/// One node of the stored build plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNode {
    pub id: PackageId,
    pub mode: BuildMode,
    /// In-graph dependencies
    pub dependencies: Vec<PackageId>,
}

/// The graph as needed by the schedulers, frozen at run creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Nodes in discovery order
    pub nodes: Vec<PlannedNode>,
    pub batches: Vec<Batch>,
    /// Externally-satisfied dependencies with their available version
    pub external: BTreeMap<PackageId, String>,
    pub excluded: Vec<ExcludedNode>,
}

impl RunPlan {
    /// Freeze a resolved graph, computing its batches
    pub fn from_graph(graph: &DependencyGraph) -> std::result::Result<Self, GraphError> {
        let batches = graph.batches()?;
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| PlannedNode {
                id: node.id.clone(),
                mode: node.mode,
                dependencies: graph.dependencies(&node.id).to_vec(),
            })
            .collect();
        Ok(Self {
            nodes,
            batches,
            external: graph.external().clone(),
            excluded: graph.excluded().to_vec(),
        })
    }

    pub fn node(&self, id: &PackageId) -> Option<&PlannedNode> {
        self.nodes.iter().find(|n| n.id == *id)
    }

    /// Build order: batch by batch, discovery order within a batch
    pub fn build_order(&self) -> Vec<PackageId> {
        self.batches.iter().flat_map(|b| b.members.iter().cloned()).collect()
    }
}

/// Why graph construction failed, kept for the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFailure {
    pub exit_code: ExitCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingPackage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<PackageId>,
}

impl From<&GraphError> for GraphFailure {
    fn from(error: &GraphError) -> Self {
        let (missing, cycle) = match error {
            GraphError::MissingPackages { missing } => (missing.clone(), Vec::new()),
            GraphError::Cycle { participants } => (Vec::new(), participants.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        Self { exit_code: error.exit_code(), message: error.to_string(), missing, cycle }
    }
}

/// Per-package entry of the status table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<ExitCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl PackageState {
    fn with_status(status: NodeStatus, message: Option<String>) -> Self {
        Self { status, message, ..Self::default() }
    }

    fn reset(&mut self) {
        let attempts = self.attempts;
        *self = Self { attempts, ..Self::default() };
    }
}

/// Full record of one multi-package run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub roots: Vec<PackageId>,
    pub options: RunOptions,
    pub plan: RunPlan,
    pub packages: BTreeMap<PackageId, PackageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_failure: Option<GraphFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl RunState {
    /// Fresh state with one pending entry per planned node
    pub fn new(run_id: String, roots: Vec<PackageId>, options: RunOptions, plan: RunPlan) -> Self {
        let now = Utc::now();
        let packages = plan
            .nodes
            .iter()
            .map(|node| (node.id.clone(), PackageState::default()))
            .collect();
        Self {
            run_id,
            roots,
            options,
            plan,
            packages,
            graph_failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            summary: None,
        }
    }

    pub fn status(&self, id: &PackageId) -> NodeStatus {
        self.packages.get(id).map(|p| p.status).unwrap_or_default()
    }

    /// Identifiers with the given status, in build order
    pub fn with_status(&self, status: NodeStatus) -> Vec<PackageId> {
        self.plan.build_order().into_iter().filter(|id| self.status(id) == status).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Apply a resume mode, returning the packages queued again
    pub fn prepare_resume(&mut self, mode: ResumeMode) -> Vec<PackageId> {
        let mut requeued = Vec::new();
        for (id, entry) in self.packages.iter_mut() {
            match entry.status {
                NodeStatus::Running | NodeStatus::Ready => entry.status = NodeStatus::Pending,
                NodeStatus::Failed | NodeStatus::SkippedDependencyFailed
                    if mode == ResumeMode::RetryFailed =>
                {
                    entry.reset();
                    requeued.push(id.clone());
                }
                _ => {}
            }
        }
        if !requeued.is_empty() {
            self.completed_at = None;
            self.summary = None;
        }
        requeued
    }

    fn apply_outcome(&mut self, outcome: &BuildOutcome, log_path: Option<PathBuf>) {
        let entry = self.packages.entry(outcome.package.clone()).or_default();
        entry.attempts += 1;
        entry.log_path = log_path;
        entry.started_at = Some(outcome.started_at);
        entry.finished_at = Some(outcome.finished_at);
        entry.duration_secs = Some(outcome.duration_secs());
        entry.version = outcome.version.clone();
        if outcome.success {
            entry.status = NodeStatus::Succeeded;
            entry.failure_kind = None;
            entry.exit_code = Some(ExitCode::Success);
            entry.message = None;
        } else if outcome.is_interrupted() {
            // Interrupted packages restart from scratch on resume
            entry.status = NodeStatus::Pending;
            entry.failure_kind = None;
            entry.exit_code = None;
            entry.message = outcome.error.clone();
        } else {
            entry.status = NodeStatus::Failed;
            entry.failure_kind = outcome.failure_kind;
            entry.exit_code = Some(outcome.exit_code);
            entry.message = outcome.error.clone();
        }
    }
}

/// Reads and writes run state under a runs directory
#[derive(Clone)]
pub struct RunStateStore {
    runs_dir: PathBuf,
    retry: RetryConfig,
    write_lock: Arc<Mutex<()>>,
}

impl RunStateStore {
    pub fn new(runs_dir: impl Into<PathBuf>, retry: RetryConfig) -> Self {
        Self { runs_dir: runs_dir.into(), retry, write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn state_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(STATE_DIR).join(STATE_FILE)
    }

    /// New run identifier, sortable by creation time
    pub fn new_run_id() -> String {
        Utc::now().format("%Y%m%d-%H%M%S-%3f").to_string()
    }

    /// Create and persist a new run
    pub async fn create(
        &self,
        run_id: Option<String>,
        roots: Vec<PackageId>,
        options: RunOptions,
        plan: RunPlan,
    ) -> Result<RunState> {
        let run_id = run_id.unwrap_or_else(Self::new_run_id);
        if self.state_path(&run_id).exists() {
            return Err(BuildError::invalid_options(format!("run {run_id} already exists")));
        }
        let state = RunState::new(run_id, roots, options, plan);
        self.save(&state).await?;
        info!("Created run {} with {} packages", state.run_id, state.packages.len());
        Ok(state)
    }

    /// Load a run by identifier
    ///
    /// Entries left `running` by a crash are demoted to `pending`.
    pub async fn load(&self, run_id: &str) -> Result<RunState> {
        let path = self.state_path(run_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::RunNotFound { run_id: run_id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        let mut state: RunState = serde_json::from_str(&content)
            .map_err(|e| BuildError::StateCorrupt { path: path.clone(), reason: e.to_string() })?;
        for entry in state.packages.values_mut() {
            if matches!(entry.status, NodeStatus::Running | NodeStatus::Ready) {
                entry.status = NodeStatus::Pending;
            }
        }
        debug!("Loaded run {} from {}", state.run_id, path.display());
        Ok(state)
    }

    /// Most recently created run
    pub async fn latest(&self) -> Result<RunState> {
        let mut latest: Option<RunState> = None;
        for run_id in self.list()? {
            match self.load(&run_id).await {
                Ok(state) => {
                    if latest.as_ref().map_or(true, |l| state.created_at > l.created_at) {
                        latest = Some(state);
                    }
                }
                Err(e) => warn!("Ignoring run {}: {}", run_id, e),
            }
        }
        latest.ok_or_else(|| BuildError::NoRunToResume { dir: self.runs_dir.clone() })
    }

    /// Identifiers of every run with a state file, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.state_path(&name).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Record a phase engine outcome and persist immediately
    pub async fn record(
        &self,
        state: &mut RunState,
        outcome: &BuildOutcome,
        log_path: Option<PathBuf>,
    ) -> Result<()> {
        state.apply_outcome(outcome, log_path);
        state.completed_at = None;
        self.save(state).await
    }

    /// Record a status change that did not involve the phase engine
    pub async fn mark(
        &self,
        state: &mut RunState,
        id: &PackageId,
        status: NodeStatus,
        message: Option<String>,
    ) -> Result<()> {
        match state.packages.get_mut(id) {
            Some(entry) => {
                entry.status = status;
                entry.message = message;
                if status == NodeStatus::SkippedDependencyFailed {
                    entry.failure_kind = Some(FailureKind::DependencyFailed);
                }
            }
            None => {
                state.packages.insert(id.clone(), PackageState::with_status(status, message));
            }
        }
        self.save(state).await
    }

    /// Attach the final summary and mark the run complete
    ///
    /// The completion timestamp of a run that was already complete is kept,
    /// so finalizing again reproduces the same document.
    pub async fn finalize(&self, state: &mut RunState, summary: RunSummary) -> Result<()> {
        if state.completed_at.is_none() {
            state.completed_at = Some(Utc::now());
        }
        state.summary = Some(summary);
        self.save(state).await
    }

    /// Persist `state` atomically, retrying transient I/O failures
    pub async fn save(&self, state: &RunState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = state.clone();
        snapshot.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(&snapshot)?;
        let path = self.state_path(&state.run_id);

        retry_with_backoff(
            "save run state",
            || {
                let json = json.clone();
                let path = path.clone();
                async move { write_atomic(&path, json.as_bytes()).await }
            },
            &self.retry,
            None,
        )
        .await
    }
}

/// Write through a temporary file and rename over the target
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
