//! Build orchestration for debforge
//!
//! This crate runs the per-package phase pipeline, schedules multi-package
//! runs over the dependency graph, persists resumable run state and renders
//! run reports.

pub mod artifact;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graceful_shutdown;
pub mod log;
pub mod orchestrator;
pub mod progress_ui;
pub mod provenance;
pub mod recovery;
pub mod report;
pub mod state;

pub use artifact::{sha256_file, ArtifactCollector};
pub use context::{
    BuildInputs, BuildOptions, BuildRecord, DependencyRecord, PhaseContext, PhasePayload,
    PhaseResult, PrepareRecord, ProvenanceRecord, PublishRecord, ResolvedTarget, StepRecord,
    RECORD_SCHEMA_VERSION,
};
pub use engine::{Collaborators, PhaseEngine};
pub use error::{BuildError, Result};
pub use executor::{
    should_stop, ExecutionContext, ExecutionStats, Executor, ParallelExecutor, SequentialExecutor,
    StopReason,
};
pub use graceful_shutdown::{check_shutdown, setup_signal_handlers, Interrupt, ShutdownManager};
pub use log::PackageLog;
pub use orchestrator::{Orchestrator, SingleBuild};
pub use progress_ui::{
    IndicatifProgressUI, NoOpProgressUI, ProgressEvent, ProgressUI, ProgressUIFactory,
};
pub use provenance::Provenance;
pub use recovery::{retry_with_backoff, RetryConfig};
pub use report::{ReportDocument, ReportGenerator, RunReport, RunSummary};
pub use state::{
    GraphFailure, PackageState, PlannedNode, ResumeMode, RunOptions, RunPlan, RunState,
    RunStateStore,
};
