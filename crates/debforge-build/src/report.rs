//! Run summary reports
//!
//! Reports are rendered only from [`RunState`], never from live scheduler
//! data, so rendering a finished run again produces identical files.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use debforge_core::{ExitCode, FailureKind, NodeStatus, PackageId};
use debforge_graph::{ExcludedNode, MissingPackage};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::state::{write_atomic, RunState};

const REPORTS_DIR: &str = "reports";
const JSON_REPORT: &str = "run-summary.json";
const MARKDOWN_REPORT: &str = "run-summary.md";
const LONGEST_BUILDS: usize = 10;

/// Aggregate counts and exit code of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub exit_code: ExitCode,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Skipped because a dependency failed or was skipped
    pub skipped: usize,
    /// Skipped because a dependency was retired or blocked by policy
    pub blocked: usize,
    /// Removed from the graph by retirement or policy
    pub excluded: usize,
    pub pending: usize,
    pub build_time_secs: f64,
}

/// One failed package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub package: PackageId,
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<ExitCode>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
}

/// One skipped or blocked package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub package: PackageId,
    pub status: NodeStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationEntry {
    pub package: PackageId,
    pub duration_secs: f64,
}

/// Machine-readable report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub run_id: String,
    pub roots: Vec<PackageId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_error: Option<String>,
    pub failures: Vec<FailureEntry>,
    pub failures_by_kind: BTreeMap<FailureKind, Vec<PackageId>>,
    pub skipped: Vec<SkipEntry>,
    pub pending: Vec<PackageId>,
    pub missing_deps: Vec<MissingPackage>,
    pub cycles: Vec<Vec<PackageId>>,
    pub excluded: Vec<ExcludedNode>,
    pub longest_builds: Vec<DurationEntry>,
    pub build_order: Vec<PackageId>,
}

/// Written report files
#[derive(Debug, Clone)]
pub struct RunReport {
    pub document: ReportDocument,
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
}

impl RunReport {
    pub fn exit_code(&self) -> ExitCode {
        self.document.summary.exit_code
    }
}

/// Renders run reports from stored state
pub struct ReportGenerator;

impl ReportGenerator {
    /// Aggregate exit code
    ///
    /// Success when every node that was not skipped succeeded. Otherwise
    /// partial failure when something succeeded, else the exit code of the
    /// first failure in build order.
    pub fn aggregate_exit_code(state: &RunState) -> ExitCode {
        if let Some(failure) = &state.graph_failure {
            return failure.exit_code;
        }

        let order = state.plan.build_order();
        let considered: Vec<&PackageId> =
            order.iter().filter(|id| !state.status(id).is_skipped()).collect();
        if considered.iter().all(|id| state.status(id) == NodeStatus::Succeeded) {
            return ExitCode::Success;
        }
        if considered.iter().any(|id| state.status(id) == NodeStatus::Succeeded) {
            return ExitCode::PartialFailure;
        }
        considered
            .iter()
            .filter(|id| state.status(id) == NodeStatus::Failed)
            .find_map(|id| state.packages.get(*id).and_then(|p| p.exit_code))
            .unwrap_or(ExitCode::PartialFailure)
    }

    pub fn summarize(state: &RunState) -> RunSummary {
        let count = |status: NodeStatus| state.packages.values().filter(|p| p.status == status).count();
        let build_time_secs = state.packages.values().filter_map(|p| p.duration_secs).sum();
        RunSummary {
            exit_code: Self::aggregate_exit_code(state),
            total: state.packages.len(),
            succeeded: count(NodeStatus::Succeeded),
            failed: count(NodeStatus::Failed),
            skipped: count(NodeStatus::SkippedDependencyFailed),
            blocked: count(NodeStatus::SkippedBlocked),
            excluded: state.plan.excluded.len(),
            pending: count(NodeStatus::Pending)
                + count(NodeStatus::Ready)
                + count(NodeStatus::Running),
            build_time_secs,
        }
    }

    pub fn document(state: &RunState) -> ReportDocument {
        let order = state.plan.build_order();

        let mut failures = Vec::new();
        let mut failures_by_kind: BTreeMap<FailureKind, Vec<PackageId>> = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut pending = Vec::new();
        for id in &order {
            let Some(entry) = state.packages.get(id) else {
                continue;
            };
            match entry.status {
                NodeStatus::Failed => {
                    let kind = entry.failure_kind.unwrap_or(FailureKind::Unknown);
                    failures_by_kind.entry(kind).or_default().push(id.clone());
                    failures.push(FailureEntry {
                        package: id.clone(),
                        kind,
                        exit_code: entry.exit_code,
                        message: entry.message.clone().unwrap_or_default(),
                        log: entry.log_path.clone(),
                    });
                }
                NodeStatus::SkippedBlocked | NodeStatus::SkippedDependencyFailed => {
                    skipped.push(SkipEntry {
                        package: id.clone(),
                        status: entry.status,
                        reason: entry.message.clone().unwrap_or_default(),
                    });
                }
                NodeStatus::Succeeded => {}
                NodeStatus::Pending | NodeStatus::Ready | NodeStatus::Running => {
                    pending.push(id.clone())
                }
            }
        }

        let mut longest_builds: Vec<DurationEntry> = order
            .iter()
            .filter_map(|id| {
                let duration = state.packages.get(id)?.duration_secs?;
                (duration > 0.0).then(|| DurationEntry { package: id.clone(), duration_secs: duration })
            })
            .collect();
        longest_builds.sort_by(|a, b| {
            b.duration_secs.total_cmp(&a.duration_secs).then_with(|| a.package.cmp(&b.package))
        });
        longest_builds.truncate(LONGEST_BUILDS);

        let (graph_error, missing_deps, cycles) = match &state.graph_failure {
            Some(failure) => {
                let cycles =
                    if failure.cycle.is_empty() { Vec::new() } else { vec![failure.cycle.clone()] };
                (Some(failure.message.clone()), failure.missing.clone(), cycles)
            }
            None => (None, Vec::new(), Vec::new()),
        };

        ReportDocument {
            run_id: state.run_id.clone(),
            roots: state.roots.clone(),
            created_at: state.created_at,
            completed_at: state.completed_at,
            summary: Self::summarize(state),
            graph_error,
            failures,
            failures_by_kind,
            skipped,
            pending,
            missing_deps,
            cycles,
            excluded: state.plan.excluded.clone(),
            longest_builds,
            build_order: order,
        }
    }

    pub fn render_json(document: &ReportDocument) -> Result<String> {
        Ok(serde_json::to_string_pretty(document)?)
    }

    pub fn render_markdown(document: &ReportDocument) -> String {
        let summary = &document.summary;
        let mut md = String::new();
        let _ = writeln!(md, "# Run Summary: {}\n", document.run_id);
        let _ = writeln!(md, "**Roots:** {}", join(&document.roots, ", "));
        let _ = writeln!(md, "**Started:** {}", document.created_at.to_rfc3339());
        match document.completed_at {
            Some(completed) => {
                let _ = writeln!(md, "**Completed:** {}", completed.to_rfc3339());
            }
            None => md.push_str("**Completed:** not completed\n"),
        }
        let _ = writeln!(md, "**Exit code:** {}\n", summary.exit_code);

        if let Some(error) = &document.graph_error {
            let _ = writeln!(md, "## Graph Error\n\n{error}\n");
        }

        md.push_str("## Summary\n\n| Metric | Count |\n|--------|-------|\n");
        let _ = writeln!(md, "| Total Packages | {} |", summary.total);
        let _ = writeln!(md, "| Succeeded | {} |", summary.succeeded);
        let _ = writeln!(md, "| Failed | {} |", summary.failed);
        let _ = writeln!(md, "| Skipped | {} |", summary.skipped);
        let _ = writeln!(md, "| Blocked | {} |", summary.blocked);
        let _ = writeln!(md, "| Excluded | {} |", summary.excluded);
        let _ = writeln!(md, "| Pending | {} |", summary.pending);
        let _ = writeln!(
            md,
            "| Total Build Time | {:.0}s ({:.1}h) |\n",
            summary.build_time_secs,
            summary.build_time_secs / 3600.0
        );

        if !document.failures_by_kind.is_empty() {
            md.push_str("## Failures by Type\n\n");
            for (kind, packages) in &document.failures_by_kind {
                let _ = writeln!(md, "### {kind} ({})\n", packages.len());
                for failure in document.failures.iter().filter(|f| f.kind == *kind) {
                    let _ = writeln!(md, "- **{}**: {}", failure.package, failure.message);
                    if let Some(log) = &failure.log {
                        let _ = writeln!(md, "  - Log: `{}`", log.display());
                    }
                }
                md.push('\n');
            }
        }

        if !document.skipped.is_empty() {
            md.push_str("## Skipped\n\n");
            for skip in &document.skipped {
                let _ = writeln!(md, "- **{}** ({}): {}", skip.package, skip.status, skip.reason);
            }
            md.push('\n');
        }

        if !document.pending.is_empty() {
            let _ = writeln!(md, "## Not Run\n\n{}\n", join(&document.pending, ", "));
        }

        if !document.missing_deps.is_empty() {
            md.push_str(
                "## Missing Dependencies\n\n| Package | Required By | Suggested Action |\n\
                 |---------|-------------|------------------|\n",
            );
            for missing in &document.missing_deps {
                let mut required_by = join(&missing.required_by[..missing.required_by.len().min(3)], ", ");
                if missing.required_by.len() > 3 {
                    let _ = write!(required_by, " (+{} more)", missing.required_by.len() - 3);
                }
                if required_by.is_empty() {
                    required_by.push_str("(requested)");
                }
                let _ = writeln!(md, "| {} | {} | {} |", missing.id, required_by, missing.suggested_action);
            }
            md.push('\n');
        }

        if !document.cycles.is_empty() {
            md.push_str("## Dependency Cycles\n\n");
            for (i, cycle) in document.cycles.iter().enumerate() {
                let _ = writeln!(md, "{}. {}", i + 1, join(cycle, " -> "));
            }
            md.push('\n');
        }

        if !document.excluded.is_empty() {
            md.push_str("## Excluded\n\n");
            for excluded in &document.excluded {
                let _ = writeln!(md, "- **{}** ({:?}): {}", excluded.id, excluded.kind, excluded.reason);
            }
            md.push('\n');
        }

        if !document.longest_builds.is_empty() {
            md.push_str("## Top 10 Longest Builds\n\n| Package | Duration |\n|---------|----------|\n");
            for entry in &document.longest_builds {
                let secs = entry.duration_secs as u64;
                let _ = writeln!(md, "| {} | {}m {}s |", entry.package, secs / 60, secs % 60);
            }
            md.push('\n');
        }

        if !document.build_order.is_empty() {
            md.push_str("## Build Order\n\n");
            for (i, id) in document.build_order.iter().enumerate() {
                let _ = writeln!(md, "{}. {}", i + 1, id);
            }
        }

        md
    }

    /// Write both reports under `<run_dir>/reports`
    pub async fn write(state: &RunState, run_dir: &Path) -> Result<RunReport> {
        let document = Self::document(state);
        let reports_dir = run_dir.join(REPORTS_DIR);
        let json_path = reports_dir.join(JSON_REPORT);
        let markdown_path = reports_dir.join(MARKDOWN_REPORT);

        write_atomic(&json_path, Self::render_json(&document)?.as_bytes()).await?;
        write_atomic(&markdown_path, Self::render_markdown(&document).as_bytes()).await?;
        info!("Wrote reports for run {} to {}", state.run_id, reports_dir.display());

        Ok(RunReport { document, json_path, markdown_path })
    }
}

fn join(ids: &[PackageId], separator: &str) -> String {
    ids.iter().map(PackageId::as_str).collect::<Vec<_>>().join(separator)
}
