//! Progress UI components for run visualization
//!
//! Schedulers and the phase engine emit [`ProgressEvent`]s; the UI decides
//! how to show them. The no-op implementation turns them into log lines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use debforge_core::{NodeStatus, PackageId, Phase};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Run started with this many packages to consider
    RunStarted { total: usize },
    /// A batch is about to be scheduled
    BatchStarted { index: usize, batches: usize, size: usize },
    /// A package entered the phase engine
    PackageStarted { package: PackageId },
    /// A package entered a phase
    PhaseStarted { package: PackageId, phase: Phase },
    /// A package reached a terminal status
    PackageFinished { package: PackageId, status: NodeStatus, message: Option<String> },
    /// Run finished
    RunFinished { succeeded: usize, failed: usize, skipped: usize },
}

/// Trait for progress UI implementations
pub trait ProgressUI: Send + Sync {
    /// Update the UI with a progress event
    fn update(&self, event: &ProgressEvent);

    /// Finish the progress display
    fn finish(&self);
}

/// Indicatif-based progress UI implementation
pub struct IndicatifProgressUI {
    /// Multi-progress container for parallel builds
    multi_progress: MultiProgress,
    /// Main progress bar
    main_bar: ProgressBar,
    /// Package progress bars
    package_bars: Arc<Mutex<HashMap<PackageId, ProgressBar>>>,
    /// Start time for duration tracking
    start_time: Instant,
}

impl IndicatifProgressUI {
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();

        let main_bar = multi_progress.add(ProgressBar::new(0));
        let style = ProgressStyle::default_bar()
            .template(
                "{prefix:.bold.dim} {spinner:.green} [{elapsed_precise}] \
                 [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
            )
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        main_bar.set_style(style);
        main_bar.set_prefix("Building packages");

        Self {
            multi_progress,
            main_bar,
            package_bars: Arc::new(Mutex::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    fn create_package_bar(&self, package: &PackageId) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_prefix(format!("  {package}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn handle_package_start(&self, package: &PackageId) {
        let pb = self.create_package_bar(package);
        pb.set_message("starting");
        if let Ok(mut bars) = self.package_bars.lock() {
            bars.insert(package.clone(), pb);
        }
    }

    fn handle_phase(&self, package: &PackageId, phase: Phase) {
        if let Ok(bars) = self.package_bars.lock() {
            if let Some(pb) = bars.get(package) {
                pb.set_message(format!("[{}/{}] {}", phase.ordinal(), Phase::ALL.len(), phase));
            }
        }
    }

    fn handle_package_finished(&self, package: &PackageId, status: NodeStatus, message: Option<&str>) {
        let bar = self.package_bars.lock().ok().and_then(|mut bars| bars.remove(package));
        match (bar, status) {
            (Some(pb), NodeStatus::Succeeded) => pb.finish_with_message("✓ succeeded"),
            (Some(pb), _) => pb.finish_with_message(format!("✗ {}", message.unwrap_or("failed"))),
            (None, _) if status.is_skipped() => {
                self.multi_progress.println(format!("- {package} {status}")).ok();
            }
            (None, _) => {}
        }
        if status != NodeStatus::Pending {
            self.main_bar.inc(1);
        }
    }
}

impl Default for IndicatifProgressUI {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressUI for IndicatifProgressUI {
    fn update(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { total } => self.main_bar.set_length(*total as u64),
            ProgressEvent::BatchStarted { index, batches, size } => {
                self.main_bar.set_message(format!("batch {}/{} ({size})", index + 1, batches));
            }
            ProgressEvent::PackageStarted { package } => self.handle_package_start(package),
            ProgressEvent::PhaseStarted { package, phase } => self.handle_phase(package, *phase),
            ProgressEvent::PackageFinished { package, status, message } => {
                self.handle_package_finished(package, *status, message.as_deref());
            }
            ProgressEvent::RunFinished { succeeded, failed, skipped } => {
                self.main_bar.set_message(format!(
                    "{succeeded} succeeded, {failed} failed, {skipped} skipped"
                ));
            }
        }
    }

    fn finish(&self) {
        if let Ok(bars) = self.package_bars.lock() {
            for pb in bars.values() {
                if !pb.is_finished() {
                    pb.finish();
                }
            }
        }

        let elapsed = self.start_time.elapsed();
        self.main_bar.finish_with_message(format!("done in {}s", elapsed.as_secs()));
    }
}

/// No-op progress UI for when visual progress is not needed
pub struct NoOpProgressUI;

impl ProgressUI for NoOpProgressUI {
    fn update(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { total } => info!("Run started with {} packages", total),
            ProgressEvent::BatchStarted { index, batches, size } => {
                info!("Batch {}/{}: {} packages", index + 1, batches, size);
            }
            ProgressEvent::PackageStarted { package } => info!("Building package {}", package),
            ProgressEvent::PhaseStarted { package, phase } => {
                debug!("{}: phase {}", package, phase);
            }
            ProgressEvent::PackageFinished { package, status, message } => match status {
                NodeStatus::Succeeded => info!("Package {} built successfully", package),
                NodeStatus::Failed => error!(
                    "Package {} failed: {}",
                    package,
                    message.as_deref().unwrap_or("Unknown error")
                ),
                other => warn!(
                    "Package {} {}: {}",
                    package,
                    other,
                    message.as_deref().unwrap_or_default()
                ),
            },
            ProgressEvent::RunFinished { succeeded, failed, skipped } => {
                info!("Run finished: {} succeeded, {} failed, {} skipped", succeeded, failed, skipped);
            }
        }
    }

    fn finish(&self) {}
}

/// Progress UI factory
pub struct ProgressUIFactory;

impl ProgressUIFactory {
    /// Create a progress UI based on environment
    pub fn create(interactive: bool) -> Arc<dyn ProgressUI> {
        if interactive && atty::is(atty::Stream::Stderr) {
            Arc::new(IndicatifProgressUI::new())
        } else {
            Arc::new(NoOpProgressUI)
        }
    }

    /// Create a no-op progress UI
    pub fn create_noop() -> Arc<dyn ProgressUI> {
        Arc::new(NoOpProgressUI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str) -> PackageId {
        PackageId::new(name).unwrap()
    }

    #[test]
    fn test_indicatif_progress_ui() {
        let ui = IndicatifProgressUI::new();

        ui.update(&ProgressEvent::RunStarted { total: 2 });
        ui.update(&ProgressEvent::BatchStarted { index: 0, batches: 1, size: 2 });
        ui.update(&ProgressEvent::PackageStarted { package: pkg("nova") });
        ui.update(&ProgressEvent::PhaseStarted { package: pkg("nova"), phase: Phase::Build });
        ui.update(&ProgressEvent::PackageFinished {
            package: pkg("nova"),
            status: NodeStatus::Succeeded,
            message: None,
        });
        ui.update(&ProgressEvent::PackageFinished {
            package: pkg("glance"),
            status: NodeStatus::SkippedDependencyFailed,
            message: Some("dependency failed".to_string()),
        });
        ui.update(&ProgressEvent::RunFinished { succeeded: 1, failed: 0, skipped: 1 });

        assert!(ui.package_bars.lock().unwrap().is_empty());
        assert_eq!(ui.main_bar.position(), 2);
        ui.finish();
    }

    #[test]
    fn test_noop_progress_ui() {
        let ui = ProgressUIFactory::create_noop();

        // Should not panic on any event
        ui.update(&ProgressEvent::PackageStarted { package: pkg("test") });
        ui.update(&ProgressEvent::PackageFinished {
            package: pkg("test"),
            status: NodeStatus::Failed,
            message: Some("Test error".to_string()),
        });
        ui.finish();
    }
}
