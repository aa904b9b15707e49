//! Multi-package runs: planning, scheduling, resume and reports

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{id, ids, orchestrator, test_config, MockWorld};
use debforge_build::{ResumeMode, RunOptions, RunState};
use debforge_core::{ExitCode, NodeStatus};
use tempfile::TempDir;

fn keep_going() -> RunOptions {
    RunOptions { keep_going: true, ..RunOptions::default() }
}

fn statuses(state: &RunState) -> BTreeMap<String, NodeStatus> {
    state.packages.iter().map(|(id, p)| (id.to_string(), p.status)).collect()
}

#[tokio::test]
async fn test_run_builds_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new()
        .package("a", &["b", "c"])
        .package("b", &["c"])
        .available("c", "2.0-1");
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a"]), RunOptions::default(), None).await.unwrap();

    assert_eq!(report.exit_code(), ExitCode::Success);
    assert_eq!(report.document.build_order, ids(&["b", "a"]));
    assert_eq!(world.built(), vec!["b", "a"]);
    // per-batch index regeneration, b is indexed before a builds
    assert_eq!(world.count("regenerate_index"), 2);
    assert!(world.is_indexed("a"));
    assert!(report.json_path.exists());
    assert!(report.markdown_path.exists());

    let state = orchestrator.store().load(&report.document.run_id).await.unwrap();
    assert!(state.is_complete());
    assert!(state.completed_at.is_some());
    assert_eq!(state.plan.external.get(&id("c")).map(String::as_str), Some("2.0-1"));
    assert!(state.packages.values().all(|p| p.status == NodeStatus::Succeeded));
}

#[tokio::test]
async fn test_cycle_is_reported_without_building() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &["a"]);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a"]), RunOptions::default(), None).await.unwrap();

    assert_eq!(report.exit_code(), ExitCode::CycleDetected);
    assert_eq!(report.document.cycles.len(), 1);
    assert!(world.operations().is_empty());
    let markdown = std::fs::read_to_string(&report.markdown_path).unwrap();
    assert!(markdown.contains("Dependency Cycles"));
}

#[tokio::test]
async fn test_missing_packages_are_reported() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["python3-ghost"]);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a"]), RunOptions::default(), None).await.unwrap();

    assert_eq!(report.exit_code(), ExitCode::MissingPackages);
    assert_eq!(report.document.missing_deps.len(), 1);
    assert_eq!(report.document.missing_deps[0].id, id("python3-ghost"));
    assert!(world.built().is_empty());
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &[]).package("c", &[]);
    world.fail("build", "b", 2);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a", "c"]), keep_going(), None).await.unwrap();

    let state = orchestrator.store().load(&report.document.run_id).await.unwrap();
    assert_eq!(state.status(&id("b")), NodeStatus::Failed);
    assert_eq!(state.status(&id("a")), NodeStatus::SkippedDependencyFailed);
    assert_eq!(state.status(&id("c")), NodeStatus::Succeeded);
    assert_eq!(report.exit_code(), ExitCode::PartialFailure);
    assert_eq!(report.document.failures.len(), 1);
    assert!(!world.built().contains(&"a".to_string()));
}

#[tokio::test]
async fn test_only_failure_sets_exit_code() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &[]);
    world.fail("import_patch", "b", 1);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a"]), keep_going(), None).await.unwrap();

    assert_eq!(report.exit_code(), ExitCode::PatchFailed);
    let markdown = std::fs::read_to_string(&report.markdown_path).unwrap();
    assert!(markdown.contains("### patch_failed (1)"));
}

#[tokio::test]
async fn test_fail_fast_stops_sequential_run() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("p1", &[]).package("p2", &[]).package("p3", &[]);
    world.fail("build", "p1", 2);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report =
        orchestrator.run(ids(&["p1", "p2", "p3"]), RunOptions::default(), None).await.unwrap();

    assert_eq!(world.count("build:"), 1);
    assert_eq!(report.document.pending, ids(&["p2", "p3"]));
    assert_eq!(report.exit_code(), ExitCode::BuildFailed);
}

#[tokio::test]
async fn test_max_failures_limit() {
    let dir = TempDir::new().unwrap();
    let names = ["p1", "p2", "p3", "p4", "p5"];
    let mut world = MockWorld::new();
    for name in names {
        world = world.package(name, &[]);
        world.fail("fetch", name, 128);
    }
    let orchestrator = orchestrator(&world, test_config(&dir));

    let options = RunOptions { keep_going: true, max_failures: 2, ..RunOptions::default() };
    let report = orchestrator.run(ids(&names), options, None).await.unwrap();

    assert_eq!(world.count("fetch:"), 2);
    assert_eq!(report.document.summary.failed, 2);
    assert_eq!(report.document.summary.pending, 3);
    assert_eq!(report.exit_code(), ExitCode::FetchFailed);
}

#[tokio::test]
async fn test_resume_counts_recorded_failures_against_limit() {
    let dir = TempDir::new().unwrap();
    let names = ["p1", "p2", "p3", "p4", "p5"];
    let mut world = MockWorld::new();
    for name in names {
        world = world.package(name, &[]);
        world.fail("fetch", name, 128);
    }
    let orchestrator = orchestrator(&world, test_config(&dir));

    let options = RunOptions { keep_going: true, max_failures: 2, ..RunOptions::default() };
    let first = orchestrator.run(ids(&names), options, None).await.unwrap();
    let run_id = first.document.run_id.clone();
    assert_eq!(world.count("fetch:"), 2);

    let resumed = orchestrator.resume(Some(&run_id), ResumeMode::SkipFailed, None).await.unwrap();
    assert_eq!(world.count("fetch:"), 2);
    assert_eq!(resumed.document.summary.failed, 2);
    assert_eq!(resumed.document.summary.pending, 3);

    let parallel = orchestrator.resume(Some(&run_id), ResumeMode::SkipFailed, Some(2)).await.unwrap();
    assert_eq!(world.count("fetch:"), 2);
    assert_eq!(parallel.document.summary.pending, 3);

    // Retrying clears the recorded failures, so the budget starts over
    orchestrator.resume(Some(&run_id), ResumeMode::RetryFailed, None).await.unwrap();
    assert_eq!(world.count("fetch:"), 4);
}

#[tokio::test]
async fn test_parallel_fail_fast_stops_at_batch_boundary() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("x", &[]).package("y", &[]).package("z", &["y"]);
    world.fail("build", "x", 2);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let options = RunOptions { concurrency: 2, ..RunOptions::default() };
    let report = orchestrator.run(ids(&["x", "y", "z"]), options, None).await.unwrap();

    let state = orchestrator.store().load(&report.document.run_id).await.unwrap();
    assert_eq!(state.status(&id("x")), NodeStatus::Failed);
    assert_eq!(state.status(&id("z")), NodeStatus::Pending);
    assert!(!world.built().contains(&"z".to_string()));
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    let graph = |world: MockWorld| {
        world
            .package("app", &["lib-a", "lib-b"])
            .package("lib-a", &["core"])
            .package("lib-b", &["core"])
            .package("core", &["base"])
            .available("base", "1.2-3")
            .package("tool", &[])
            .package("broken", &["core"])
    };

    let mut tables = Vec::new();
    for concurrency in [1, 4] {
        let dir = TempDir::new().unwrap();
        let world = graph(MockWorld::new());
        world.fail("build", "lib-b", 2);
        let orchestrator = orchestrator(&world, test_config(&dir));
        let options = RunOptions { concurrency, ..keep_going() };
        let report =
            orchestrator.run(ids(&["app", "tool", "broken"]), options, None).await.unwrap();
        let state = orchestrator.store().load(&report.document.run_id).await.unwrap();

        let mut built = world.built();
        built.sort();
        tables.push((statuses(&state), built, report.exit_code()));
    }

    assert_eq!(tables[0], tables[1]);
    let (statuses, built, exit) = &tables[0];
    assert_eq!(statuses["app"], NodeStatus::SkippedDependencyFailed);
    assert_eq!(statuses["broken"], NodeStatus::Succeeded);
    assert_eq!(built, &vec!["broken", "core", "lib-a", "lib-b", "tool"]);
    assert_eq!(*exit, ExitCode::PartialFailure);
}

#[tokio::test]
async fn test_shared_missing_dependency_is_built_once() {
    for concurrency in [1, 2] {
        let dir = TempDir::new().unwrap();
        let world = MockWorld::new()
            .package("nova", &[])
            .package("cinder", &[])
            .package("oslo.log", &[])
            .derives("nova", &["oslo.log"])
            .derives("cinder", &["oslo.log"]);
        world.set_build_delay(Duration::from_millis(50));
        let orchestrator = orchestrator(&world, test_config(&dir));

        let options = RunOptions { concurrency, ..keep_going() };
        let report = orchestrator.run(ids(&["nova", "cinder"]), options, None).await.unwrap();

        assert_eq!(report.exit_code(), ExitCode::Success, "concurrency {concurrency}");
        assert_eq!(world.count("build:oslo.log"), 1, "concurrency {concurrency}");
        assert_eq!(world.count("publish:oslo.log"), 1, "concurrency {concurrency}");
        assert!(world.is_indexed("oslo.log"));
        let state = orchestrator.store().load(&report.document.run_id).await.unwrap();
        assert_eq!(state.status(&id("nova")), NodeStatus::Succeeded);
        assert_eq!(state.status(&id("cinder")), NodeStatus::Succeeded);
    }
}

#[tokio::test]
async fn test_resume_of_finished_run_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &[]);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let first = orchestrator.run(ids(&["a"]), RunOptions::default(), None).await.unwrap();
    let json = std::fs::read(&first.json_path).unwrap();
    let markdown = std::fs::read(&first.markdown_path).unwrap();
    let operations = world.operations().len();

    let resumed = orchestrator
        .resume(Some(&first.document.run_id), ResumeMode::SkipFailed, None)
        .await
        .unwrap();

    assert_eq!(world.operations().len(), operations);
    assert_eq!(resumed.exit_code(), ExitCode::Success);
    assert_eq!(std::fs::read(&resumed.json_path).unwrap(), json);
    assert_eq!(std::fs::read(&resumed.markdown_path).unwrap(), markdown);
}

#[tokio::test]
async fn test_resume_retry_failed_rebuilds_failures_only() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new()
        .package("a", &[])
        .package("b", &[])
        .package("c", &[])
        .package("d", &["b"]);
    world.fail("build", "b", 2);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let first = orchestrator.run(ids(&["a", "b", "c", "d"]), keep_going(), None).await.unwrap();
    assert_eq!(first.exit_code(), ExitCode::PartialFailure);
    let run_id = first.document.run_id.clone();

    // Failed nodes stay failed when skipping
    let skipped = orchestrator.resume(Some(&run_id), ResumeMode::SkipFailed, None).await.unwrap();
    assert_eq!(skipped.exit_code(), ExitCode::PartialFailure);
    assert_eq!(world.built(), vec!["a", "c"]);

    world.clear_failures();
    let retried = orchestrator.resume(Some(&run_id), ResumeMode::RetryFailed, None).await.unwrap();

    assert_eq!(retried.exit_code(), ExitCode::Success);
    assert_eq!(world.built(), vec!["a", "c", "b", "d"]);
    let state = orchestrator.store().load(&run_id).await.unwrap();
    assert_eq!(state.packages[&id("b")].attempts, 2);
    assert_eq!(state.packages[&id("a")].attempts, 1);
}

#[tokio::test]
async fn test_interrupted_run_resumes() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("p1", &[]).package("p2", &[]).package("p3", &[]);
    let orchestrator_a = orchestrator(&world, test_config(&dir));
    world.interrupt_when_building("p1", orchestrator_a.shutdown_manager().shutdown_signal());

    let report = orchestrator_a
        .run(ids(&["p1", "p2", "p3"]), RunOptions::default(), None)
        .await
        .unwrap();
    let run_id = report.document.run_id.clone();

    let state = orchestrator_a.store().load(&run_id).await.unwrap();
    assert!(state.completed_at.is_none());
    assert!(state.packages.values().all(|p| p.status == NodeStatus::Pending));
    assert_eq!(world.count("publish:"), 0);

    let orchestrator_b = orchestrator(&world, test_config(&dir));
    let resumed = orchestrator_b.resume(None, ResumeMode::SkipFailed, None).await.unwrap();

    assert_eq!(resumed.document.run_id, run_id);
    assert_eq!(resumed.exit_code(), ExitCode::Success);
    assert_eq!(world.count("publish:"), 3);
}

#[tokio::test]
async fn test_retired_dependency_blocks_dependents() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &[]).package("c", &[]);
    world.retire("b", "retired upstream");
    let orchestrator = orchestrator(&world, test_config(&dir));

    let report = orchestrator.run(ids(&["a", "c"]), RunOptions::default(), None).await.unwrap();

    let state = orchestrator.store().load(&report.document.run_id).await.unwrap();
    assert_eq!(state.status(&id("a")), NodeStatus::SkippedBlocked);
    assert_eq!(world.built(), vec!["c"]);
    assert_eq!(report.document.excluded.len(), 1);
    assert_eq!(report.exit_code(), ExitCode::Success);
}

#[tokio::test]
async fn test_single_build_auto_builds_missing_dependency() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &["b"]).package("b", &[]);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let single = orchestrator.build_package(id("a"), None, false).await.unwrap();

    assert!(single.outcome.success, "{:?}", single.outcome.error);
    assert_eq!(world.built(), vec!["b", "a"]);
    assert!(single.run_dir.join("outcome.json").exists());
    assert!(world.is_indexed("a"));
}

#[tokio::test]
async fn test_report_rerenders_latest_run() {
    let dir = TempDir::new().unwrap();
    let world = MockWorld::new().package("a", &[]);
    world.fail("build", "a", 2);
    let orchestrator = orchestrator(&world, test_config(&dir));

    let first = orchestrator.run(ids(&["a"]), RunOptions::default(), None).await.unwrap();
    std::fs::remove_file(&first.json_path).unwrap();

    let again = orchestrator.report(None).await.unwrap();
    assert_eq!(again.document.run_id, first.document.run_id);
    assert_eq!(again.exit_code(), ExitCode::BuildFailed);
    assert!(again.json_path.exists());
}
