use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::archive::EntryNaming;
use crate::configuration::FixtureConfig;
use crate::container_management::mock::RecordingEngine;
use crate::container_management::Runtime;
use crate::error_handling::types::{ContainerError, FixtureError};

fn build_context() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Dockerfile"), "FROM scratch\nCOPY app.txt /\n").unwrap();
    fs::create_dir_all(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/app.txt"), "payload").unwrap();
    dir
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test]
async fn build_mode_streams_the_context_and_cleans_up() {
    let engine = Arc::new(RecordingEngine::new());
    let dir = build_context();

    let report = Fixture::new()
        .engine(engine.clone())
        .context_dir(dir.path())
        .dockerfile("Dockerfile")
        .tag("mine:test")
        .exec(|ctx| async move {
            let output = ctx.exec(&["echo", "hi"]).await?;
            assert_eq!(output.stdout, "echo hi");
            Ok(())
        })
        .cleanup_container()
        .cleanup_image()
        .run()
        .await
        .unwrap();

    assert!(report.built);
    assert_eq!(report.image, "sha256:built-1");
    assert_eq!(report.container_id, "container-2");
    assert_eq!(report.exec_runners, 1);
    assert_eq!(
        engine.operation_names(),
        vec!["build", "create", "start", "exec", "stop", "remove", "rmi"]
    );

    let operations = engine.operations();
    assert!(operations[0].starts_with("build:mine:test,fixture-"));
    assert_eq!(operations[6], "rmi:sha256:built-1");

    let entries = engine.built_entries();
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Dockerfile", "app.txt"]);
    assert_eq!(entries[1].1, b"payload");
}

#[tokio::test]
async fn relative_naming_keeps_directories() {
    let engine = Arc::new(RecordingEngine::new());
    let dir = build_context();

    Fixture::new()
        .engine(engine.clone())
        .context_dir(dir.path())
        .dockerfile("Dockerfile")
        .naming(EntryNaming::RelativePath)
        .run()
        .await
        .unwrap();

    let names: Vec<String> = engine.built_entries().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["Dockerfile", "sub/app.txt"]);
}

#[tokio::test]
async fn pull_mode_removes_matching_images() {
    let engine = Arc::new(RecordingEngine::new());

    let report = Fixture::new()
        .engine(engine.clone())
        .image("redis:7")
        .cleanup_image()
        .run()
        .await
        .unwrap();

    assert!(!report.built);
    assert_eq!(report.image, "redis:7");
    assert_eq!(
        engine.operations(),
        vec![
            "pull:redis:7",
            "create:redis:7",
            "start:container-1",
            "stop:container-1",
            "images:redis:7",
            "rmi:sha256:pulled-redis:7",
        ]
    );
}

#[tokio::test]
async fn missing_image_source_still_runs_after_runners() {
    let engine = Arc::new(RecordingEngine::new());
    let after_calls = counter();
    let seen = after_calls.clone();

    let err = Fixture::new()
        .engine(engine.clone())
        .after(move |ctx| async move {
            assert!(ctx.container.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .cleanup_container()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, FixtureError::NoImageSource));
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);
    assert!(engine.operations().is_empty());
}

#[tokio::test]
async fn failing_exec_runner_stops_the_chain_but_not_teardown() {
    let engine = Arc::new(RecordingEngine::new());
    let later = counter();
    let later_seen = later.clone();

    let err = Fixture::new()
        .engine(engine.clone())
        .image("alpine")
        .exec(|_| async { Err::<(), _>(FixtureError::Runner("assertion failed".to_string())) })
        .exec(move |_| async move {
            later_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .after(|_| async { Err::<(), _>(FixtureError::Runner("teardown failed".to_string())) })
        .run()
        .await
        .unwrap_err();

    // the exec error wins over the after runner's
    assert!(matches!(err, FixtureError::Runner(ref m) if m == "assertion failed"));
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(
        engine.operation_names(),
        vec!["pull", "create", "start", "stop"]
    );
}

#[tokio::test]
async fn after_runner_error_is_returned_when_everything_else_passed() {
    let engine = Arc::new(RecordingEngine::new());
    let later = counter();
    let later_seen = later.clone();

    let err = Fixture::new()
        .engine(engine.clone())
        .image("alpine")
        .after(|_| async { Err::<(), _>(FixtureError::Runner("teardown failed".to_string())) })
        .after(move |_| async move {
            later_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, FixtureError::Runner(ref m) if m == "teardown failed"));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_failure_is_an_error() {
    let engine = Arc::new(RecordingEngine::new());
    engine.fail_on("stop");

    let err = Fixture::new()
        .engine(engine.clone())
        .image("alpine")
        .cleanup_container()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FixtureError::Container(ContainerError::CommandFailed { .. })
    ));
    assert_eq!(
        engine.operation_names(),
        vec!["pull", "create", "start", "stop", "remove"]
    );
}

#[tokio::test]
async fn container_is_not_stopped_when_start_failed() {
    let engine = Arc::new(RecordingEngine::new());
    engine.fail_on("start");

    let err = Fixture::new()
        .engine(engine.clone())
        .image("alpine")
        .exec(|_| async { Err::<(), _>(FixtureError::Runner("must not run".to_string())) })
        .cleanup_container()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, FixtureError::Container(_)));
    assert_eq!(
        engine.operation_names(),
        vec!["pull", "create", "start", "remove"]
    );
}

#[tokio::test]
async fn build_failure_skips_the_container() {
    let engine = Arc::new(RecordingEngine::new());
    engine.fail_on("build");
    let dir = build_context();

    let err = Fixture::new()
        .engine(engine.clone())
        .context_dir(dir.path())
        .dockerfile("Dockerfile")
        .cleanup_container()
        .cleanup_image()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, FixtureError::Container(_)));
    // nothing was built, so the image cleanup has nothing to remove
    assert_eq!(engine.operation_names(), vec!["build"]);
}

#[tokio::test]
async fn checked_exec_reports_exit_codes() {
    let engine = Arc::new(RecordingEngine::new());
    engine.set_exec_exit_code(2);

    let err = Fixture::new()
        .engine(engine.clone())
        .image("alpine")
        .exec(|ctx| async move {
            ctx.exec_checked(&["false"]).await?;
            Ok(())
        })
        .run()
        .await
        .unwrap_err();

    match err {
        FixtureError::Runner(message) => assert!(message.starts_with("`false` exited with 2")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn runners_see_the_provisioned_fixture() {
    let engine = Arc::new(RecordingEngine::new());
    let dir = build_context();

    Fixture::new()
        .engine(engine.clone())
        .context_dir(dir.path())
        .dockerfile("Dockerfile")
        .name("under-test")
        .exec(|ctx| async move {
            let container = ctx.container.clone().unwrap();
            assert_eq!(container.name.as_deref(), Some("under-test"));
            assert_eq!(container.image, "sha256:built-1");
            assert_eq!(ctx.image_tags, vec!["sha256:built-1"]);
            assert!(ctx.built);
            assert_eq!(ctx.container_id()?, container.id);
            Ok(())
        })
        .run()
        .await
        .unwrap();
}

#[test]
fn builder_fills_the_plan() {
    let fixture = Fixture::new()
        .runtime(Runtime::Podman)
        .image("alpine")
        .cmd(["sleep", "30"])
        .env("MODE", "test")
        .label("suite", "fixtures")
        .working_dir("/srv")
        .extra_arg("--network=host")
        .stop_timeout(Duration::from_secs(2))
        .build_arg("V", "1");

    let plan = &fixture.plan;
    assert_eq!(plan.runtime, Runtime::Podman);
    assert_eq!(plan.spec.cmd, vec!["sleep", "30"]);
    assert_eq!(plan.spec.labels.get("suite").map(String::as_str), Some("fixtures"));
    assert_eq!(plan.build.labels.get("suite").map(String::as_str), Some("fixtures"));
    assert_eq!(plan.spec.working_dir.as_deref(), Some("/srv"));
    assert_eq!(plan.spec.extra_args, vec!["--network=host"]);
    assert_eq!(plan.stop_timeout, Duration::from_secs(2));
    assert_eq!(plan.build.build_args.get("V").map(String::as_str), Some("1"));
    assert!(plan.dockerfile.is_none());
    assert!(fixture.exec_runners.is_empty() && fixture.after_runners.is_empty());
}

#[test]
fn configured_fixture_runs_with_requested_cleanup() {
    let dir = build_context();
    let toml = format!(
        r#"
engine = "podman"
name = "configured"

[build]
context = "{}"
relative_paths = true
tags = ["configured:latest"]

[container]
cmd = ["run"]
env = {{ A = "1" }}
stop_timeout_secs = 3

[cleanup]
image = false
"#,
        dir.path().display()
    );
    let config = FixtureConfig::from_toml_str(&toml).unwrap();
    config.validate().unwrap();

    let fixture = Fixture::from_config(&config);
    assert_eq!(fixture.plan.runtime, Runtime::Podman);
    assert_eq!(fixture.plan.dockerfile.as_deref(), Some("Dockerfile"));
    assert_eq!(fixture.plan.stop_timeout, Duration::from_secs(3));
    assert_eq!(fixture.plan.spec.env.get("A").map(String::as_str), Some("1"));
    assert_eq!(fixture.after_runners.len(), 1);

    let engine = Arc::new(RecordingEngine::new());
    let report = tokio_test::block_on(fixture.engine(engine.clone()).run()).unwrap();

    assert!(report.built);
    assert_eq!(
        engine.operation_names(),
        vec!["build", "create", "start", "stop", "remove"]
    );
    let names: Vec<String> = engine.built_entries().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["Dockerfile", "sub/app.txt"]);
}
