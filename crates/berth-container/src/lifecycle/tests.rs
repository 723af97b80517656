use super::*;
use crate::testing::{FAKE_HOST_PID, FakeContainer, container_id, harness};
use berth_core::ProcessType;

fn node_app() -> FakeContainer {
    FakeContainer::running().with_env("MAIN_COMMAND=\"node index.js\"")
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness().await;
    h.engine
        .add_container("web", node_app().with_process(12, 1, "node index.js"));
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let first = h.controller.stop(&process).await;
    assert!(first.success);
    assert_eq!(first.stopped, 1);
    assert_eq!(first.message, "Stopped 1 process(es)");

    let second = h.controller.stop(&process).await;
    assert!(second.success);
    assert_eq!(second.message, "No matching processes found to stop");

    let report = h.controller.status(&process).await;
    assert_eq!(report.status, ProcessStatus::ProcessStopped);
}

#[tokio::test]
async fn test_start_twice_leaves_single_instance() {
    let h = harness().await;
    h.engine.add_container("web", node_app());
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let first = h.controller.start(&process).await;
    assert!(first.success, "{:?}", first.error);
    let second = h.controller.start(&process).await;
    assert!(second.success, "{:?}", second.error);

    assert_eq!(h.engine.live_commands("web"), vec!["node index.js"]);
    let stored = h.controller.store().require("web").await.unwrap();
    assert_eq!(stored.id, container_id("web"));
    assert_eq!(stored.process_pid, second.pid);
}

#[tokio::test]
async fn test_concurrent_starts_are_serialized() {
    let h = harness().await;
    h.engine.add_container("web", node_app());
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let (a, b) = tokio::join!(h.controller.start(&process), h.controller.start(&process));
    assert!(a.success && b.success);
    assert_eq!(h.engine.live_commands("web").len(), 1);
}

#[tokio::test]
async fn test_start_writes_wrapper_and_announces_progress() {
    let h = harness().await;
    h.engine
        .add_container("web", node_app().launching_with(&["listening on 8001"]));
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;
    let mut live = h.controller.live().subscribe("web");

    let outcome = h.controller.start(&process).await;
    assert!(outcome.success);
    assert_eq!(outcome.status, ProcessStatus::Running);

    let wrapper = h.engine.file("web", "/tmp/berth_web_start.sh").unwrap();
    assert!(wrapper.contains("exec node index.js 2>&1 | tee -a '/tmp/web_process.log'"));
    assert_eq!(
        h.engine.file("web", "/tmp/web_process.log").unwrap(),
        "listening on 8001\n"
    );

    let mut messages = Vec::new();
    while let Ok(line) = live.try_recv() {
        messages.push(line[22..].to_string());
    }
    assert_eq!(
        messages,
        vec![
            "===== PROCESS RESTART =====",
            "Process start initiated",
            "Process started successfully",
        ]
    );
}

#[tokio::test]
async fn test_crash_on_start_reports_log_tail() {
    let h = harness().await;
    h.engine.add_container(
        "web",
        node_app()
            .with_file("/tmp/web_process.log", "stale line from last run\n")
            .crashing_with(&[
                "node:internal/modules/cjs/loader:1228",
                "Error: Cannot find module 'express'",
            ]),
    );
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let outcome = h.controller.start(&process).await;
    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("crashed"));
    assert_eq!(outcome.status, ProcessStatus::ProcessStopped);
    assert!(
        outcome
            .log_tail
            .iter()
            .any(|l| l.contains("Cannot find module 'express'"))
    );
    assert!(!outcome.log_tail.iter().any(|l| l.contains("stale line")));

    let stored = h.controller.store().require("web").await.unwrap();
    assert_eq!(stored.process_pid, None);
}

#[tokio::test]
async fn test_traditional_start_and_stop() {
    let h = harness().await;
    h.engine.add_container(
        "api",
        FakeContainer::stopped().with_env("COMMAND=python app.py"),
    );
    let process = h.register("api", ProcessType::Python, "python app.py").await;

    let started = h.controller.start(&process).await;
    assert!(started.success);
    assert_eq!(started.pid, Some(FAKE_HOST_PID));
    assert_eq!(h.controller.status(&process).await.status, ProcessStatus::Running);

    let stopped = h.controller.stop(&process).await;
    assert!(stopped.success);
    assert_eq!(stopped.message, "Process stopped");
    assert_eq!(h.controller.status(&process).await.status, ProcessStatus::Exited);
    assert_eq!(h.engine.calls(), vec!["up api", "stop api"]);

    let again = h.controller.stop(&process).await;
    assert!(again.success);
    assert_eq!(again.message, "Container is not running");
}

#[tokio::test]
async fn test_traditional_restart_stops_then_starts() {
    let h = harness().await;
    h.engine
        .add_container("api", FakeContainer::running().with_env("COMMAND=python app.py"));
    let process = h.register("api", ProcessType::Python, "python app.py").await;

    let outcome = h.controller.restart(&process).await;
    assert!(outcome.success);
    assert_eq!(h.engine.calls(), vec!["stop api", "up api"]);
}

#[tokio::test]
async fn test_stop_reaps_descendants_and_zombies() {
    let h = harness().await;
    h.engine.add_container(
        "web",
        node_app()
            .with_process(12, 1, "node index.js")
            .with_process(13, 12, "node worker.js")
            .with_process(14, 12, "sh -c sleep 1000")
            .with_zombie(20, 12, "node"),
    );
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let outcome = h.controller.stop(&process).await;
    assert!(outcome.success);
    assert_eq!(outcome.stopped, 2);
    assert_eq!(outcome.zombies_cleaned, 1);
    assert_eq!(
        outcome.message,
        "Stopped 2 process(es) and cleaned 1 zombie process(es)"
    );

    let container = h.engine.container("web").unwrap();
    assert!(container.live_commands().is_empty());
    assert_eq!(container.zombie_count(), 0);
}

#[tokio::test]
async fn test_stop_kills_port_listener_with_renamed_command() {
    let h = harness().await;
    // port_id 1 -> 8001
    h.engine.add_container(
        "web",
        node_app()
            .with_process(30, 1, "uvicorn main:app --port 8001")
            .with_listener(8001, 30),
    );
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;
    assert_eq!(process.port(h.controller.config().base_port), 8001);

    let outcome = h.controller.stop(&process).await;
    assert!(outcome.success);
    assert_eq!(outcome.stopped, 1);
    assert_eq!(outcome.port_listeners, 1);
    assert_eq!(
        outcome.message,
        "Stopped 1 process(es) (including 1 port-listening process(es))"
    );
    assert!(h.engine.live_commands("web").is_empty());
}

#[tokio::test]
async fn test_container_init_is_never_signalled() {
    let h = harness().await;
    h.engine.add_container(
        "web",
        FakeContainer::running()
            .with_env("MAIN_COMMAND=\"tail -f /dev/null\"")
            .with_listener(8001, 1),
    );
    let process = h.register("web", ProcessType::Nodejs, "tail -f /dev/null").await;

    let outcome = h.controller.stop(&process).await;
    assert!(outcome.success);
    assert_eq!(outcome.stopped, 0);
    assert!(
        h.engine
            .exec_log("web")
            .iter()
            .all(|cmd| cmd.first().map(String::as_str) != Some("kill"))
    );
}

#[tokio::test]
async fn test_compose_up_failure_is_structured() {
    let h = harness().await;
    h.engine.fail_up("no such image: berth/web");
    let process = h.register("web", ProcessType::Nodejs, "node index.js").await;

    let outcome = h.controller.start(&process).await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, ProcessStatus::Error);
    assert!(outcome.error.unwrap().contains("no such image"));
}

#[tokio::test]
async fn test_name_locks_order_pairs() {
    let locks = NameLocks::default();
    let (_a, _b) = locks.lock_pair("web", "api").await;
    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("api"))
            .await
            .is_err()
    );
}
