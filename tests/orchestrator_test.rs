use colored::Color;
use memepulse::orchestrator::{Orchestrator, ServiceSpec, ServiceState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn shell_spec(name: &'static str, script: &str) -> ServiceSpec {
    ServiceSpec {
        name,
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        color: Color::Cyan,
    }
}

#[tokio::test]
async fn crashed_service_is_respawned_with_the_same_command() {
    let orchestrator = Arc::new(
        Orchestrator::new(vec![shell_spec("crasher", "exit 1")]).with_intervals(
            Duration::from_millis(200),
            Duration::from_millis(50),
            Duration::from_millis(10),
            Duration::from_secs(1),
        ),
    );
    orchestrator.start_all().await;

    let monitor = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_monitor().await })
    };
    // one monitor tick should observe the crash and respawn once
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.abort();

    let history = orchestrator.spawn_history("crasher").await;
    assert!(
        history.len() >= 2,
        "expected at least one respawn, saw {} spawn(s)",
        history.len()
    );
    for respawn in &history[1..] {
        assert_eq!(respawn, &history[0], "respawn must reuse command and args");
    }
}

#[tokio::test]
async fn service_settles_into_running() {
    let orchestrator = Orchestrator::new(vec![shell_spec("sleeper", "sleep 30")]).with_intervals(
        Duration::from_secs(10),
        Duration::from_millis(200),
        Duration::from_millis(10),
        Duration::from_secs(2),
    );
    orchestrator.start_all().await;

    assert_eq!(
        orchestrator.state("sleeper").await,
        Some(ServiceState::Starting)
    );
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        orchestrator.state("sleeper").await,
        Some(ServiceState::Running)
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_the_registry() {
    let orchestrator = Orchestrator::new(vec![
        shell_spec("one", "sleep 30"),
        shell_spec("two", "sleep 30"),
    ])
    .with_intervals(
        Duration::from_secs(10),
        Duration::from_millis(50),
        Duration::from_millis(10),
        Duration::from_secs(2),
    );
    orchestrator.start_all().await;
    assert_eq!(orchestrator.tracked_count().await, 2);

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.tracked_count().await, 0);
}
