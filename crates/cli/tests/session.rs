//! Session preparation against a live in-process daemon: reuse when the
//! saved configuration matches, restart when it does not.

#![cfg(unix)]

use std::time::Duration;

use tempfile::tempdir;
use tokio::time::sleep;

use ab_cli::commands::session::prepare_session;
use ab_cli::commands::Globals;
use ab_core::daemon::Daemon;
use ab_core::engine::create_engine;
use ab_core::registry::{SessionConfig, SessionRegistry};

fn globals(session: &str, backend: Option<&str>) -> Globals {
    Globals {
        session: session.to_string(),
        json: false,
        headed: false,
        backend: backend.map(str::to_string),
        user_data_dir: None,
    }
}

/// Runs a daemon for `session` in this process and waits for it to bind.
/// The engine stays unlaunched, so no browser is involved.
async fn start_daemon(
    registry: &SessionRegistry,
    session: &str,
) -> tokio::task::JoinHandle<ab_core::Result<()>> {
    let engine = create_engine("cdp").unwrap();
    let daemon = Daemon::new(session, registry.clone(), engine);
    let handle = tokio::spawn(async move { daemon.run().await });

    let artifact = registry.listener_artifact(session);
    for _ in 0..50 {
        if artifact.exists() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(artifact.exists(), "daemon never bound its socket");
    handle
}

#[tokio::test]
async fn backend_change_stops_the_old_daemon_and_saves_the_new_backend() {
    let dir = tempdir().unwrap();
    let registry = SessionRegistry::new(dir.path());
    registry.save_config("switch", &SessionConfig::default()).unwrap();
    let daemon = start_daemon(&registry, "switch").await;
    assert!(registry.is_running("switch"));

    // Asking for a different backend must bring the old daemon down and
    // persist the new choice before any replacement is spawned, so the
    // next daemon reads the new backend at startup.
    let must_spawn = prepare_session(&registry, &globals("switch", Some("remote")), false)
        .await
        .unwrap();

    assert!(must_spawn);
    assert!(!registry.is_running("switch"));
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("old daemon did not shut down")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(registry.load_config("switch").backend, "remote");
}

#[tokio::test]
async fn matching_configuration_reuses_the_running_daemon() {
    let dir = tempdir().unwrap();
    let registry = SessionRegistry::new(dir.path());
    registry.save_config("steady", &SessionConfig::default()).unwrap();
    let daemon = start_daemon(&registry, "steady").await;

    let must_spawn = prepare_session(&registry, &globals("steady", Some("cdp")), false)
        .await
        .unwrap();

    assert!(!must_spawn);
    assert!(registry.is_running("steady"));

    daemon.abort();
}

#[tokio::test]
async fn absent_daemon_requires_a_spawn_and_saves_the_config() {
    let dir = tempdir().unwrap();
    let registry = SessionRegistry::new(dir.path());

    let must_spawn = prepare_session(&registry, &globals("fresh", Some("cdp")), false)
        .await
        .unwrap();

    assert!(must_spawn);
    assert_eq!(registry.load_config("fresh").backend, "cdp");
}
