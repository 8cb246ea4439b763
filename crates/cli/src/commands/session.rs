//! Session daemon lifecycle from the client side: ensure one is up,
//! list them, stop them.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::time::sleep;
use tracing::{debug, info};

use ab_core::client::{stop_daemon, Client};
use ab_core::registry::{SessionConfig, SessionRegistry};

use super::Globals;

const START_POLLS: u32 = 50;
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn list(registry: &SessionRegistry) -> anyhow::Result<()> {
    for session in registry.list_running() {
        println!("{session}");
    }
    Ok(())
}

pub async fn stop(registry: &SessionRegistry, session: &str, all: bool) -> anyhow::Result<()> {
    if all {
        for session in registry.list_running() {
            if stop_daemon(registry, &session).await? {
                println!("stopped {session}");
            }
        }
        return Ok(());
    }
    if stop_daemon(registry, session).await? {
        println!("stopped {session}");
    } else {
        println!("no daemon running for session '{session}'");
    }
    Ok(())
}

/// Brings the session's saved state in line with the request: stops a
/// running daemon whose effective configuration materially differs, and
/// persists the merged preferences a new daemon would read at startup.
///
/// Returns `false` when the existing daemon can be reused as-is, `true`
/// when the caller must spawn a fresh one.
pub async fn prepare_session(
    registry: &SessionRegistry,
    globals: &Globals,
    launch_action: bool,
) -> anyhow::Result<bool> {
    if registry.is_running(&globals.session) {
        let restart = registry.needs_restart(
            &globals.session,
            globals.backend.as_deref(),
            globals.user_data_dir.as_deref(),
            globals.headed,
            launch_action,
        );
        if !restart {
            return Ok(false);
        }
        info!(
            target: "ab.session",
            session = %globals.session,
            "configuration changed, restarting daemon"
        );
        // The old daemon must be gone before the new config lands, so
        // its shutdown cleanup cannot race the replacement's artifacts.
        stop_daemon(registry, &globals.session).await?;
    }

    let saved = registry.load_config(&globals.session);
    let config = SessionConfig {
        backend: globals.backend.clone().unwrap_or(saved.backend),
        headed: globals.headed,
        user_data_dir: globals.user_data_dir.clone().or(saved.user_data_dir),
    };
    registry.save_config(&globals.session, &config)?;
    Ok(true)
}

/// Returns a client connected to this session's daemon, starting or
/// restarting the daemon first when necessary.
pub async fn ensure_daemon(
    registry: &SessionRegistry,
    globals: &Globals,
    launch_action: bool,
) -> anyhow::Result<Client> {
    if !prepare_session(registry, globals, launch_action).await? {
        return Ok(Client::connect(registry, &globals.session).await?);
    }

    spawn_daemon(&globals.session)?;

    for _ in 0..START_POLLS {
        if registry.is_running(&globals.session) {
            if let Ok(client) = Client::connect(registry, &globals.session).await {
                return Ok(client);
            }
        }
        sleep(START_POLL_INTERVAL).await;
    }
    bail!("daemon for session '{}' failed to start", globals.session)
}

/// Re-executes this binary as a detached `daemon run` process.
fn spawn_daemon(session: &str) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("could not locate own executable")?;
    debug!(target: "ab.session", session, exe = %exe.display(), "spawning daemon");
    std::process::Command::new(exe)
        .args(["daemon", "run", "--session", session])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn session daemon")?;
    Ok(())
}
