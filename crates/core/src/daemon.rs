//! The per-session daemon: listener lifecycle, connection handling, and
//! teardown.
//!
//! One daemon owns one session name, one engine instance, and one ref
//! table. It listens on a unix socket (loopback TCP elsewhere), serves
//! newline-delimited JSON frames, and removes every registry artifact it
//! created before exiting, on `close` and on signals alike.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use ab_protocol::{parse_command, CommandKind, RefMap, Response};

use crate::dispatch::dispatch;
use crate::engine::{AutomationEngine, LaunchOptions};
use crate::error::{Error, Result};
use crate::registry::{SessionConfig, SessionRegistry};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period between acknowledging `close` and tearing down, so the
/// response frame reaches the client before the socket disappears.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Shared per-session state handed to every connection task.
struct Shared {
    engine: Arc<dyn AutomationEngine>,
    refs: RwLock<RefMap>,
    config: SessionConfig,
    shutdown: Notify,
    closing: AtomicBool,
}

impl Shared {
    fn request_shutdown(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
        }
    }
}

pub struct Daemon {
    session: String,
    registry: SessionRegistry,
    shared: Arc<Shared>,
}

impl Daemon {
    pub fn new(
        session: impl Into<String>,
        registry: SessionRegistry,
        engine: Arc<dyn AutomationEngine>,
    ) -> Self {
        let session = session.into();
        let config = registry.load_config(&session);
        Daemon {
            session,
            registry,
            shared: Arc::new(Shared {
                engine,
                refs: RwLock::new(RefMap::new()),
                config,
                shutdown: Notify::new(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Serves the session until `close` or a termination signal, then
    /// cleans up and returns.
    pub async fn run(&self) -> Result<()> {
        // A previous daemon that died without cleanup leaves its listener
        // artifact behind; binding requires it gone.
        let artifact = self.registry.listener_artifact(&self.session);
        if artifact.exists() {
            std::fs::remove_file(&artifact)?;
        }

        let listener = self.bind().await?;
        self.registry.write_pid(&self.session, std::process::id())?;
        info!(target: "ab.daemon", session = %self.session, "daemon listening");

        let mut connections = JoinSet::new();
        let result = self.accept_loop(&listener, &mut connections).await;

        // Let in-flight responses finish before the engine goes away;
        // connections still idle after the grace period are cut off.
        let drained = timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        if let Err(e) = self.shared.engine.close().await {
            warn!(target: "ab.daemon", error = %e, "engine close failed during shutdown");
        }
        self.registry.remove_artifacts(&self.session);
        info!(target: "ab.daemon", session = %self.session, "daemon stopped");
        result
    }

    #[cfg(unix)]
    async fn bind(&self) -> Result<tokio::net::UnixListener> {
        let path = self.registry.socket_path(&self.session);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tokio::net::UnixListener::bind(&path)
            .map_err(|e| Error::Startup(format!("failed to bind {}: {e}", path.display())))
    }

    #[cfg(not(unix))]
    async fn bind(&self) -> Result<tokio::net::TcpListener> {
        let port = SessionRegistry::port_for_session(&self.session);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::Startup(format!("failed to bind 127.0.0.1:{port}: {e}")))?;
        let port_file = self.registry.port_file(&self.session);
        if let Some(parent) = port_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&port_file, port.to_string())?;
        Ok(listener)
    }

    #[cfg(unix)]
    async fn accept_loop(
        &self,
        listener: &tokio::net::UnixListener,
        connections: &mut JoinSet<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let shared = Arc::clone(&self.shared);
                    connections.spawn(async move { handle_connection(stream, shared).await });
                }
                _ = self.shared.shutdown.notified() => return Ok(()),
                _ = termination_signal() => {
                    info!(target: "ab.daemon", session = %self.session, "termination signal");
                    return Ok(());
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn accept_loop(
        &self,
        listener: &tokio::net::TcpListener,
        connections: &mut JoinSet<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let shared = Arc::clone(&self.shared);
                    connections.spawn(async move { handle_connection(stream, shared).await });
                }
                _ = self.shared.shutdown.notified() => return Ok(()),
                _ = termination_signal() => {
                    info!(target: "ab.daemon", session = %self.session, "termination signal");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(target: "ab.daemon", error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Serves one client connection.
///
/// Malformed frames produce an error response and the connection stays
/// open; only EOF, IO failure, or an acknowledged `close` end the loop.
async fn handle_connection<S>(stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                debug!(target: "ab.daemon", error = %e, "connection read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                // No trustworthy id to echo for an unparseable frame.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|i| i.as_str().map(str::to_string)))
                    .unwrap_or_default();
                if write_frame(&mut write, &Response::err(id, e.to_string())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        // Commands other than launch/close expect a browser; bring one up
        // from the saved session config on first use.
        let needs_browser =
            !matches!(cmd.kind, CommandKind::Launch { .. } | CommandKind::Close);
        if needs_browser && !shared.engine.is_launched() {
            let opts = LaunchOptions {
                headless: !shared.config.headed,
                viewport: None,
                user_data_dir: shared.config.user_data_dir.clone(),
            };
            if let Err(e) = shared.engine.launch(opts).await {
                let resp = Response::err(&cmd.id, format!("browser launch failed: {e}"));
                if write_frame(&mut write, &resp).await.is_err() {
                    return;
                }
                continue;
            }
        }

        let is_close = matches!(cmd.kind, CommandKind::Close);
        let resp = dispatch(&cmd, shared.engine.as_ref(), &shared.refs, &shared.config).await;
        if write_frame(&mut write, &resp).await.is_err() {
            return;
        }

        if is_close {
            sleep(CLOSE_GRACE).await;
            shared.request_shutdown();
            return;
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(write: &mut W, resp: &Response) -> std::io::Result<()> {
    let mut frame = resp.to_wire();
    frame.push('\n');
    write.write_all(frame.as_bytes()).await?;
    write.flush().await
}
