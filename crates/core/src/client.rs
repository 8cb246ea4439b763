//! Client side of the daemon protocol: connect, exchange frames, stop.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::sleep;
use tracing::{debug, warn};

use ab_protocol::{serialize_command, Command, CommandKind, Response};

use crate::error::{Error, Result};
use crate::registry::{pid_is_alive, SessionRegistry};

#[cfg(unix)]
type DaemonStream = tokio::net::UnixStream;
#[cfg(not(unix))]
type DaemonStream = tokio::net::TcpStream;

const STOP_POLLS: u32 = 50;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One connection to a session daemon. Frames are answered in order, so
/// a single connection is safe to reuse for a whole command sequence.
#[derive(Debug)]
pub struct Client {
    reader: BufReader<ReadHalf<DaemonStream>>,
    writer: WriteHalf<DaemonStream>,
}

impl Client {
    /// Connects to the daemon serving `session`.
    pub async fn connect(registry: &SessionRegistry, session: &str) -> Result<Client> {
        let stream = Self::open_stream(registry, session).await.map_err(|source| {
            Error::Connect { session: session.to_string(), source }
        })?;
        let (read, writer) = tokio::io::split(stream);
        Ok(Client { reader: BufReader::new(read), writer })
    }

    #[cfg(unix)]
    async fn open_stream(
        registry: &SessionRegistry,
        session: &str,
    ) -> std::io::Result<DaemonStream> {
        tokio::net::UnixStream::connect(registry.socket_path(session)).await
    }

    #[cfg(not(unix))]
    async fn open_stream(
        registry: &SessionRegistry,
        session: &str,
    ) -> std::io::Result<DaemonStream> {
        let port = std::fs::read_to_string(registry.port_file(session))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_else(|| SessionRegistry::port_for_session(session));
        tokio::net::TcpStream::connect(("127.0.0.1", port)).await
    }

    /// Sends one command and reads its response frame.
    pub async fn send(&mut self, cmd: &Command) -> Result<Response> {
        let mut frame = serialize_command(cmd)?;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "daemon closed the connection before responding",
            )));
        }
        let resp: Response = serde_json::from_str(line.trim_end())
            .map_err(|e| Error::Engine(format!("malformed response frame: {e}")))?;
        Ok(resp)
    }

    /// Writes one raw line and reads back one raw line. Exists for
    /// callers that construct frames themselves.
    pub async fn send_raw(&mut self, line: &str) -> Result<String> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let n = self.reader.read_line(&mut reply).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "daemon closed the connection before responding",
            )));
        }
        Ok(reply.trim_end().to_string())
    }
}

/// Stops the daemon for `session` if one is running.
///
/// Asks politely over the protocol first, then polls the pid and falls
/// back to killing the process if it lingers. Returns whether a daemon
/// was there to stop.
pub async fn stop_daemon(registry: &SessionRegistry, session: &str) -> Result<bool> {
    if !registry.is_running(session) {
        return Ok(false);
    }
    let pid = registry.read_pid(session);

    match Client::connect(registry, session).await {
        Ok(mut client) => {
            let cmd = Command { id: "stop".into(), kind: CommandKind::Close };
            if let Err(e) = client.send(&cmd).await {
                debug!(target: "ab.session", session, error = %e, "close command failed");
            }
        }
        Err(e) => {
            debug!(target: "ab.session", session, error = %e, "could not connect for close");
        }
    }

    if let Some(pid) = pid {
        for _ in 0..STOP_POLLS {
            // A removed pid file means the daemon finished its own
            // cleanup, even if the process (e.g. a shared host) lives on.
            if !pid_is_alive(pid) || !registry.pid_file(session).exists() {
                registry.remove_artifacts(session);
                return Ok(true);
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
        warn!(target: "ab.session", session, pid, "daemon ignored close, killing");
        kill_process(pid);
    }
    registry.remove_artifacts(session);
    Ok(true)
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status();
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connect_to_absent_daemon_names_the_session() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path());
        let err = Client::connect(&registry, "nobody").await.unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }

    #[tokio::test]
    async fn stop_without_running_daemon_is_a_noop() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path());
        assert!(!stop_daemon(&registry, "nobody").await.unwrap());
    }
}
