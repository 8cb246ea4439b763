//! Session registry: per-session artifacts in one shared runtime directory.
//!
//! The registry is the only component that touches the runtime directory.
//! Readers tolerate races by treating any missing or malformed file as
//! "not running" instead of erroring. The root directory is injected so
//! tests can point the registry at a temp dir.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Default backend used when a session has no saved preference.
pub const DEFAULT_BACKEND: &str = "cdp";

/// Saved launch preferences for a session, written before its daemon is
/// started and read back by the daemon's auto-launch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub backend: String,
    pub headed: bool,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            headed: false,
            user_data_dir: None,
        }
    }
}

/// Path resolution and liveness checks for session daemons.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    root: PathBuf,
}

impl SessionRegistry {
    /// Creates a registry rooted at `root`. The directory is created on
    /// demand by write operations.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The system-wide registry under the OS temp directory.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir().join("agent-browser"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_file(&self, session: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{session}.{ext}"))
    }

    pub fn pid_file(&self, session: &str) -> PathBuf {
        self.session_file(session, "pid")
    }

    pub fn socket_path(&self, session: &str) -> PathBuf {
        self.session_file(session, "sock")
    }

    pub fn port_file(&self, session: &str) -> PathBuf {
        self.session_file(session, "port")
    }

    fn backend_file(&self, session: &str) -> PathBuf {
        self.session_file(session, "backend")
    }

    fn headed_file(&self, session: &str) -> PathBuf {
        self.session_file(session, "headed")
    }

    fn user_data_dir_file(&self, session: &str) -> PathBuf {
        self.session_file(session, "userdir")
    }

    /// The listen-address artifact for this platform: socket file on
    /// Unix, port sidecar file elsewhere.
    pub fn listener_artifact(&self, session: &str) -> PathBuf {
        #[cfg(unix)]
        {
            self.socket_path(session)
        }
        #[cfg(not(unix))]
        {
            self.port_file(session)
        }
    }

    /// Stable session-name → loopback-port mapping for platforms without
    /// filesystem sockets. Dynamic/private port range.
    pub fn port_for_session(session: &str) -> u16 {
        let mut hasher = DefaultHasher::new();
        session.hash(&mut hasher);
        49152 + (hasher.finish() % (65535 - 49152)) as u16
    }

    fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn write_pid(&self, session: &str, pid: u32) -> Result<()> {
        self.ensure_root()?;
        std::fs::write(self.pid_file(session), pid.to_string())?;
        Ok(())
    }

    pub fn read_pid(&self, session: &str) -> Option<u32> {
        let data = std::fs::read_to_string(self.pid_file(session)).ok()?;
        data.trim().parse().ok()
    }

    /// Persists launch preferences for the session.
    pub fn save_config(&self, session: &str, config: &SessionConfig) -> Result<()> {
        self.ensure_root()?;
        std::fs::write(self.backend_file(session), &config.backend)?;
        std::fs::write(
            self.headed_file(session),
            if config.headed { "true" } else { "false" },
        )?;
        match &config.user_data_dir {
            Some(dir) => {
                std::fs::write(self.user_data_dir_file(session), dir.display().to_string())?
            }
            None => {
                let _ = std::fs::remove_file(self.user_data_dir_file(session));
            }
        }
        Ok(())
    }

    /// Loads saved preferences, falling back to defaults for anything
    /// missing or malformed.
    pub fn load_config(&self, session: &str) -> SessionConfig {
        let backend = std::fs::read_to_string(self.backend_file(session))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let headed = std::fs::read_to_string(self.headed_file(session))
            .map(|s| s.trim() == "true")
            .unwrap_or(false);
        let user_data_dir = std::fs::read_to_string(self.user_data_dir_file(session))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        SessionConfig { backend, headed, user_data_dir }
    }

    /// Returns true only when the recorded pid is alive *and* the
    /// listen-address artifact exists. Partial state is treated as
    /// not-running and the stale pid file is removed as a side effect.
    pub fn is_running(&self, session: &str) -> bool {
        let Some(pid) = self.read_pid(session) else {
            return false;
        };

        if !pid_is_alive(pid) {
            debug!(target: "ab.session", session, pid, "stale pid file, removing");
            let _ = std::fs::remove_file(self.pid_file(session));
            return false;
        }

        if !self.listener_artifact(session).exists() {
            debug!(target: "ab.session", session, "listener artifact missing, removing pid file");
            let _ = std::fs::remove_file(self.pid_file(session));
            return false;
        }

        true
    }

    /// Enumerates sessions with a live daemon by scanning for listener
    /// artifacts and re-validating each with [`Self::is_running`].
    pub fn list_running(&self) -> Vec<String> {
        let suffix = if cfg!(unix) { ".sock" } else { ".port" };
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut sessions: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(suffix).map(str::to_string)
            })
            .filter(|session| self.is_running(session))
            .collect();
        sessions.sort();
        sessions
    }

    /// Decides whether a running daemon must be replaced because the
    /// requested configuration materially differs from the saved one.
    ///
    /// Backend and user-data-dir changes always force a restart; the
    /// headed flag only matters for launch-type actions, since other
    /// commands ignore it.
    pub fn needs_restart(
        &self,
        session: &str,
        backend: Option<&str>,
        user_data_dir: Option<&Path>,
        headed: bool,
        launch_action: bool,
    ) -> bool {
        let saved = self.load_config(session);

        if let Some(backend) = backend {
            if saved.backend != backend {
                return true;
            }
        }
        if let Some(dir) = user_data_dir {
            if saved.user_data_dir.as_deref() != Some(dir) {
                return true;
            }
        }
        if launch_action && saved.headed != headed {
            return true;
        }
        false
    }

    /// Removes every artifact for the session (daemon shutdown path).
    pub fn remove_artifacts(&self, session: &str) {
        let _ = std::fs::remove_file(self.pid_file(session));
        let _ = std::fs::remove_file(self.listener_artifact(session));
    }
}

/// Returns `true` when a process with `pid` appears alive on this
/// platform.
pub fn pid_is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 {
            return false;
        }
        if PathBuf::from("/proc").join(pid.to_string()).exists() {
            return true;
        }
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(pid == std::process::id())
    }

    #[cfg(windows)]
    {
        let filter = format!("PID eq {pid}");
        std::process::Command::new("tasklist")
            .args(["/FI", &filter, "/FO", "CSV", "/NH"])
            .output()
            .map(|output| {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let pid_field = format!("\"{pid}\"");
                output.status.success() && stdout.contains(&pid_field)
            })
            .unwrap_or(pid == std::process::id())
    }

    #[cfg(not(any(unix, windows)))]
    {
        pid == std::process::id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> (tempfile::TempDir, SessionRegistry) {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path());
        (dir, registry)
    }

    fn mark_running(registry: &SessionRegistry, session: &str) {
        registry.write_pid(session, std::process::id()).unwrap();
        std::fs::write(registry.listener_artifact(session), "").unwrap();
    }

    #[test]
    fn config_round_trips() {
        let (_dir, registry) = registry();
        let config = SessionConfig {
            backend: "cdp".into(),
            headed: true,
            user_data_dir: Some(PathBuf::from("/tmp/profile")),
        };
        registry.save_config("work", &config).unwrap();
        assert_eq!(registry.load_config("work"), config);
    }

    #[test]
    fn missing_config_yields_defaults() {
        let (_dir, registry) = registry();
        let config = registry.load_config("nobody");
        assert_eq!(config.backend, DEFAULT_BACKEND);
        assert!(!config.headed);
        assert!(config.user_data_dir.is_none());
    }

    #[test]
    fn is_running_requires_pid_and_listener_artifact() {
        let (_dir, registry) = registry();
        assert!(!registry.is_running("default"));

        // Pid alone is not enough.
        registry.write_pid("default", std::process::id()).unwrap();
        assert!(!registry.is_running("default"));
        // The partial pid file was cleaned up.
        assert!(registry.read_pid("default").is_none());

        mark_running(&registry, "default");
        assert!(registry.is_running("default"));
    }

    #[test]
    fn dead_pid_is_cleaned_up() {
        let (_dir, registry) = registry();
        // Pid far beyond pid_max on any test machine.
        registry.write_pid("stale", 4_000_000).unwrap();
        std::fs::write(registry.listener_artifact("stale"), "").unwrap();
        assert!(!registry.is_running("stale"));
        assert!(!registry.pid_file("stale").exists());
    }

    #[test]
    fn list_running_revalidates_each_session() {
        let (_dir, registry) = registry();
        mark_running(&registry, "alpha");
        mark_running(&registry, "beta");
        // Listener artifact without a pid file: stale, must be skipped.
        std::fs::write(registry.listener_artifact("ghost"), "").unwrap();

        assert_eq!(registry.list_running(), vec!["alpha", "beta"]);
    }

    #[test]
    fn restart_needed_on_backend_change() {
        let (_dir, registry) = registry();
        registry.save_config("s", &SessionConfig::default()).unwrap();
        assert!(registry.needs_restart("s", Some("remote"), None, false, false));
        assert!(!registry.needs_restart("s", Some(DEFAULT_BACKEND), None, false, false));
        assert!(!registry.needs_restart("s", None, None, false, false));
    }

    #[test]
    fn restart_needed_on_user_data_dir_change() {
        let (_dir, registry) = registry();
        registry.save_config("s", &SessionConfig::default()).unwrap();
        assert!(registry.needs_restart("s", None, Some(Path::new("/tmp/p")), false, false));
    }

    #[test]
    fn headed_change_only_matters_for_launch_actions() {
        let (_dir, registry) = registry();
        registry.save_config("s", &SessionConfig::default()).unwrap();
        assert!(!registry.needs_restart("s", None, None, true, false));
        assert!(registry.needs_restart("s", None, None, true, true));
        assert!(!registry.needs_restart("s", None, None, false, true));
    }

    #[test]
    fn session_port_is_stable_and_in_dynamic_range() {
        let port = SessionRegistry::port_for_session("default");
        assert_eq!(port, SessionRegistry::port_for_session("default"));
        assert!(port >= 49152);
        assert_ne!(port, SessionRegistry::port_for_session("other"));
    }

    #[test]
    fn remove_artifacts_clears_session_state() {
        let (_dir, registry) = registry();
        mark_running(&registry, "gone");
        registry.remove_artifacts("gone");
        assert!(!registry.pid_file("gone").exists());
        assert!(!registry.listener_artifact("gone").exists());
    }
}
