//! Automation engine abstraction.
//!
//! The daemon owns exactly one engine for its lifetime and talks to it
//! only through this trait, so backends can be swapped per session
//! without touching dispatch. Engines serialize their own command
//! execution internally; callers may invoke methods from concurrent
//! tasks.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::snapshot::AxNode;
use ab_protocol::Viewport;

mod cdp;

pub use cdp::CdpEngine;

/// Browser launch parameters, resolved from the session config and the
/// launch command before the engine ever starts.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub viewport: Option<Viewport>,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self { headless: true, viewport: None, user_data_dir: None }
    }
}

/// One live browser, driven by selector-addressed verbs.
///
/// Selector-taking methods receive selectors that are already resolved:
/// ref translation happens in dispatch, before the engine is involved.
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    async fn launch(&self, opts: LaunchOptions) -> Result<()>;
    async fn close(&self) -> Result<()>;

    /// Cheap synchronous check used to decide whether auto-launch is
    /// needed before dispatching a command.
    fn is_launched(&self) -> bool;

    /// Navigates and returns the settled (url, title).
    async fn navigate(&self, url: &str, wait_until: Option<&str>) -> Result<(String, String)>;
    async fn back(&self) -> Result<()>;
    async fn forward(&self) -> Result<()>;
    async fn reload(&self) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;
    async fn double_click(&self, selector: &str) -> Result<()>;
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    async fn press(&self, selector: &str, key: &str) -> Result<()>;
    async fn hover(&self, selector: &str) -> Result<()>;
    async fn focus(&self, selector: &str) -> Result<()>;
    async fn check(&self, selector: &str) -> Result<()>;
    async fn uncheck(&self, selector: &str) -> Result<()>;
    async fn select(&self, selector: &str, value: &str) -> Result<()>;

    async fn get_text(&self, selector: &str) -> Result<String>;
    async fn get_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>>;
    async fn is_visible(&self, selector: &str) -> Result<bool>;
    async fn count(&self, selector: &str) -> Result<u64>;

    async fn evaluate(&self, expression: &str) -> Result<Value>;
    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;

    /// Page HTML, or the outer HTML of `selector`'s match when given.
    async fn content(&self, selector: Option<&str>) -> Result<String>;

    /// PNG bytes; scoped to `selector`'s bounding box when given.
    async fn screenshot(&self, full_page: bool, selector: Option<&str>) -> Result<Vec<u8>>;

    /// Raw accessibility tree for the current page, scoped to `selector`
    /// when given. `None` when the page has no document yet.
    async fn ax_tree(&self, selector: Option<&str>) -> Result<Option<AxNode>>;
}

impl std::fmt::Debug for dyn AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AutomationEngine")
    }
}

/// Instantiates the engine named by a session's backend setting.
pub fn create_engine(backend: &str) -> Result<Arc<dyn AutomationEngine>> {
    match backend {
        "cdp" => Ok(Arc::new(CdpEngine::new())),
        other => Err(Error::Engine(format!("unknown backend '{other}'"))),
    }
}
