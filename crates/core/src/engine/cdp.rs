//! Chrome DevTools Protocol engine.
//!
//! Launches a local Chrome/Chromium with remote debugging enabled,
//! attaches to a fresh page target over websocket, and drives every verb
//! through `Runtime.evaluate` plus a handful of Page/Emulation methods.
//! Request/response correlation uses monotonically increasing ids with a
//! oneshot channel parked per in-flight call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::SinkExt;
use futures_util::stream::{SplitSink, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::snapshot::AxNode;

use super::{AutomationEngine, LaunchOptions};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_POLLS: u32 = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One attached browser: the child process, the page websocket, and the
/// correlation state for in-flight protocol calls.
struct CdpSession {
    child: Child,
    sink: WsSink,
    pending: PendingMap,
    next_id: u64,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpSession {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params });
        let text = serde_json::to_string(&frame)
            .map_err(|e| Error::Engine(format!("failed to encode cdp frame: {e}")))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Engine(format!("cdp send failed: {e}")))?;

        let reply = match timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Engine("cdp connection closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout {
                    ms: CALL_TIMEOUT.as_millis() as u64,
                    what: format!("cdp call {method}"),
                });
            }
        };

        if let Some(err) = reply.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown cdp error");
            return Err(Error::Engine(format!("{method} failed: {message}")));
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluates a javascript expression and returns its by-value result.
    async fn eval(&mut self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("javascript exception");
            return Err(Error::Engine(format!("evaluation failed: {text}")));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Runs an element script that yields `{error}` or `{value}` and maps
    /// the error side onto [`Error::Engine`].
    async fn eval_element(&mut self, script: &str) -> Result<Value> {
        let out = self.eval(script).await?;
        if let Some(message) = out.get("error").and_then(Value::as_str) {
            return Err(Error::Engine(message.to_string()));
        }
        Ok(out.get("value").cloned().unwrap_or(Value::Null))
    }
}

/// Fallible projection from the session slot; every verb goes through
/// this instead of assuming a launched browser.
fn session_mut(slot: &mut Option<CdpSession>) -> Result<&mut CdpSession> {
    slot.as_mut()
        .ok_or_else(|| Error::Engine("browser not launched".into()))
}

/// Quotes a string as a javascript literal.
fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

/// Wraps `body` in an IIFE with `el` bound to the selector match.
/// `body` must return `{error: ...}` or `{value: ...}`.
fn element_script(selector: &str, require_visible: bool, body: &str) -> String {
    let sel = js_quote(selector);
    let visibility_check = if require_visible {
        r#"
    const r = el.getBoundingClientRect();
    const cs = getComputedStyle(el);
    if (r.width === 0 || r.height === 0 || cs.visibility === 'hidden' || cs.display === 'none') {
        return { error: 'element not visible: ' + sel };
    }"#
    } else {
        ""
    };
    format!(
        r#"(() => {{
    const sel = {sel};
    const el = document.querySelector(sel);
    if (!el) {{
        return {{ error: 'element not found: ' + sel }};
    }}{visibility_check}
    {body}
}})()"#
    )
}

const CLICKABILITY_CHECK: &str = r#"
    const cx = r.left + r.width / 2;
    const cy = r.top + r.height / 2;
    const top = document.elementFromPoint(cx, cy);
    if (top && top !== el && !el.contains(top) && !top.contains(el)) {
        return { error: 'element not interactable: ' + sel };
    }"#;

/// Builds the accessibility tree directly from the DOM. Kept as one
/// self-contained script so it can run against any page without prior
/// instrumentation. `__SEL__` is substituted with the scope selector.
const AX_TREE_SCRIPT: &str = r#"(() => {
    const IMPLICIT = {
        a: 'link', button: 'button', select: 'combobox', textarea: 'textbox',
        h1: 'heading', h2: 'heading', h3: 'heading', h4: 'heading', h5: 'heading', h6: 'heading',
        nav: 'navigation', main: 'main', article: 'article', section: 'region',
        ul: 'list', ol: 'list', li: 'listitem', table: 'table', tr: 'row',
        td: 'cell', th: 'columnheader', option: 'option', img: 'img',
        form: 'group', header: 'generic', footer: 'generic', div: 'generic', span: 'generic',
    };
    const TEXT_NAMED = ['button', 'link', 'heading', 'listitem', 'cell',
        'columnheader', 'rowheader', 'menuitem', 'option', 'tab', 'treeitem'];
    function roleOf(el) {
        const explicit = el.getAttribute('role');
        if (explicit) return explicit.toLowerCase();
        const tag = el.tagName.toLowerCase();
        if (tag === 'input') {
            const t = (el.type || 'text').toLowerCase();
            if (t === 'hidden') return null;
            if (t === 'checkbox') return 'checkbox';
            if (t === 'radio') return 'radio';
            if (t === 'range') return 'slider';
            if (t === 'number') return 'spinbutton';
            if (t === 'search') return 'searchbox';
            if (t === 'button' || t === 'submit' || t === 'reset') return 'button';
            return 'textbox';
        }
        if (tag === 'script' || tag === 'style' || tag === 'template') return null;
        return IMPLICIT[tag] || 'generic';
    }
    function nameOf(el, role) {
        const label = el.getAttribute('aria-label');
        if (label) return label;
        const by = el.getAttribute('aria-labelledby');
        if (by) {
            const target = document.getElementById(by);
            if (target) return (target.textContent || '').trim().replace(/\s+/g, ' ');
        }
        if (el.tagName === 'IMG') return el.alt || '';
        if (TEXT_NAMED.includes(role)) {
            return (el.textContent || '').trim().replace(/\s+/g, ' ').slice(0, 100);
        }
        if (el.placeholder) return el.placeholder;
        return '';
    }
    function walk(el) {
        const role = roleOf(el);
        if (role === null) return null;
        const node = { role, name: nameOf(el, role), children: [], properties: {} };
        if (role === 'heading') {
            const m = el.tagName.match(/^H([1-6])$/);
            if (m) node.properties.level = Number(m[1]);
            const explicit = el.getAttribute('aria-level');
            if (explicit) node.properties.level = Number(explicit);
        }
        for (const child of el.children) {
            const sub = walk(child);
            if (sub) node.children.push(sub);
        }
        return node;
    }
    const sel = __SEL__;
    const root = sel ? document.querySelector(sel) : document.body;
    return root ? walk(root) : null;
})()"#;

/// CDP-backed [`AutomationEngine`].
pub struct CdpEngine {
    session: Mutex<Option<CdpSession>>,
    launched: AtomicBool,
}

impl CdpEngine {
    pub fn new() -> Self {
        Self { session: Mutex::new(None), launched: AtomicBool::new(false) }
    }

    fn find_chrome() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("AB_CHROME") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        for candidate in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
        ] {
            if let Ok(path) = which::which(candidate) {
                return Ok(path);
            }
        }
        Err(Error::Startup(
            "chrome binary not found; install chromium or set AB_CHROME".into(),
        ))
    }

    fn free_port() -> Result<u16> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        Ok(listener.local_addr()?.port())
    }

    /// Waits for the debugging endpoint, creates a page target, and
    /// returns its websocket url.
    async fn attach(port: u16) -> Result<String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Startup(format!("http client: {e}")))?;

        let version_url = format!("http://127.0.0.1:{port}/json/version");
        let mut ready = false;
        for _ in 0..STARTUP_POLLS {
            if http.get(&version_url).send().await.is_ok() {
                ready = true;
                break;
            }
            sleep(POLL_INTERVAL).await;
        }
        if !ready {
            return Err(Error::Startup(format!(
                "chrome did not open its debugging port {port} in time"
            )));
        }

        // Newer Chrome requires PUT for target creation.
        let new_url = format!("http://127.0.0.1:{port}/json/new?about:blank");
        let target: Value = http
            .put(&new_url)
            .send()
            .await
            .map_err(|e| Error::Startup(format!("failed to create page target: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Startup(format!("bad target response: {e}")))?;

        target
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Startup("target has no webSocketDebuggerUrl".into()))
    }

    async fn run_element_op(&self, script: &str) -> Result<Value> {
        let mut guard = self.session.lock().await;
        session_mut(&mut guard)?.eval_element(script).await
    }

    async fn run_eval(&self, expression: &str) -> Result<Value> {
        let mut guard = self.session.lock().await;
        session_mut(&mut guard)?.eval(expression).await
    }

    async fn run_call(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.session.lock().await;
        session_mut(&mut guard)?.call(method, params).await
    }
}

impl Default for CdpEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationEngine for CdpEngine {
    async fn launch(&self, opts: LaunchOptions) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let chrome = Self::find_chrome()?;
        let port = Self::free_port()?;

        let user_data_dir = match &opts.user_data_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = std::env::temp_dir().join(format!("agent-browser-profile-{port}"));
                std::fs::create_dir_all(&dir)?;
                dir
            }
        };

        let mut cmd = Command::new(&chrome);
        cmd.arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", user_data_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("about:blank")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if opts.headless {
            cmd.arg("--headless=new");
        }

        debug!(target: "ab.engine", chrome = %chrome.display(), port, "launching browser");
        let child = cmd
            .spawn()
            .map_err(|e| Error::Startup(format!("failed to spawn {}: {e}", chrome.display())))?;

        let ws_url = Self::attach(port).await?;
        let (stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| Error::Startup(format!("websocket attach failed: {e}")))?;
        let (sink, mut read) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                if let Some(id) = value.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = reader_pending.lock().await.remove(&id) {
                        let _ = tx.send(value);
                    }
                }
                // Events are not subscribed to; drop them.
            }
        });

        let mut session = CdpSession { child, sink, pending, next_id: 0, reader };
        session.call("Page.enable", json!({})).await?;
        if let Some(viewport) = &opts.viewport {
            session
                .call(
                    "Emulation.setDeviceMetricsOverride",
                    json!({
                        "width": viewport.width,
                        "height": viewport.height,
                        "deviceScaleFactor": 1,
                        "mobile": false,
                    }),
                )
                .await?;
        }

        *guard = Some(session);
        self.launched.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            return Ok(());
        };
        self.launched.store(false, Ordering::SeqCst);

        if let Err(e) = session.call("Browser.close", json!({})).await {
            debug!(target: "ab.engine", error = %e, "Browser.close failed, killing process");
        }
        session.reader.abort();
        if let Err(e) = session.child.kill().await {
            warn!(target: "ab.engine", error = %e, "failed to kill browser process");
        }
        Ok(())
    }

    fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    async fn navigate(&self, url: &str, wait_until: Option<&str>) -> Result<(String, String)> {
        let ready_state = match wait_until {
            Some("domcontentloaded") => "document.readyState !== 'loading'",
            _ => "document.readyState === 'complete'",
        };

        let mut guard = self.session.lock().await;
        let session = session_mut(&mut guard)?;
        session.call("Page.navigate", json!({ "url": url })).await?;
        for _ in 0..STARTUP_POLLS {
            if session.eval(ready_state).await?.as_bool().unwrap_or(false) {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }
        let info = session
            .eval("({ value: { url: location.href, title: document.title } })")
            .await?;
        let url = info
            .pointer("/value/url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let title = info
            .pointer("/value/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((url, title))
    }

    async fn back(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = session_mut(&mut guard)?;
        let history = session.call("Page.getNavigationHistory", json!({})).await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if current <= 0 {
            return Ok(());
        }
        let entry_id = history
            .get("entries")
            .and_then(Value::as_array)
            .and_then(|e| e.get((current - 1) as usize))
            .and_then(|e| e.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Engine("no history entry to go back to".into()))?;
        session
            .call("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        Ok(())
    }

    async fn forward(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = session_mut(&mut guard)?;
        let history = session.call("Page.getNavigationHistory", json!({})).await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let entry_id = history
            .get("entries")
            .and_then(Value::as_array)
            .and_then(|e| e.get((current + 1) as usize))
            .and_then(|e| e.get("id"))
            .and_then(Value::as_i64);
        if let Some(entry_id) = entry_id {
            session
                .call("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
                .await?;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.run_call("Page.reload", json!({})).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let body = format!("{CLICKABILITY_CHECK}\n    el.click();\n    return {{ value: true }};");
        self.run_element_op(&element_script(selector, true, &body))
            .await?;
        Ok(())
    }

    async fn double_click(&self, selector: &str) -> Result<()> {
        let body = format!(
            "{CLICKABILITY_CHECK}\n    el.dispatchEvent(new MouseEvent('dblclick', {{ bubbles: true }}));\n    return {{ value: true }};"
        );
        self.run_element_op(&element_script(selector, true, &body))
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let value = js_quote(value);
        let body = format!(
            r#"el.focus();
    el.value = {value};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return {{ value: true }};"#
        );
        self.run_element_op(&element_script(selector, false, &body))
            .await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let text = js_quote(text);
        let body = format!(
            r#"el.focus();
    el.value = (el.value || '') + {text};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    return {{ value: true }};"#
        );
        self.run_element_op(&element_script(selector, false, &body))
            .await?;
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> Result<()> {
        let key = js_quote(key);
        let body = format!(
            r#"el.focus();
    for (const kind of ['keydown', 'keypress', 'keyup']) {{
        el.dispatchEvent(new KeyboardEvent(kind, {{ key: {key}, bubbles: true }}));
    }}
    return {{ value: true }};"#
        );
        self.run_element_op(&element_script(selector, false, &body))
            .await?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        let body = "el.dispatchEvent(new MouseEvent('mouseover', { bubbles: true }));\n    el.dispatchEvent(new MouseEvent('mouseenter', { bubbles: true }));\n    return { value: true };";
        self.run_element_op(&element_script(selector, true, body))
            .await?;
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        self.run_element_op(&element_script(
            selector,
            false,
            "el.focus();\n    return { value: true };",
        ))
        .await?;
        Ok(())
    }

    async fn check(&self, selector: &str) -> Result<()> {
        let body = r#"if (!el.checked) {
        el.checked = true;
        el.dispatchEvent(new Event('change', { bubbles: true }));
    }
    return { value: true };"#;
        self.run_element_op(&element_script(selector, false, body))
            .await?;
        Ok(())
    }

    async fn uncheck(&self, selector: &str) -> Result<()> {
        let body = r#"if (el.checked) {
        el.checked = false;
        el.dispatchEvent(new Event('change', { bubbles: true }));
    }
    return { value: true };"#;
        self.run_element_op(&element_script(selector, false, body))
            .await?;
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str) -> Result<()> {
        let value = js_quote(value);
        let body = format!(
            r#"el.value = {value};
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return {{ value: true }};"#
        );
        self.run_element_op(&element_script(selector, false, &body))
            .await?;
        Ok(())
    }

    async fn get_text(&self, selector: &str) -> Result<String> {
        let value = self
            .run_element_op(&element_script(
                selector,
                false,
                "return { value: (el.textContent || '').trim() };",
            ))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn get_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>> {
        let attr = js_quote(attribute);
        let value = self
            .run_element_op(&element_script(
                selector,
                false,
                &format!("return {{ value: el.getAttribute({attr}) }};"),
            ))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        // Missing elements are simply not visible, never an error.
        let sel = js_quote(selector);
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    const r = el.getBoundingClientRect();
    const cs = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && cs.visibility !== 'hidden' && cs.display !== 'none';
}})()"#
        );
        Ok(self.run_eval(&script).await?.as_bool().unwrap_or(false))
    }

    async fn count(&self, selector: &str) -> Result<u64> {
        let sel = js_quote(selector);
        let script = format!("document.querySelectorAll({sel}).length");
        Ok(self.run_eval(&script).await?.as_u64().unwrap_or(0))
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.run_eval(expression).await
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.is_visible(selector).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout { ms: timeout_ms, what: format!("element {selector}") });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn url(&self) -> Result<String> {
        let value = self.run_eval("location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String> {
        let value = self.run_eval("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self, selector: Option<&str>) -> Result<String> {
        let value = match selector {
            Some(sel) => {
                self.run_element_op(&element_script(sel, false, "return { value: el.outerHTML };"))
                    .await?
            }
            None => self.run_eval("document.documentElement.outerHTML").await?,
        };
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self, full_page: bool, selector: Option<&str>) -> Result<Vec<u8>> {
        let mut params = json!({ "format": "png", "captureBeyondViewport": full_page });
        if let Some(sel) = selector {
            let rect = self
                .run_element_op(&element_script(
                    sel,
                    true,
                    r#"return { value: {
        x: r.left + scrollX, y: r.top + scrollY, width: r.width, height: r.height,
    } };"#,
                ))
                .await?;
            params["clip"] = json!({
                "x": rect.get("x").and_then(Value::as_f64).unwrap_or(0.0),
                "y": rect.get("y").and_then(Value::as_f64).unwrap_or(0.0),
                "width": rect.get("width").and_then(Value::as_f64).unwrap_or(0.0),
                "height": rect.get("height").and_then(Value::as_f64).unwrap_or(0.0),
                "scale": 1,
            });
            params["captureBeyondViewport"] = Value::Bool(true);
        }

        let result = self.run_call("Page.captureScreenshot", params).await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Engine("screenshot returned no data".into()))?;
        BASE64
            .decode(data)
            .map_err(|e| Error::Engine(format!("screenshot decode failed: {e}")))
    }

    async fn ax_tree(&self, selector: Option<&str>) -> Result<Option<AxNode>> {
        let scope = match selector {
            Some(sel) => js_quote(sel),
            None => "null".to_string(),
        };
        let script = AX_TREE_SCRIPT.replace("__SEL__", &scope);
        let value = self.run_eval(&script).await?;
        if value.is_null() {
            return Ok(None);
        }
        let node: AxNode = serde_json::from_value(value)
            .map_err(|e| Error::Engine(format!("malformed accessibility tree: {e}")))?;
        Ok(Some(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_script_embeds_quoted_selector() {
        let script = element_script("[role=\"button\"]", false, "return { value: true };");
        assert!(script.contains(r#"const sel = "[role=\"button\"]";"#));
        assert!(!script.contains("getBoundingClientRect"));
    }

    #[test]
    fn element_script_with_visibility_gate() {
        let script = element_script("#x", true, "return { value: true };");
        assert!(script.contains("element not visible"));
    }

    #[test]
    fn js_quote_escapes() {
        assert_eq!(js_quote("a\"b"), r#""a\"b""#);
        assert_eq!(js_quote("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn ax_tree_script_takes_a_scope_selector() {
        let scoped = AX_TREE_SCRIPT.replace("__SEL__", &js_quote("#app"));
        assert!(scoped.contains(r##"const sel = "#app";"##));
    }

    #[tokio::test]
    async fn unlaunched_engine_refuses_verbs() {
        let engine = CdpEngine::new();
        let err = engine.url().await.unwrap_err();
        assert!(err.to_string().contains("not launched"));
    }
}
