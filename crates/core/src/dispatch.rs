//! Maps parsed commands onto engine verbs.
//!
//! This is where refs stop existing: every selector-taking command is
//! resolved against the current ref table before the engine sees it, and
//! the snapshot command is the only writer of that table. Engine errors
//! for element operations are rewritten into actionable messages that
//! point the caller back at the snapshot operation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use ab_protocol::{
    Command, CommandKind, NavigateData, RefMap, Response, ScreenshotData, SnapshotData,
};

use crate::engine::{AutomationEngine, LaunchOptions};
use crate::error::Error;
use crate::registry::SessionConfig;
use crate::snapshot::{build_snapshot, resolve_selector};

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Rewrites element-operation failures into messages that tell the
/// caller what to do next instead of echoing engine internals.
fn rewrite_engine_error(err: &Error, selector: &str) -> String {
    let raw = err.to_string();
    let lower = raw.to_lowercase();
    if lower.contains("timeout") {
        format!(
            "Timeout waiting for element: {selector}. Try using 'snapshot' to see available elements."
        )
    } else if lower.contains("not found") {
        format!(
            "Element not found: {selector}. Use 'snapshot' to find correct ref or selector."
        )
    } else if lower.contains("not visible") {
        format!("Element not visible: {selector}. It may be hidden or off-screen.")
    } else if lower.contains("not interactable") {
        format!("Element not interactable: {selector}. It may be covered by another element.")
    } else {
        raw
    }
}

/// Executes one command against the engine and produces its response.
///
/// `Close` is acknowledged here; tearing the daemon down afterwards is
/// the caller's job.
pub async fn dispatch(
    cmd: &Command,
    engine: &dyn AutomationEngine,
    refs: &RwLock<RefMap>,
    config: &SessionConfig,
) -> Response {
    let id = &cmd.id;
    debug!(target: "ab.daemon", id = %id, action = cmd.kind.action(), "dispatching");

    // Element verbs share the resolve/execute/rewrite shape.
    macro_rules! element_op {
        ($selector:expr, $call:expr) => {{
            let resolved = resolve_selector(&*refs.read().await, $selector);
            #[allow(clippy::redundant_closure_call)]
            match ($call)(resolved.clone()).await {
                Ok(()) => Response::ok_empty(id),
                Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
            }
        }};
    }

    match &cmd.kind {
        CommandKind::Launch { headless, viewport } => {
            let opts = LaunchOptions {
                headless: headless.unwrap_or(!config.headed),
                viewport: *viewport,
                user_data_dir: config.user_data_dir.clone(),
            };
            match engine.launch(opts).await {
                Ok(()) => Response::ok_empty(id),
                Err(e) => Response::err(id, e.to_string()),
            }
        }

        CommandKind::Navigate { url, wait_until } => {
            match engine.navigate(url, wait_until.as_deref()).await {
                Ok((url, title)) => Response::ok(id, &NavigateData { url, title }),
                Err(e) => Response::err(id, e.to_string()),
            }
        }

        CommandKind::Back => match engine.back().await {
            Ok(()) => Response::ok_empty(id),
            Err(e) => Response::err(id, e.to_string()),
        },
        CommandKind::Forward => match engine.forward().await {
            Ok(()) => Response::ok_empty(id),
            Err(e) => Response::err(id, e.to_string()),
        },
        CommandKind::Reload => match engine.reload().await {
            Ok(()) => Response::ok_empty(id),
            Err(e) => Response::err(id, e.to_string()),
        },

        CommandKind::Click { selector } => {
            element_op!(selector, |s: String| async move { engine.click(&s).await })
        }
        CommandKind::DoubleClick { selector } => {
            element_op!(selector, |s: String| async move { engine.double_click(&s).await })
        }
        CommandKind::Fill { selector, value } => {
            element_op!(selector, |s: String| async move { engine.fill(&s, value).await })
        }
        CommandKind::Type { selector, text, delay: _ } => {
            element_op!(selector, |s: String| async move { engine.type_text(&s, text).await })
        }
        CommandKind::Press { key, selector } => {
            // Keys without a target go to the document body.
            let target = selector.as_deref().unwrap_or("body");
            element_op!(target, |s: String| async move { engine.press(&s, key).await })
        }
        CommandKind::Hover { selector } => {
            element_op!(selector, |s: String| async move { engine.hover(&s).await })
        }
        CommandKind::Focus { selector } => {
            element_op!(selector, |s: String| async move { engine.focus(&s).await })
        }
        CommandKind::Check { selector } => {
            element_op!(selector, |s: String| async move { engine.check(&s).await })
        }
        CommandKind::Uncheck { selector } => {
            element_op!(selector, |s: String| async move { engine.uncheck(&s).await })
        }
        CommandKind::Select { selector, values } => {
            let value = values.first().cloned().unwrap_or_default();
            element_op!(selector, |s: String| async move { engine.select(&s, &value).await })
        }

        CommandKind::GetText { selector } => {
            let resolved = resolve_selector(&*refs.read().await, selector);
            match engine.get_text(&resolved).await {
                Ok(text) => Response::ok(id, &json!({ "text": text })),
                Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
            }
        }
        CommandKind::GetAttribute { selector, attribute } => {
            let resolved = resolve_selector(&*refs.read().await, selector);
            match engine.get_attribute(&resolved, attribute).await {
                Ok(value) => Response::ok(id, &json!({ "value": value })),
                Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
            }
        }
        CommandKind::IsVisible { selector } => {
            let resolved = resolve_selector(&*refs.read().await, selector);
            match engine.is_visible(&resolved).await {
                Ok(visible) => Response::ok(id, &json!({ "visible": visible })),
                Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
            }
        }
        CommandKind::Count { selector } => {
            let resolved = resolve_selector(&*refs.read().await, selector);
            match engine.count(&resolved).await {
                Ok(count) => Response::ok(id, &json!({ "count": count })),
                Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
            }
        }

        CommandKind::Evaluate { script } => match engine.evaluate(script).await {
            Ok(result) => Response::ok(id, &json!({ "result": result })),
            Err(e) => Response::err(id, e.to_string()),
        },

        CommandKind::Wait { selector, timeout, state } => {
            match selector {
                None => {
                    // A bare wait pauses only for an explicitly requested
                    // duration; the 30s default applies to element waits.
                    sleep(Duration::from_millis(timeout.unwrap_or(0))).await;
                    Response::ok_empty(id)
                }
                Some(selector) => {
                    let timeout_ms = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
                    let resolved = resolve_selector(&*refs.read().await, selector);
                    let result = if state.as_deref() == Some("hidden") {
                        wait_hidden(engine, &resolved, timeout_ms).await
                    } else {
                        engine.wait_for(&resolved, timeout_ms).await
                    };
                    match result {
                        Ok(()) => Response::ok_empty(id),
                        Err(e) => Response::err(id, rewrite_engine_error(&e, &resolved)),
                    }
                }
            }
        }

        CommandKind::Url => match engine.url().await {
            Ok(url) => Response::ok(id, &json!({ "url": url })),
            Err(e) => Response::err(id, e.to_string()),
        },
        CommandKind::Title => match engine.title().await {
            Ok(title) => Response::ok(id, &json!({ "title": title })),
            Err(e) => Response::err(id, e.to_string()),
        },
        CommandKind::Content { selector } => {
            let resolved = match selector {
                Some(sel) => Some(resolve_selector(&*refs.read().await, sel)),
                None => None,
            };
            match engine.content(resolved.as_deref()).await {
                Ok(content) => Response::ok(id, &json!({ "content": content })),
                Err(e) => {
                    let sel = resolved.as_deref().unwrap_or("");
                    Response::err(id, rewrite_engine_error(&e, sel))
                }
            }
        }

        CommandKind::Screenshot { path, full_page, selector } => {
            let resolved = match selector {
                Some(sel) => Some(resolve_selector(&*refs.read().await, sel)),
                None => None,
            };
            let bytes = match engine.screenshot(*full_page, resolved.as_deref()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let sel = resolved.as_deref().unwrap_or("");
                    return Response::err(id, rewrite_engine_error(&e, sel));
                }
            };
            match path {
                Some(path) => match tokio::fs::write(path, &bytes).await {
                    Ok(()) => Response::ok(
                        id,
                        &ScreenshotData { path: Some(path.clone()), base64: None },
                    ),
                    Err(e) => Response::err(id, format!("failed to write {path}: {e}")),
                },
                None => Response::ok(
                    id,
                    &ScreenshotData { path: None, base64: Some(BASE64.encode(&bytes)) },
                ),
            }
        }

        CommandKind::Snapshot { options } => {
            let mut options = options.clone();
            if let Some(sel) = &options.selector {
                options.selector = Some(resolve_selector(&*refs.read().await, sel));
            }
            let tree = match engine.ax_tree(options.selector.as_deref()).await {
                Ok(tree) => tree,
                Err(e) => return Response::err(id, e.to_string()),
            };
            let snapshot = build_snapshot(tree.as_ref(), &options);
            // The table is replaced wholesale; refs from earlier
            // snapshots are intentionally invalidated.
            *refs.write().await = snapshot.refs.clone();
            Response::ok(id, &SnapshotData::from_snapshot(&snapshot))
        }

        CommandKind::Close => Response::ok_empty(id),
    }
}

async fn wait_hidden(
    engine: &dyn AutomationEngine,
    selector: &str,
    timeout_ms: u64,
) -> crate::Result<()> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if !engine.is_visible(selector).await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout { ms: timeout_ms, what: format!("element {selector} to hide") });
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_errors_point_at_snapshot() {
        let err = Error::Timeout { ms: 5000, what: "element #x".into() };
        let msg = rewrite_engine_error(&err, "#x");
        assert_eq!(
            msg,
            "Timeout waiting for element: #x. Try using 'snapshot' to see available elements."
        );
    }

    #[test]
    fn not_found_errors_point_at_snapshot() {
        let err = Error::Engine("element not found: #missing".into());
        let msg = rewrite_engine_error(&err, "#missing");
        assert_eq!(
            msg,
            "Element not found: #missing. Use 'snapshot' to find correct ref or selector."
        );
    }

    #[test]
    fn visibility_and_interactability_get_distinct_hints() {
        let hidden = Error::Engine("element not visible: #a".into());
        assert!(rewrite_engine_error(&hidden, "#a").contains("hidden or off-screen"));
        let covered = Error::Engine("element not interactable: #a".into());
        assert!(rewrite_engine_error(&covered, "#a").contains("covered by another element"));
    }

    #[test]
    fn unrecognized_errors_pass_through() {
        let err = Error::Engine("websocket closed".into());
        assert_eq!(rewrite_engine_error(&err, "#a"), "engine error: websocket closed");
    }
}
