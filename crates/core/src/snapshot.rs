//! Snapshot engine: accessibility tree → filtered outline + ref table.
//!
//! Two entry points share one set of classification/ref/disambiguation
//! rules: [`build_snapshot`] walks a structured [`AxNode`] tree, and
//! [`process_outline`] re-processes an already-rendered indented outline
//! line by line. Ref ids are minted from a counter owned by the builder
//! and reset on every call; they are only meaningful within the snapshot
//! generation that produced them.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

use ab_protocol::{EnhancedSnapshot, RefData, RefMap, SnapshotOptions};

/// Rendered when an interactive-only snapshot matched nothing.
pub const NO_INTERACTIVE_SENTINEL: &str = "(no interactive elements)";
/// Rendered when there was no tree at all.
pub const EMPTY_SENTINEL: &str = "(empty)";

/// Roles that receive refs and survive interactive-only filtering.
pub fn is_interactive_role(role: &str) -> bool {
    matches!(
        role,
        "button"
            | "link"
            | "textbox"
            | "checkbox"
            | "radio"
            | "combobox"
            | "listbox"
            | "menuitem"
            | "menuitemcheckbox"
            | "menuitemradio"
            | "option"
            | "searchbox"
            | "slider"
            | "spinbutton"
            | "switch"
            | "tab"
            | "treeitem"
    )
}

/// Roles that carry meaning only when named; named ones receive refs.
pub fn is_content_role(role: &str) -> bool {
    matches!(
        role,
        "heading"
            | "cell"
            | "gridcell"
            | "columnheader"
            | "rowheader"
            | "listitem"
            | "article"
            | "region"
            | "main"
            | "navigation"
    )
}

/// Generic containers with no inherent semantics.
pub fn is_structural_role(role: &str) -> bool {
    matches!(
        role,
        "generic"
            | "group"
            | "list"
            | "table"
            | "row"
            | "rowgroup"
            | "grid"
            | "treegrid"
            | "menu"
            | "menubar"
            | "toolbar"
            | "tablist"
            | "tree"
            | "directory"
            | "document"
            | "application"
            | "presentation"
            | "none"
    )
}

/// One node of the raw accessibility tree produced by the engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AxNode {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub children: Vec<AxNode>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

/// Derives a position-independent selector from (role, name).
///
/// Collisions between same-named nodes are expected; `nth` is the only
/// disambiguator and callers must apply it themselves.
pub fn build_selector(role: &str, name: &str) -> String {
    if name.is_empty() {
        format!(r#"[role="{role}"]"#)
    } else {
        let escaped = name.replace('"', "\\\"");
        format!(r#"[role="{role}"][aria-label="{escaped}"]"#)
    }
}

/// Ref-minting state for one snapshot generation.
struct RefMinter {
    refs: RefMap,
    counter: u32,
    seen: HashMap<String, u32>,
}

impl RefMinter {
    fn new() -> Self {
        Self { refs: RefMap::new(), counter: 0, seen: HashMap::new() }
    }

    /// Mints the next ref for (role, name), returning the ref id and the
    /// 0-based nth occurrence of this (role, name) pair.
    fn mint(&mut self, role: &str, name: &str) -> (String, u32) {
        self.counter += 1;
        let id = format!("e{}", self.counter);

        let key = format!("{role}:{name}");
        let nth = *self.seen.get(&key).unwrap_or(&0);
        self.seen.insert(key, nth + 1);

        self.refs.insert(
            id.clone(),
            RefData {
                selector: build_selector(role, name),
                role: role.to_string(),
                name: name.to_string(),
                nth,
            },
        );
        (id, nth)
    }
}

/// Builds an enhanced snapshot from a structured accessibility tree.
pub fn build_snapshot(root: Option<&AxNode>, opts: &SnapshotOptions) -> EnhancedSnapshot {
    let mut minter = RefMinter::new();
    let mut out = String::new();

    if let Some(root) = root {
        render_node(&mut out, root, &mut minter, opts, 0);
    } else {
        return EnhancedSnapshot { tree: EMPTY_SENTINEL.to_string(), refs: minter.refs };
    }

    let tree = finish_tree(out, opts);
    EnhancedSnapshot { tree, refs: minter.refs }
}

fn finish_tree(out: String, opts: &SnapshotOptions) -> String {
    let trimmed = out.trim();
    if trimmed.is_empty() {
        if opts.interactive {
            NO_INTERACTIVE_SENTINEL.to_string()
        } else {
            EMPTY_SENTINEL.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

fn render_node(
    out: &mut String,
    node: &AxNode,
    minter: &mut RefMinter,
    opts: &SnapshotOptions,
    depth: u32,
) {
    if opts.max_depth > 0 && depth > opts.max_depth {
        return;
    }

    let role = node.role.to_lowercase();
    let name = node.name.as_str();

    let interactive = is_interactive_role(&role);
    let content = is_content_role(&role);
    let structural = is_structural_role(&role);

    // Elided nodes still have their children visited: interactivity can
    // be nested inside decorative wrappers. Depth is not consumed.
    let elide = (opts.interactive && !interactive)
        || (opts.compact && structural && name.is_empty())
        || ((role == "generic" || role == "none") && name.is_empty());
    if elide {
        for child in &node.children {
            render_node(out, child, minter, opts, depth);
        }
        return;
    }

    let mut line = format!("{}- {}", "  ".repeat(depth as usize), role);
    if !name.is_empty() {
        line.push_str(&format!(" \"{name}\""));
    }

    if interactive || (content && !name.is_empty()) {
        let (id, nth) = minter.mint(&role, name);
        line.push_str(&format!(" [ref={id}]"));
        if nth > 0 {
            line.push_str(&format!(" [nth={nth}]"));
        }
    }

    if role == "heading" {
        if let Some(level) = node.properties.get("level").and_then(Value::as_f64) {
            line.push_str(&format!(" [level={}]", level as i64));
        }
    }

    out.push_str(&line);
    out.push('\n');

    for child in &node.children {
        render_node(out, child, minter, opts, depth + 1);
    }
}

/// Re-processes an already-rendered indented outline, applying the same
/// classification/ref/disambiguation rules line by line.
///
/// Refs minted here resolve identically to tree-built ones downstream.
// Lines look like:  - button "Submit"  /  - heading "Title" [level=1]
static OUTLINE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*-\s*)(\w+)(?:\s+"([^"]*)")?(.*)$"#)
        .expect("OUTLINE_LINE_RE should compile")
});

pub fn process_outline(outline: &str, opts: &SnapshotOptions) -> EnhancedSnapshot {
    let mut minter = RefMinter::new();
    let mut kept: Vec<String> = Vec::new();

    for line in outline.lines() {
        let Some(caps) = OUTLINE_LINE_RE.captures(line) else {
            // Metadata or plain text content.
            if !opts.interactive {
                kept.push(line.to_string());
            }
            continue;
        };

        let prefix = caps.get(1).map_or("", |m| m.as_str());
        let role = caps.get(2).map_or("", |m| m.as_str());
        let name = caps.get(3).map_or("", |m| m.as_str());
        let suffix = caps.get(4).map_or("", |m| m.as_str());
        let role_lower = role.to_lowercase();

        let interactive = is_interactive_role(&role_lower);
        let content = is_content_role(&role_lower);

        if opts.interactive && !interactive {
            continue;
        }

        if interactive || (content && !name.is_empty()) {
            let (id, nth) = minter.mint(&role_lower, name);
            let mut enhanced = format!("{prefix}{role}");
            if !name.is_empty() {
                enhanced.push_str(&format!(" \"{name}\""));
            }
            enhanced.push_str(&format!(" [ref={id}]"));
            if nth > 0 {
                enhanced.push_str(&format!(" [nth={nth}]"));
            }
            enhanced.push_str(suffix);
            kept.push(enhanced);
        } else {
            kept.push(line.to_string());
        }
    }

    let tree = finish_tree(kept.join("\n"), opts);
    EnhancedSnapshot { tree, refs: minter.refs }
}

/// Extracts the ref id from a selector in any of the bare ref forms
/// (`@e3`, `ref=e3`, `e3`). Returns `None` for ordinary selectors.
pub fn parse_ref(selector: &str) -> Option<&str> {
    if let Some(rest) = selector.strip_prefix('@') {
        return Some(rest);
    }
    if let Some(rest) = selector.strip_prefix("ref=") {
        return Some(rest);
    }
    let digits = selector.strip_prefix('e')?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(selector)
    } else {
        None
    }
}

/// Resolves a ref against the current table; unresolvable refs fall back
/// to being treated as a literal selector, never an error.
pub fn resolve_selector(refs: &RefMap, selector: &str) -> String {
    match parse_ref(selector).and_then(|id| refs.get(id)) {
        Some(data) => data.selector.clone(),
        None => selector.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: &str, name: &str, children: Vec<AxNode>) -> AxNode {
        AxNode {
            role: role.into(),
            name: name.into(),
            children,
            properties: serde_json::Map::new(),
        }
    }

    fn opts() -> SnapshotOptions {
        SnapshotOptions::default()
    }

    #[test]
    fn refs_are_strictly_increasing_in_traversal_order() {
        let tree = node(
            "main",
            "page",
            vec![
                node("button", "One", vec![]),
                node("link", "Two", vec![]),
                node("button", "Three", vec![]),
            ],
        );
        let snap = build_snapshot(Some(&tree), &opts());

        let positions: Vec<usize> = (1..=4)
            .map(|n| snap.tree.find(&format!("[ref=e{n}]")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_rendered_ref_is_in_the_table_and_vice_versa() {
        let tree = node(
            "generic",
            "",
            vec![
                node("heading", "Title", vec![]),
                node("button", "Go", vec![]),
                node("generic", "", vec![node("link", "Deep", vec![])]),
            ],
        );
        let snap = build_snapshot(Some(&tree), &opts());

        for id in snap.refs.keys() {
            assert!(snap.tree.contains(&format!("[ref={id}]")), "{id} missing from tree");
        }
        let rendered = snap.tree.matches("[ref=e").count();
        assert_eq!(rendered, snap.refs.len());
    }

    #[test]
    fn duplicate_role_name_pairs_get_sequential_nth() {
        let tree = node(
            "generic",
            "",
            vec![
                node("button", "Save", vec![]),
                node("button", "Save", vec![]),
                node("button", "Save", vec![]),
            ],
        );
        let snap = build_snapshot(Some(&tree), &opts());

        assert_eq!(snap.refs["e1"].nth, 0);
        assert_eq!(snap.refs["e2"].nth, 1);
        assert_eq!(snap.refs["e3"].nth, 2);
        // nth is rendered only when non-zero.
        assert!(!snap.tree.contains("[ref=e1] [nth"));
        assert!(snap.tree.contains("[ref=e2] [nth=1]"));
        assert!(snap.tree.contains("[ref=e3] [nth=2]"));
    }

    #[test]
    fn interactive_mode_elides_wrappers_but_finds_nested_button() {
        let tree = node(
            "generic",
            "",
            vec![node(
                "generic",
                "",
                vec![node("generic", "", vec![node("button", "Submit", vec![])])],
            )],
        );
        let snap = build_snapshot(
            Some(&tree),
            &SnapshotOptions { interactive: true, ..Default::default() },
        );

        assert_eq!(snap.tree, "- button \"Submit\" [ref=e1]");
        assert_eq!(snap.refs.len(), 1);
        assert_eq!(snap.refs["e1"].role, "button");
        assert_eq!(snap.refs["e1"].name, "Submit");
    }

    #[test]
    fn interactive_mode_with_nothing_interactive_renders_sentinel() {
        let tree = node("main", "page", vec![node("heading", "Title", vec![])]);
        let snap = build_snapshot(
            Some(&tree),
            &SnapshotOptions { interactive: true, ..Default::default() },
        );
        assert_eq!(snap.tree, NO_INTERACTIVE_SENTINEL);
        assert!(snap.refs.is_empty());
    }

    #[test]
    fn missing_tree_renders_empty_sentinel() {
        let snap = build_snapshot(None, &opts());
        assert_eq!(snap.tree, EMPTY_SENTINEL);
        assert!(snap.refs.is_empty());
    }

    #[test]
    fn max_depth_prunes_deep_nodes() {
        let tree = node(
            "main",
            "page",
            vec![node("heading", "shallow", vec![node("button", "deep", vec![])])],
        );
        let snap =
            build_snapshot(Some(&tree), &SnapshotOptions { max_depth: 1, ..Default::default() });
        assert!(snap.tree.contains("shallow"));
        assert!(!snap.tree.contains("deep"));
    }

    #[test]
    fn compact_mode_collapses_unnamed_structural_nodes() {
        let tree = node(
            "list",
            "",
            vec![node("listitem", "Item", vec![]), node("group", "", vec![node("link", "L", vec![])])],
        );
        let snap =
            build_snapshot(Some(&tree), &SnapshotOptions { compact: true, ..Default::default() });
        assert!(snap.tree.lines().all(|l| l.trim_end() != "- list"));
        assert!(snap.tree.lines().all(|l| l.trim_end() != "- group"));
        assert!(snap.tree.contains("listitem \"Item\""));
        assert!(snap.tree.contains("link \"L\""));
    }

    #[test]
    fn unnamed_generic_nodes_are_always_elided() {
        let tree = node("generic", "", vec![node("button", "Hi", vec![])]);
        let snap = build_snapshot(Some(&tree), &opts());
        assert_eq!(snap.tree, "- button \"Hi\" [ref=e1]");
    }

    #[test]
    fn named_content_nodes_get_refs_but_unnamed_do_not() {
        let tree = node(
            "main",
            "page",
            vec![node("heading", "Welcome", vec![]), node("cell", "", vec![])],
        );
        let snap = build_snapshot(Some(&tree), &opts());
        assert!(snap.refs.values().any(|r| r.role == "heading"));
        assert!(!snap.refs.values().any(|r| r.role == "cell"));
        assert!(snap.tree.contains("- cell"));
    }

    #[test]
    fn heading_level_is_rendered() {
        let mut heading = node("heading", "Intro", vec![]);
        heading.properties.insert("level".into(), serde_json::json!(2));
        let snap = build_snapshot(Some(&heading), &opts());
        assert!(snap.tree.contains("[level=2]"), "tree: {}", snap.tree);
    }

    #[test]
    fn selector_synthesis_is_position_independent() {
        assert_eq!(build_selector("button", ""), r#"[role="button"]"#);
        assert_eq!(
            build_selector("button", "Say \"hi\""),
            r#"[role="button"][aria-label="Say \"hi\""]"#
        );
    }

    #[test]
    fn outline_entry_point_matches_tree_semantics() {
        let outline = concat!(
            "- main \"page\"\n",
            "- button \"Submit\"\n",
            "- heading \"Title\" [level=1]\n",
            "- button \"Submit\"\n",
        );
        let snap = process_outline(outline, &opts());

        assert_eq!(snap.refs.len(), 4);
        assert_eq!(snap.refs["e2"].role, "button");
        assert_eq!(snap.refs["e4"].nth, 1);
        assert!(snap.tree.contains("- heading \"Title\" [ref=e3] [level=1]"));
        assert!(snap.tree.contains("- button \"Submit\" [ref=e4] [nth=1]"));
    }

    #[test]
    fn outline_interactive_mode_drops_non_role_lines() {
        let outline = "- generic\nsome stray text\n- link \"Go\"\n";
        let snap =
            process_outline(outline, &SnapshotOptions { interactive: true, ..Default::default() });
        assert_eq!(snap.tree, "- link \"Go\" [ref=e1]");
    }

    #[test]
    fn ref_forms_parse_and_ordinary_selectors_do_not() {
        assert_eq!(parse_ref("@e3"), Some("e3"));
        assert_eq!(parse_ref("ref=e12"), Some("e12"));
        assert_eq!(parse_ref("e7"), Some("e7"));
        assert_eq!(parse_ref("em"), None);
        assert_eq!(parse_ref("#submit"), None);
        assert_eq!(parse_ref("button.primary"), None);
    }

    #[test]
    fn unresolvable_ref_degrades_to_literal_selector() {
        let refs = RefMap::new();
        assert_eq!(resolve_selector(&refs, "@e9"), "@e9");
        assert_eq!(resolve_selector(&refs, "#real"), "#real");
    }

    #[test]
    fn resolved_ref_yields_synthesized_selector() {
        let tree = node("generic", "", vec![node("button", "Go", vec![])]);
        let snap = build_snapshot(Some(&tree), &opts());
        assert_eq!(
            resolve_selector(&snap.refs, "@e1"),
            r#"[role="button"][aria-label="Go"]"#
        );
        assert_eq!(resolve_selector(&snap.refs, "e1"), resolve_selector(&snap.refs, "ref=e1"));
    }
}
