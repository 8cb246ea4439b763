//! Snapshot and ref wire shapes, plus small shared data payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Resolution data for one minted ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefData {
    /// Position-independent selector synthesized from (role, name).
    pub selector: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// 0-based occurrence index among nodes sharing this (role, name).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nth: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// The per-snapshot ref table, keyed by `e<N>` ref ids.
///
/// Ordered so that rendered output and wire encoding are deterministic.
pub type RefMap = BTreeMap<String, RefData>;

/// Options recognized by the snapshot operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOptions {
    /// Drop non-interactive subtrees from output, still descending
    /// through them.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interactive: bool,
    /// 0 = unlimited; nodes deeper than this are pruned entirely.
    #[serde(default, rename = "maxDepth", skip_serializing_if = "is_zero")]
    pub max_depth: u32,
    /// Collapse unnamed purely-structural nodes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compact: bool,
    /// Scope the traversal to this selector's subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// A rendered outline plus the ref table minted while rendering it. The
/// only channel through which ref ids become valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedSnapshot {
    pub tree: String,
    pub refs: RefMap,
}

/// Abbreviated ref info as it appears in snapshot response data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefInfo {
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Response payload for the snapshot action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub snapshot: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, RefInfo>,
}

impl SnapshotData {
    /// Projects a full snapshot down to its wire shape, dropping the
    /// selector/nth bookkeeping the client has no use for.
    pub fn from_snapshot(snapshot: &EnhancedSnapshot) -> SnapshotData {
        SnapshotData {
            snapshot: snapshot.tree.clone(),
            refs: snapshot
                .refs
                .iter()
                .map(|(k, v)| {
                    (k.clone(), RefInfo { role: v.role.clone(), name: v.name.clone() })
                })
                .collect(),
        }
    }
}

/// Response payload for the navigate action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateData {
    pub url: String,
    pub title: String,
}

/// Response payload for the screenshot action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}
