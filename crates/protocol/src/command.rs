//! Command frames sent from client to daemon.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::snapshot::{SnapshotOptions, Viewport};

/// One request frame: a correlation id plus an action-tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Opaque caller-supplied correlation token, echoed in the response.
    pub id: String,
    #[serde(flatten)]
    pub kind: CommandKind,
}

/// The closed set of supported actions.
///
/// Internally tagged by the `action` field; an action missing from this
/// enum is rejected at parse time, never defaulted at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum CommandKind {
    Launch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headless: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewport: Option<Viewport>,
    },
    Navigate {
        url: String,
        #[serde(default, rename = "waitUntil", skip_serializing_if = "Option::is_none")]
        wait_until: Option<String>,
    },
    Back,
    Forward,
    Reload,
    Click {
        selector: String,
    },
    #[serde(rename = "dblclick")]
    DoubleClick {
        selector: String,
    },
    Fill {
        selector: String,
        value: String,
    },
    Type {
        selector: String,
        text: String,
        #[serde(default)]
        delay: u64,
    },
    Press {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Hover {
        selector: String,
    },
    Focus {
        selector: String,
    },
    Check {
        selector: String,
    },
    Uncheck {
        selector: String,
    },
    Select {
        selector: String,
        values: Vec<String>,
    },
    GetText {
        selector: String,
    },
    GetAttribute {
        selector: String,
        attribute: String,
    },
    IsVisible {
        selector: String,
    },
    Count {
        selector: String,
    },
    Evaluate {
        script: String,
    },
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<String>,
    },
    Url,
    Title,
    Content {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, rename = "fullPage")]
        full_page: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Snapshot {
        #[serde(flatten)]
        options: SnapshotOptions,
    },
    Close,
}

/// Every action string accepted by [`parse_command`].
pub const ACTIONS: &[&str] = &[
    "launch",
    "navigate",
    "back",
    "forward",
    "reload",
    "click",
    "dblclick",
    "fill",
    "type",
    "press",
    "hover",
    "focus",
    "check",
    "uncheck",
    "select",
    "gettext",
    "getattribute",
    "isvisible",
    "count",
    "evaluate",
    "wait",
    "url",
    "title",
    "content",
    "screenshot",
    "snapshot",
    "close",
];

impl CommandKind {
    /// Returns the wire name of this action.
    pub fn action(&self) -> &'static str {
        match self {
            CommandKind::Launch { .. } => "launch",
            CommandKind::Navigate { .. } => "navigate",
            CommandKind::Back => "back",
            CommandKind::Forward => "forward",
            CommandKind::Reload => "reload",
            CommandKind::Click { .. } => "click",
            CommandKind::DoubleClick { .. } => "dblclick",
            CommandKind::Fill { .. } => "fill",
            CommandKind::Type { .. } => "type",
            CommandKind::Press { .. } => "press",
            CommandKind::Hover { .. } => "hover",
            CommandKind::Focus { .. } => "focus",
            CommandKind::Check { .. } => "check",
            CommandKind::Uncheck { .. } => "uncheck",
            CommandKind::Select { .. } => "select",
            CommandKind::GetText { .. } => "gettext",
            CommandKind::GetAttribute { .. } => "getattribute",
            CommandKind::IsVisible { .. } => "isvisible",
            CommandKind::Count { .. } => "count",
            CommandKind::Evaluate { .. } => "evaluate",
            CommandKind::Wait { .. } => "wait",
            CommandKind::Url => "url",
            CommandKind::Title => "title",
            CommandKind::Content { .. } => "content",
            CommandKind::Screenshot { .. } => "screenshot",
            CommandKind::Snapshot { .. } => "snapshot",
            CommandKind::Close => "close",
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: String,
    #[serde(default)]
    action: String,
}

/// Parses one command frame.
///
/// Two-phase: the `{id, action}` envelope is validated first so that
/// missing-id, missing-action, and unknown-action failures are reported
/// distinctly; only then is the full payload decoded into the concrete
/// variant selected by `action`.
pub fn parse_command(data: &str) -> Result<Command, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if envelope.id.is_empty() {
        return Err(ProtocolError::MissingId);
    }
    if envelope.action.is_empty() {
        return Err(ProtocolError::MissingAction);
    }
    if !ACTIONS.contains(&envelope.action.as_str()) {
        return Err(ProtocolError::UnknownAction(envelope.action));
    }

    serde_json::from_str(data).map_err(|e| ProtocolError::InvalidPayload {
        action: envelope.action,
        message: e.to_string(),
    })
}

/// Serializes a command to its wire form (without the trailing newline).
pub fn serialize_command(cmd: &Command) -> Result<String, ProtocolError> {
    serde_json::to_string(cmd).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_action_kind() {
        let commands = vec![
            Command {
                id: "1".into(),
                kind: CommandKind::Navigate {
                    url: "https://example.com".into(),
                    wait_until: Some("networkidle".into()),
                },
            },
            Command {
                id: "2".into(),
                kind: CommandKind::Click { selector: "@e3".into() },
            },
            Command {
                id: "3".into(),
                kind: CommandKind::Fill {
                    selector: "#email".into(),
                    value: "a@b.c".into(),
                },
            },
            Command {
                id: "4".into(),
                kind: CommandKind::Snapshot {
                    options: SnapshotOptions {
                        interactive: true,
                        max_depth: 3,
                        compact: false,
                        selector: None,
                    },
                },
            },
            Command {
                id: "5".into(),
                kind: CommandKind::Wait {
                    selector: Some(".spinner".into()),
                    timeout: Some(5000),
                    state: Some("hidden".into()),
                },
            },
            Command { id: "6".into(), kind: CommandKind::Close },
            Command {
                id: "7".into(),
                kind: CommandKind::Launch {
                    headless: Some(false),
                    viewport: Some(Viewport { width: 1280, height: 720 }),
                },
            },
        ];

        for cmd in commands {
            let wire = serialize_command(&cmd).unwrap();
            let parsed = parse_command(&wire).unwrap();
            assert_eq!(parsed, cmd, "round trip failed for {wire}");
        }
    }

    #[test]
    fn action_name_matches_wire_tag() {
        let cmd = Command {
            id: "1".into(),
            kind: CommandKind::GetText { selector: "h1".into() },
        };
        let wire = serialize_command(&cmd).unwrap();
        assert!(wire.contains(r#""action":"gettext""#));
        assert_eq!(cmd.kind.action(), "gettext");
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = parse_command(r#"{"action":"url"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingId));
    }

    #[test]
    fn missing_action_is_rejected() {
        let err = parse_command(r#"{"id":"1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingAction));
    }

    #[test]
    fn unknown_action_is_a_distinct_error() {
        let err = parse_command(r#"{"id":"1","action":"teleport"}"#).unwrap_err();
        match err {
            ProtocolError::UnknownAction(action) => assert_eq!(action, "teleport"),
            other => panic!("expected UnknownAction, got {other:?}"),
        }
    }

    #[test]
    fn known_action_with_missing_field_names_the_action() {
        let err = parse_command(r#"{"id":"1","action":"click"}"#).unwrap_err();
        match err {
            ProtocolError::InvalidPayload { action, .. } => assert_eq!(action, "click"),
            other => panic!("expected InvalidPayload, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            parse_command("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn every_variant_action_is_in_the_table() {
        // Spot-check that ACTIONS and the enum agree on the odd names.
        for action in ["dblclick", "gettext", "getattribute", "isvisible"] {
            assert!(ACTIONS.contains(&action));
        }
    }
}
