//! Response frames written from daemon to client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One response frame. `id` echoes the originating command's id; exactly
/// one of `data`/`error` is meaningfully populated depending on `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Builds a success response carrying `data`.
    ///
    /// If the payload fails to encode, this degrades to an error response
    /// carrying the encoding failure message instead of propagating it, so
    /// the one-frame-per-request contract is never broken downstream.
    pub fn ok(id: impl Into<String>, data: impl Serialize) -> Response {
        let id = id.into();
        match serde_json::to_value(data) {
            Ok(value) => Response {
                id,
                success: true,
                data: if value.is_null() { None } else { Some(value) },
                error: None,
            },
            Err(e) => Response::err(id, format!("failed to encode response data: {e}")),
        }
    }

    /// Builds a success response with no data payload.
    pub fn ok_empty(id: impl Into<String>) -> Response {
        Response {
            id: id.into(),
            success: true,
            data: None,
            error: None,
        }
    }

    /// Builds an error response.
    pub fn err(id: impl Into<String>, message: impl Into<String>) -> Response {
        Response {
            id: id.into(),
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Serializes to the wire form (without the trailing newline).
    ///
    /// Never fails from the caller's perspective: an encoding bug yields a
    /// hand-built error frame rather than a panic or a dropped response.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"id":"","success":false,"error":"failed to serialize response: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_carries_data_and_echoes_id() {
        let resp = Response::ok("42", json!({"url": "https://example.com/"}));
        assert_eq!(resp.id, "42");
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["url"], "https://example.com/");
        assert!(resp.error.is_none());
    }

    #[test]
    fn ok_with_null_payload_omits_data() {
        let resp = Response::ok("1", Option::<u8>::None);
        assert!(resp.success);
        assert!(resp.data.is_none());
        let wire = resp.to_wire();
        assert!(!wire.contains("data"));
        assert!(!wire.contains("error"));
    }

    #[test]
    fn err_populates_only_error() {
        let resp = Response::err("7", "element not found: #missing");
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_deref(), Some("element not found: #missing"));
    }

    #[test]
    fn wire_form_round_trips() {
        let resp = Response::ok("9", json!({"title": "Example Domain"}));
        let parsed: Response = serde_json::from_str(&resp.to_wire()).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn wire_form_is_a_single_line() {
        let resp = Response::ok("1", json!({"text": "line one\nline two"}));
        assert!(!resp.to_wire().contains('\n'));
    }
}
