//! Wire types for cross-context messages.
//!
//! A message is one JSON object:
//!
//! ```json
//! {"type":"ELEMENT_HOVER","payload":{"element":42},"timestamp":1700000000000,
//!  "source":{"content":true},"target":{"content":true}}
//! ```
//!
//! `type` and `payload` form the tagged [`Payload`] union, so every kind pins
//! the concrete shape of its payload.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::ContextSet;
use crate::dom::ElementHandle;
use crate::telemetry::Modifiers;

/// Inspection mode selected on the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Inspect,
    Select,
    Measure,
}

/// A key pressed in a page, forwarded by the raw-input adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeydownPayload {
    pub key: String,
    #[serde(default)]
    pub modifiers: Modifiers,
}

/// Message body, tagged by its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// The tool was switched on or off for the page.
    ExtensionToggle { active: bool },
    InspectorStateChange { active: bool },
    ElementSelect { element: ElementHandle },
    /// The pointer entered an element.
    ElementHover { element: ElementHandle },
    TrackerCreate { id: String },
    TrackerUpdate {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_locked: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_visible: Option<bool>,
    },
    TrackerDelete { id: String },
    TrackerLock { id: String, locked: bool },
    /// Opaque state for UI widgets outside the core.
    UiUpdate {
        component: String,
        #[serde(default)]
        state: Value,
    },
    SettingsChange { key: String, value: Value },
    ZoomChange { zoom: f64 },
    ModeChange { mode: Mode },
    /// Capture request handled by the background context.
    Screenshot {},
    ViewportResize { width: f64, height: f64 },
    Keydown(KeydownPayload),
}

/// Payload discriminant, used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    ExtensionToggle,
    InspectorStateChange,
    ElementSelect,
    ElementHover,
    TrackerCreate,
    TrackerUpdate,
    TrackerDelete,
    TrackerLock,
    UiUpdate,
    SettingsChange,
    ZoomChange,
    ModeChange,
    Screenshot,
    ViewportResize,
    Keydown,
}

impl MessageKind {
    pub const ALL: [MessageKind; 15] = [
        MessageKind::ExtensionToggle,
        MessageKind::InspectorStateChange,
        MessageKind::ElementSelect,
        MessageKind::ElementHover,
        MessageKind::TrackerCreate,
        MessageKind::TrackerUpdate,
        MessageKind::TrackerDelete,
        MessageKind::TrackerLock,
        MessageKind::UiUpdate,
        MessageKind::SettingsChange,
        MessageKind::ZoomChange,
        MessageKind::ModeChange,
        MessageKind::Screenshot,
        MessageKind::ViewportResize,
        MessageKind::Keydown,
    ];

    /// Wire name, e.g. `ELEMENT_HOVER`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ExtensionToggle => "EXTENSION_TOGGLE",
            MessageKind::InspectorStateChange => "INSPECTOR_STATE_CHANGE",
            MessageKind::ElementSelect => "ELEMENT_SELECT",
            MessageKind::ElementHover => "ELEMENT_HOVER",
            MessageKind::TrackerCreate => "TRACKER_CREATE",
            MessageKind::TrackerUpdate => "TRACKER_UPDATE",
            MessageKind::TrackerDelete => "TRACKER_DELETE",
            MessageKind::TrackerLock => "TRACKER_LOCK",
            MessageKind::UiUpdate => "UI_UPDATE",
            MessageKind::SettingsChange => "SETTINGS_CHANGE",
            MessageKind::ZoomChange => "ZOOM_CHANGE",
            MessageKind::ModeChange => "MODE_CHANGE",
            MessageKind::Screenshot => "SCREENSHOT",
            MessageKind::ViewportResize => "VIEWPORT_RESIZE",
            MessageKind::Keydown => "KEYDOWN",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    /// Accepts wire names case-insensitively, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_uppercase();
        MessageKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown message type '{}'", s))
    }
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::ExtensionToggle { .. } => MessageKind::ExtensionToggle,
            Payload::InspectorStateChange { .. } => MessageKind::InspectorStateChange,
            Payload::ElementSelect { .. } => MessageKind::ElementSelect,
            Payload::ElementHover { .. } => MessageKind::ElementHover,
            Payload::TrackerCreate { .. } => MessageKind::TrackerCreate,
            Payload::TrackerUpdate { .. } => MessageKind::TrackerUpdate,
            Payload::TrackerDelete { .. } => MessageKind::TrackerDelete,
            Payload::TrackerLock { .. } => MessageKind::TrackerLock,
            Payload::UiUpdate { .. } => MessageKind::UiUpdate,
            Payload::SettingsChange { .. } => MessageKind::SettingsChange,
            Payload::ZoomChange { .. } => MessageKind::ZoomChange,
            Payload::ModeChange { .. } => MessageKind::ModeChange,
            Payload::Screenshot {} => MessageKind::Screenshot,
            Payload::ViewportResize { .. } => MessageKind::ViewportResize,
            Payload::Keydown(_) => MessageKind::Keydown,
        }
    }

    /// Build a payload from its wire name and JSON body.
    pub fn from_parts(kind: MessageKind, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "type": kind.as_str(),
            "payload": payload,
        }))
    }
}

/// Subscription key: one kind, or every kind (`"*"`).
///
/// The wildcard exists only here, so it can never be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Kind(MessageKind),
    All,
}

impl From<MessageKind> for Topic {
    fn from(kind: MessageKind) -> Self {
        Topic::Kind(kind)
    }
}

/// A message as it crosses context boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub payload: Payload,
    /// Epoch milliseconds at send time.
    pub timestamp: u64,
    pub source: ContextSet,
    pub target: ContextSet,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Decode an inbound value, dropping anything malformed.
    ///
    /// The shape must be an object with a string `type`, a numeric
    /// `timestamp`, an object `source`, and a non-null `payload` before the
    /// payload itself is decoded.
    ///
    /// `source` is a [`ContextSet`] on the wire, so a bare context name such
    /// as `"content"` is rejected rather than coerced.
    pub fn decode(value: &Value) -> Option<Message> {
        let Some(obj) = value.as_object() else {
            debug!("Dropping inbound message: not an object");
            return None;
        };

        let shape_ok = obj.get("type").is_some_and(Value::is_string)
            && obj.get("timestamp").is_some_and(Value::is_number)
            && obj.get("source").is_some_and(Value::is_object)
            && obj.get("payload").is_some_and(|p| !p.is_null());
        if !shape_ok {
            debug!("Dropping inbound message with invalid shape");
            return None;
        }

        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Dropping inbound message: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use serde_json::json;

    fn hover_message() -> Message {
        Message {
            payload: Payload::ElementHover {
                element: ElementHandle(42),
            },
            timestamp: 1_700_000_000_000,
            source: ContextSet::only(ContextKind::Content),
            target: ContextSet::only(ContextKind::Content),
        }
    }

    #[test]
    fn message_wire_shape() {
        let value = serde_json::to_value(hover_message()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "ELEMENT_HOVER",
                "payload": {"element": 42},
                "timestamp": 1_700_000_000_000u64,
                "source": {"content": true},
                "target": {"content": true},
            })
        );
    }

    #[test]
    fn decode_accepts_valid_message() {
        let value = serde_json::to_value(hover_message()).unwrap();
        assert_eq!(Message::decode(&value), Some(hover_message()));
    }

    #[test]
    fn decode_drops_malformed() {
        let valid = serde_json::to_value(hover_message()).unwrap();
        let mut cases = vec![json!("ELEMENT_HOVER"), json!(null), json!([1, 2])];

        for (field, replacement) in [
            ("type", json!(7)),
            ("timestamp", json!("now")),
            ("source", json!("content")),
            ("payload", json!(null)),
        ] {
            let mut broken = valid.clone();
            broken[field] = replacement;
            cases.push(broken);
        }
        let mut missing_payload = valid.clone();
        missing_payload.as_object_mut().unwrap().remove("payload");
        cases.push(missing_payload);

        // Right shape, unknown kind
        let mut unknown = valid.clone();
        unknown["type"] = json!("TELEPORT");
        cases.push(unknown);

        for case in cases {
            assert_eq!(Message::decode(&case), None, "{} should be dropped", case);
        }
    }

    #[test]
    fn decode_rejects_context_name_as_source() {
        let mut value = serde_json::to_value(hover_message()).unwrap();
        value["source"] = json!("content");
        assert_eq!(Message::decode(&value), None);

        value["source"] = json!({"content": true});
        assert!(Message::decode(&value).is_some());
    }

    #[test]
    fn keydown_payload_shape() {
        let payload = Payload::from_parts(
            MessageKind::Keydown,
            json!({"key": "l", "modifiers": {"alt": true}}),
        )
        .unwrap();

        match payload {
            Payload::Keydown(keydown) => {
                assert_eq!(keydown.key, "l");
                assert!(keydown.modifiers.alt);
                assert!(!keydown.modifiers.ctrl);
            }
            other => panic!("expected keydown, got {:?}", other),
        }
    }

    #[test]
    fn empty_payload_kinds() {
        let payload = Payload::from_parts(MessageKind::Screenshot, json!({})).unwrap();
        assert_eq!(payload.kind(), MessageKind::Screenshot);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"type": "SCREENSHOT", "payload": {}}));
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in MessageKind::ALL {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<MessageKind>(), Ok(kind));
        }
        assert_eq!("zoom-change".parse::<MessageKind>(), Ok(MessageKind::ZoomChange));
        assert!("*".parse::<MessageKind>().is_err());
    }

    #[test]
    fn tracker_update_omits_unset_fields() {
        let payload = Payload::TrackerUpdate {
            id: "tracker-1".into(),
            is_locked: Some(true),
            is_visible: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"type": "TRACKER_UPDATE", "payload": {"id": "tracker-1", "is_locked": true}})
        );
    }
}
