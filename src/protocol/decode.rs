//! Decoding of one inbound message into protocol events.
//!
//! Inbound messages are JSON objects of the shape
//! `{"path": "<string>", "data": <object-or-scalar>}`. Anything that does not
//! fit is dropped without an error: the engine emits occasional noise and the
//! client must keep going.

use log::trace;
use serde_json::{Map, Value};

use crate::domain::ProtocolEvent;

/// Decode a raw message into zero or more events.
///
/// A structured response can yield several events (one per property), so the
/// result is a list. Empty, non-UTF-8, non-JSON or path-less input yields an
/// empty list.
pub fn decode(raw: &[u8]) -> Vec<ProtocolEvent> {
    let Ok(text) = std::str::from_utf8(raw) else {
        trace!("Dropping non-UTF-8 message ({} bytes)", raw.len());
        return Vec::new();
    };
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let json: Map<String, Value> = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            trace!("Dropping malformed message: {}", e);
            return Vec::new();
        }
    };
    let Some(path) = json.get("path").and_then(Value::as_str) else {
        trace!("Dropping message without path");
        return Vec::new();
    };

    let mut events = Vec::new();
    match json.get("data") {
        Some(Value::Object(data)) => decode_structured(path, data, &json, &mut events),
        // Subscribe pushes carry the bare value: {"path": "...", "data": true}
        _ => events.extend(bare_value(path, &json)),
    }
    events
}

fn decode_structured(
    path: &str,
    data: &Map<String, Value>,
    json: &Map<String, Value>,
    events: &mut Vec<ProtocolEvent>,
) {
    if let Some(Value::Object(children)) = data.get("children") {
        let mut ids: Vec<String> = children.keys().cloned().collect();
        ids.sort();
        events.push(ProtocolEvent::ChildList {
            path: path.to_string(),
            ids,
        });
    }

    if let Some(Value::Object(properties)) = data.get("properties") {
        for (name, prop) in properties {
            if let Some(inner) = prop.as_object().and_then(|p| p.get("value")) {
                events.extend(typed_event(path, name, inner));
            }
        }
    }

    // Neither key present: fall back to reading `data` itself as the value.
    // `data` is an object here, so this only ever yields something if the
    // value typing below learns about objects.
    if !data.contains_key("children") && !data.contains_key("properties") {
        events.extend(bare_value(path, json));
    }
}

/// Event for `json["data"]`, named after the last path segment.
fn bare_value(path: &str, json: &Map<String, Value>) -> Option<ProtocolEvent> {
    let property = last_segment(path)?;
    typed_event(path, property, json.get("data")?)
}

fn typed_event(path: &str, property: &str, value: &Value) -> Option<ProtocolEvent> {
    let path = path.to_string();
    let property = property.to_string();
    match value {
        Value::Number(n) => n.as_f64().map(|value| ProtocolEvent::NumericValue {
            path,
            property,
            value,
        }),
        Value::Bool(value) => Some(ProtocolEvent::BoolValue {
            path,
            property,
            value: *value,
        }),
        Value::String(value) => Some(ProtocolEvent::StringValue {
            path,
            property,
            value: value.clone(),
        }),
        _ => None,
    }
}

/// Last non-empty `/`-separated segment.
pub(crate) fn last_segment(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).next_back()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(path: &str, property: &str, value: f64) -> ProtocolEvent {
        ProtocolEvent::NumericValue {
            path: path.into(),
            property: property.into(),
            value,
        }
    }

    #[test]
    fn test_child_list_sorted() {
        let events = decode(br#"{"path":"/devices","data":{"children":{"1":{},"0":{}}}}"#);
        assert_eq!(
            events,
            vec![ProtocolEvent::ChildList {
                path: "/devices".into(),
                ids: vec!["0".into(), "1".into()],
            }]
        );
    }

    #[test]
    fn test_property_value() {
        let path = "/devices/0/outputs/4/CRMonitorLevel";
        let raw = format!(r#"{{"path":"{}","data":{{"properties":{{"value":{{"value":-24.0}}}}}}}}"#, path);
        assert_eq!(decode(raw.as_bytes()), vec![numeric(path, "value", -24.0)]);
    }

    #[test]
    fn test_properties_one_to_many() {
        let raw = br#"{"path":"/devices/0/outputs/4","data":{"properties":{
            "Mute":{"value":false},
            "Name":{"value":"Monitor"},
            "CRMonitorLevel":{"value":-12},
            "Meta":{"min":-96},
            "Odd":{"value":[1,2]}
        }}}"#;
        let events = decode(raw);
        assert_eq!(events.len(), 3);
        assert!(events.contains(&ProtocolEvent::BoolValue {
            path: "/devices/0/outputs/4".into(),
            property: "Mute".into(),
            value: false,
        }));
        assert!(events.contains(&ProtocolEvent::StringValue {
            path: "/devices/0/outputs/4".into(),
            property: "Name".into(),
            value: "Monitor".into(),
        }));
        assert!(events.contains(&numeric("/devices/0/outputs/4", "CRMonitorLevel", -12.0)));
    }

    #[test]
    fn test_children_and_properties_together() {
        let raw = br#"{"path":"/devices/0","data":{"children":{"outputs":{}},"properties":{"Online":{"value":true}}}}"#;
        let events = decode(raw);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProtocolEvent::ChildList { .. }));
        assert!(matches!(events[1], ProtocolEvent::BoolValue { value: true, .. }));
    }

    #[test]
    fn test_bare_scalar_push() {
        assert_eq!(
            decode(br#"{"path":"/devices/0/outputs/4/Mute","data":true}"#),
            vec![ProtocolEvent::BoolValue {
                path: "/devices/0/outputs/4/Mute".into(),
                property: "Mute".into(),
                value: true,
            }]
        );
        assert_eq!(
            decode(br#"{"path":"/devices/0/outputs/4/CRMonitorLevel/","data":-30.5}"#),
            vec![numeric("/devices/0/outputs/4/CRMonitorLevel/", "CRMonitorLevel", -30.5)]
        );
        assert_eq!(
            decode(br#"{"path":"/devices/0/DeviceName","data":"Apollo Solo"}"#),
            vec![ProtocolEvent::StringValue {
                path: "/devices/0/DeviceName".into(),
                property: "DeviceName".into(),
                value: "Apollo Solo".into(),
            }]
        );
    }

    #[test]
    fn test_bool_is_not_numeric() {
        let events = decode(br#"{"path":"/a/DimOn","data":false}"#);
        assert!(matches!(events[0], ProtocolEvent::BoolValue { value: false, .. }));
    }

    #[test]
    fn test_structured_without_children_or_properties() {
        assert!(decode(br#"{"path":"/a/b","data":{"other":1}}"#).is_empty());
    }

    #[test]
    fn test_unsupported_bare_types_ignored() {
        assert!(decode(br#"{"path":"/a/b","data":null}"#).is_empty());
        assert!(decode(br#"{"path":"/a/b","data":[1]}"#).is_empty());
        assert!(decode(br#"{"path":"/a/b"}"#).is_empty());
    }

    #[test]
    fn test_malformed_input_yields_nothing() {
        assert!(decode(b"").is_empty());
        assert!(decode(b"   \n").is_empty());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_empty());
        assert!(decode(b"{not json").is_empty());
        assert!(decode(br#"{"data":1}"#).is_empty());
        assert!(decode(br#"{"path":7,"data":1}"#).is_empty());
        assert!(decode(br#"[1,2,3]"#).is_empty());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let events = decode(b"\n  {\"path\":\"/x/Mute\",\"data\":true}\r\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_root_path_has_no_property() {
        assert!(decode(br#"{"path":"/","data":1}"#).is_empty());
    }

    #[test]
    fn test_decode_is_repeatable() {
        let raw = br#"{"path":"/devices","data":{"children":{"b":{},"a":{}}}}"#;
        let first = decode(raw);
        let second = decode(raw);
        assert_eq!(first, second);
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/a/b/c"), Some("c"));
        assert_eq!(last_segment("/a/b/"), Some("b"));
        assert_eq!(last_segment("/"), None);
        assert_eq!(last_segment(""), None);
    }
}
