//! JSON command records broadcast to every node
//!
//! A command carries at least a `command` string plus optional selectors
//! (`sourceID`, `listenerID`) and typed parameters. Legacy payloads that
//! use an `address` field instead of `command` are accepted and rewritten
//! to the canonical form at parse time.

use resona_core::{Quaternion, Vector3};
use serde_json::Value;

/// A parsed command payload
#[derive(Debug, Clone, Default)]
pub struct Command {
    json: Value,
}

impl Command {
    /// Parse a JSON command string. Returns `None` on malformed JSON
    /// (logged as a warning, never fatal).
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(json) if json.is_object() => Some(Self::from_value(json)),
            Ok(_) => {
                log::warn!("command payload is not a JSON object: {text}");
                None
            }
            Err(error) => {
                log::warn!("unparseable command: {error}");
                None
            }
        }
    }

    /// Wrap an already-parsed JSON object, applying the `address` shim.
    pub fn from_value(mut json: Value) -> Self {
        // Legacy dialect: {"address": "/..."} becomes {"command": "/..."}
        if json.get("command").is_none() {
            if let Some(address) = json.get("address").cloned() {
                if let Some(object) = json.as_object_mut() {
                    object.insert("command".into(), address);
                }
            }
        }
        Self { json }
    }

    /// An empty command (delivered before anything was broadcast)
    pub fn is_null(&self) -> bool {
        self.json.is_null()
    }

    /// The command selector string, empty when absent
    pub fn command(&self) -> &str {
        self.json
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn string_parameter(&self, field: &str) -> &str {
        self.json.get(field).and_then(Value::as_str).unwrap_or("")
    }

    pub fn bool_parameter(&self, field: &str) -> Option<bool> {
        self.json.get(field).and_then(Value::as_bool)
    }

    pub fn float_parameter(&self, field: &str) -> Option<f32> {
        self.json.get(field).and_then(Value::as_f64).map(|v| v as f32)
    }

    pub fn int_parameter(&self, field: &str) -> Option<i64> {
        self.json.get(field).and_then(Value::as_i64)
    }

    fn float_array(&self, field: &str) -> Option<Vec<f32>> {
        let array = self.json.get(field)?.as_array()?;
        array
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }

    pub fn vector3_parameter(&self, field: &str) -> Option<Vector3> {
        let values = self.float_array(field)?;
        if values.len() != 3 {
            return None;
        }
        Some(Vector3::new(values[0], values[1], values[2]))
    }

    /// Quaternion parameter, given as [x, y, z, w]
    pub fn quaternion_parameter(&self, field: &str) -> Option<Quaternion> {
        let values = self.float_array(field)?;
        if values.len() != 4 {
            return None;
        }
        Some(Quaternion::new(values[0], values[1], values[2], values[3]))
    }

    pub fn source_id(&self) -> Option<&str> {
        self.json.get("sourceID").and_then(Value::as_str)
    }

    pub fn listener_id(&self) -> Option<&str> {
        self.json.get("listenerID").and_then(Value::as_str)
    }

    /// True when the command addresses the given source
    pub fn is_for_source(&self, id: &str) -> bool {
        self.source_id() == Some(id)
    }

    /// True when the command addresses the given listener
    pub fn is_for_listener(&self, id: &str) -> bool {
        self.listener_id() == Some(id)
    }
}
