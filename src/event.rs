//! Event types and the normalizer for Beacon.
//!
//! Inbound analytics events arrive as a flat JSON object with abbreviated
//! keys (a [`RawEvent`]). [`normalize`] turns one into a [`CanonicalEvent`]
//! with long field names and structured attributes/traits, which is what
//! gets queued and forwarded to the webhook.
//!
//! # Example
//!
//! ```json
//! {
//!   "ev": "click",
//!   "uid": "u1",
//!   "atrk1": "color",
//!   "atrv1": "red",
//!   "atrt1": "string"
//! }
//! ```
//!
//! normalizes to
//!
//! ```json
//! {
//!   "event": "click",
//!   "user_id": "u1",
//!   "attributes": { "color": { "value": "red", "type": "string" } },
//!   "traits": {},
//!   "event_type": null,
//!   ...
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// An inbound event exactly as received over HTTP.
pub type RawEvent = Map<String, Value>;

/// Key prefixes for one family of indexed entries (`{key}{i}`, `{value}{i}`, `{type}{i}`).
#[derive(Debug, Clone, Copy)]
struct IndexedPrefixes {
    key: &'static str,
    value: &'static str,
    kind: &'static str,
}

const ATTRIBUTE_PREFIXES: IndexedPrefixes = IndexedPrefixes {
    key: "atrk",
    value: "atrv",
    kind: "atrt",
};

const TRAIT_PREFIXES: IndexedPrefixes = IndexedPrefixes {
    key: "uatrk",
    value: "uatrv",
    kind: "uatrt",
};

/// A single attribute or trait: its value and the caller-supplied type tag.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Attribute {
    pub value: Value,

    #[serde(rename = "type")]
    pub kind: Value,
}

/// A normalized analytics event.
///
/// Fixed fields carry the raw JSON value from the inbound event unchanged,
/// or `null` when the short key was absent. Attributes and traits are keyed
/// by name; maps are ordered so the serialized form is stable.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CanonicalEvent {
    /// `ev`
    #[serde(default)]
    pub event: Value,

    /// `et`
    #[serde(default)]
    pub event_type: Value,

    /// `id`
    #[serde(default)]
    pub app_id: Value,

    /// `uid`
    #[serde(default)]
    pub user_id: Value,

    /// `mid`
    #[serde(default)]
    pub message_id: Value,

    /// `t`
    #[serde(default)]
    pub page_title: Value,

    /// `p`
    #[serde(default)]
    pub page_url: Value,

    /// `l`
    #[serde(default)]
    pub browser_language: Value,

    /// `sc`
    #[serde(default)]
    pub screen_size: Value,

    /// Event attributes from the `atrk`/`atrv`/`atrt` triples
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,

    /// User traits from the `uatrk`/`uatrv`/`uatrt` triples
    #[serde(default)]
    pub traits: BTreeMap<String, Attribute>,
}

impl CanonicalEvent {
    /// Event name for log fields, or `"-"` if it isn't a string.
    pub fn label(&self) -> &str {
        self.event.as_str().unwrap_or("-")
    }
}

/// Convert a raw event into its canonical form.
///
/// Never fails: absent keys become `null`, and malformed indexed entries
/// are skipped with a warning.
pub fn normalize(raw: &RawEvent) -> CanonicalEvent {
    let field = |key: &str| raw.get(key).cloned().unwrap_or(Value::Null);

    CanonicalEvent {
        event: field("ev"),
        event_type: field("et"),
        app_id: field("id"),
        user_id: field("uid"),
        message_id: field("mid"),
        page_title: field("t"),
        page_url: field("p"),
        browser_language: field("l"),
        screen_size: field("sc"),
        attributes: extract_indexed(raw, ATTRIBUTE_PREFIXES),
        traits: extract_indexed(raw, TRAIT_PREFIXES),
    }
}

/// Walk `{key}1`, `{key}2`, ... until the first missing index.
///
/// A present key whose value is not a string is skipped; it does not end
/// the walk.
fn extract_indexed(raw: &RawEvent, prefixes: IndexedPrefixes) -> BTreeMap<String, Attribute> {
    let mut entries = BTreeMap::new();

    for index in 1.. {
        let key = format!("{}{}", prefixes.key, index);
        let Some(name) = raw.get(&key) else {
            break;
        };

        let Value::String(name) = name else {
            warn!(
                key = %key,
                found = json_type(name),
                "Skipping indexed entry with non-string name"
            );
            continue;
        };

        let attribute = Attribute {
            value: raw
                .get(&format!("{}{}", prefixes.value, index))
                .cloned()
                .unwrap_or(Value::Null),
            kind: raw
                .get(&format!("{}{}", prefixes.kind, index))
                .cloned()
                .unwrap_or(Value::Null),
        };

        entries.insert(name.clone(), attribute);
    }

    entries
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
