//! Extended JSON: a tagged JSON dialect that round-trips value graphs plain
//! JSON cannot carry.
//!
//! Maps with arbitrary keys, `NaN`, `±Infinity`, negative zero and
//! `undefined` are rewritten into small tagged records on encode and restored
//! on decode:
//!
//! | value            | encoded as                                   |
//! |------------------|----------------------------------------------|
//! | map              | `{"kind":"map","entries":[[k,v],...]}`       |
//! | `NaN`, `±Inf`    | `{"kind":"number","text":"NaN"}`             |
//! | `-0`             | `{"kind":"number","text":"-0"}`              |
//! | `undefined`      | `{"kind":"undefined"}`                       |
//!
//! Records with an unknown `kind` decode to the literal record. Payloads
//! written by the web client's `dataType` tags are accepted as well.
//!
//! [`to_value`] and [`from_value`] bridge typed Rust data through serde.

mod de;
mod ser;

pub use de::from_value;
pub use ser::to_value;

use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const TAG_KEY: &str = "kind";
const LEGACY_TAG_KEY: &str = "dataType";

/// Largest magnitude at which every integer is exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl serde::ser::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Message(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Message(msg.to_string())
    }
}

/// An in-memory value graph.
///
/// Equality is structural: `NaN` equals `NaN`, `-0` differs from `0`, and map
/// entries compare without regard to order.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Looks up a field of an object, or a string-keyed entry of a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(fields) => fields.get(key),
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => same_number(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => same_entries(a, b),
            _ => false,
        }
    }
}

fn same_number(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a.to_bits() == b.to_bits()
}

fn same_entries(a: &[(Value, Value)], b: &[(Value, Value)]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|entry| {
        let found = b
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && candidate == entry);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Encodes a value graph as tagged JSON text.
///
/// Tags share the object namespace. A plain object that already reads as a
/// tag, such as `{"kind": "undefined"}` or a `kind: "map"` record with an
/// `entries` list, decodes as the tagged value and not as an object. Objects
/// with an unknown `kind`, or whose tag fields are malformed, stay objects.
pub fn encode(value: &Value) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&to_json(value))?)
}

/// Encodes a value graph as indented tagged JSON text.
pub fn encode_pretty(value: &Value) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(&to_json(value))?)
}

/// Parses tagged JSON text back into a value graph.
///
/// Any object shaped like a tag is revived, see [`encode`] for the records
/// this makes ambiguous.
pub fn decode(text: &str) -> Result<Value, CodecError> {
    let json: Json = serde_json::from_str(text)?;
    Ok(from_json(json))
}

/// Rewrites a value graph into plain JSON, tagging what JSON cannot hold.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Undefined => tagged("undefined", []),
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Object(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        Value::Map(entries) => {
            let entries = entries
                .iter()
                .map(|(k, v)| Json::Array(vec![to_json(k), to_json(v)]))
                .collect();
            tagged("map", [("entries", Json::Array(entries))])
        }
    }
}

/// Restores a value graph from plain JSON, reviving tagged records.
pub fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(fields) => revive_object(fields),
    }
}

fn tagged<const N: usize>(kind: &str, extra: [(&str, Json); N]) -> Json {
    let mut fields = serde_json::Map::with_capacity(N + 1);
    fields.insert(TAG_KEY.to_owned(), Json::String(kind.to_owned()));
    for (key, value) in extra {
        fields.insert(key.to_owned(), value);
    }
    Json::Object(fields)
}

fn number_to_json(n: f64) -> Json {
    if let Some(text) = special_number_text(n) {
        return tagged("number", [("text", Json::String(text.to_owned()))]);
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Json::from(n as i64);
    }
    match serde_json::Number::from_f64(n) {
        Some(number) => Json::Number(number),
        None => Json::Null,
    }
}

fn special_number_text(n: f64) -> Option<&'static str> {
    if n.is_nan() {
        Some("NaN")
    } else if n == f64::INFINITY {
        Some("Infinity")
    } else if n == f64::NEG_INFINITY {
        Some("-Infinity")
    } else if n == 0.0 && n.is_sign_negative() {
        Some("-0")
    } else {
        None
    }
}

fn parse_number_text(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "-0" => Some(-0.0),
        other => other.trim().parse().ok(),
    }
}

fn revive_object(mut fields: serde_json::Map<String, Json>) -> Value {
    if let Some(value) = revive_tag(&mut fields).or_else(|| revive_legacy_tag(&mut fields)) {
        return value;
    }
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k, from_json(v)))
            .collect(),
    )
}

fn revive_tag(fields: &mut serde_json::Map<String, Json>) -> Option<Value> {
    let kind = fields.get(TAG_KEY)?.as_str()?.to_owned();
    match kind.as_str() {
        "undefined" => Some(Value::Undefined),
        "number" => fields
            .get("text")
            .and_then(Json::as_str)
            .and_then(parse_number_text)
            .map(Value::Number),
        "map" => take_entries(fields, "entries"),
        _ => None,
    }
}

fn revive_legacy_tag(fields: &mut serde_json::Map<String, Json>) -> Option<Value> {
    let kind = fields.get(LEGACY_TAG_KEY)?.as_str()?.to_owned();
    match kind.as_str() {
        "undefined" => Some(Value::Undefined),
        "Number" => fields
            .get("value")
            .and_then(Json::as_str)
            .and_then(parse_number_text)
            .map(Value::Number),
        "Map" => take_entries(fields, "value"),
        _ => None,
    }
}

/// Removes and revives a `[[k, v], ...]` entry list, leaving `fields`
/// untouched when the list is malformed.
fn take_entries(fields: &mut serde_json::Map<String, Json>, key: &str) -> Option<Value> {
    let well_formed = match fields.get(key)? {
        Json::Array(entries) => entries
            .iter()
            .all(|entry| matches!(entry, Json::Array(pair) if pair.len() == 2)),
        _ => false,
    };
    if !well_formed {
        return None;
    }
    let Some(Json::Array(entries)) = fields.remove(key) else {
        return None;
    };
    let entries = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Json::Array(pair) => {
                let mut pair = pair.into_iter();
                Some((from_json(pair.next()?), from_json(pair.next()?)))
            }
            _ => None,
        })
        .collect();
    Some(Value::Map(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        )
    }

    #[test]
    fn test_special_numbers_are_tagged() {
        let value = Value::Array(vec![
            Value::Number(f64::NAN),
            Value::Number(f64::INFINITY),
            Value::Number(f64::NEG_INFINITY),
            Value::Number(-0.0),
            Value::Number(0.0),
            Value::Number(1.5),
        ]);
        let text = encode(&value).unwrap();
        assert_eq!(
            text,
            r#"[{"kind":"number","text":"NaN"},{"kind":"number","text":"Infinity"},{"kind":"number","text":"-Infinity"},{"kind":"number","text":"-0"},0,1.5]"#
        );
        assert_eq!(decode(&text).unwrap(), value);
    }

    #[test]
    fn test_negative_zero_is_not_zero() {
        assert_ne!(Value::Number(-0.0), Value::Number(0.0));
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_map_and_undefined_round_trip() {
        let value = object([
            ("missing", Value::Undefined),
            (
                "registers",
                Value::Map(vec![
                    (Value::Number(0.0), Value::Number(f64::NAN)),
                    (Value::Number(1.0), Value::Undefined),
                ]),
            ),
        ]);
        let text = encode(&value).unwrap();
        assert!(text.contains(r#""kind":"map""#));
        assert!(text.contains(r#""kind":"undefined""#));
        assert_eq!(decode(&text).unwrap(), value);
    }

    #[test]
    fn test_map_order_is_irrelevant() {
        let a = Value::Map(vec![
            (Value::from("a"), Value::Number(1.0)),
            (Value::from("b"), Value::Number(2.0)),
        ]);
        let b = Value::Map(vec![
            (Value::from("b"), Value::Number(2.0)),
            (Value::from("a"), Value::Number(1.0)),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_kind_decodes_literally() {
        let value = decode(r#"{"kind":"set","items":[1,2]}"#).unwrap();
        assert_eq!(
            value,
            object([
                ("kind", Value::from("set")),
                (
                    "items",
                    Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
                ),
            ])
        );

        // a map tag with a malformed entry list is left alone as well
        let value = decode(r#"{"kind":"map","entries":[[1]]}"#).unwrap();
        assert!(matches!(value, Value::Object(_)));
    }

    #[test]
    fn test_objects_shaped_like_tags_are_revived() {
        let record = object([("kind", Value::from("undefined"))]);
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), Value::Undefined);

        let record = object([
            ("kind", Value::from("number")),
            ("text", Value::from("NaN")),
        ]);
        assert!(matches!(
            decode(&encode(&record).unwrap()).unwrap(),
            Value::Number(n) if n.is_nan()
        ));
    }

    #[test]
    fn test_legacy_tags_decode() {
        let value = decode(
            r#"{"a":{"dataType":"Map","value":[[1,"x"]]},"b":{"dataType":"Number","value":"-Infinity"},"c":{"dataType":"undefined"}}"#,
        )
        .unwrap();
        assert_eq!(
            value,
            object([
                (
                    "a",
                    Value::Map(vec![(Value::Number(1.0), Value::from("x"))])
                ),
                ("b", Value::Number(f64::NEG_INFINITY)),
                ("c", Value::Undefined),
            ])
        );
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(decode("{\"vm\":"), Err(CodecError::Json(_))));
    }

    fn number() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(-0.0),
            Just(0.0),
            any::<i32>().prop_map(f64::from),
            any::<f64>(),
        ]
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Undefined),
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            number().prop_map(Value::Number),
            ".{0,8}".prop_map(Value::String),
        ]
    }

    fn value_graph() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                // keys never spell a tag field, see `encode`
                prop::collection::btree_map("[a-h]{1,5}", inner.clone(), 0..6)
                    .prop_map(Value::Object),
                prop::collection::vec((leaf(), inner), 0..6).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(value in value_graph()) {
            let text = encode(&value).unwrap();
            prop_assert_eq!(decode(&text).unwrap(), value);
        }
    }
}
