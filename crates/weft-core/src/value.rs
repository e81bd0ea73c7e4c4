//! Cell values: what goes into shared structures and what comes back out.
//!
//! [`Any`] models plain (non-replicated) payloads: scalars, byte strings,
//! and embedded collections. It is serde-derived; its wire form inside
//! updates is CBOR. [`Input`] is the write-side cell: an `Any` or a seed
//! for a nested shared structure. [`Output`] is the read-side cell: an
//! `Any` or a typed handle to a nested shared structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::branch::{Array, Map, Text, XmlElement, XmlFragment, XmlText};

/// A plain value stored inside a shared structure. Embedded collections
/// are copied in wholesale and do not merge; use nested branches for
/// content that concurrent editors should converge on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Any {
    Null,
    Bool(bool),
    Double(f64),
    Long(i64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Any>),
    Map(BTreeMap<String, Any>),
}

/// Formatting / XML attribute map.
pub type Attrs = BTreeMap<String, Any>;

impl Any {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Any::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Any::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Any::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Any::Double(n) => Some(*n),
            Any::Long(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Converts from a JSON value. Numbers that fit `i64` become
    /// [`Any::Long`], everything else numeric becomes [`Any::Double`].
    pub fn from_json(value: &serde_json::Value) -> Any {
        match value {
            serde_json::Value::Null => Any::Null,
            serde_json::Value::Bool(b) => Any::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Any::Long(i),
                None => Any::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Any::String(s.clone()),
            serde_json::Value::Array(items) => Any::List(items.iter().map(Any::from_json).collect()),
            serde_json::Value::Object(map) => Any::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Any::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to a JSON value. Bytes render as an array of numbers, the
    /// same shape JSON-only peers produce for binary payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Any::Null => serde_json::Value::Null,
            Any::Bool(b) => serde_json::Value::Bool(*b),
            Any::Double(n) => serde_json::json!(n),
            Any::Long(n) => serde_json::json!(n),
            Any::String(s) => serde_json::Value::String(s.clone()),
            Any::Bytes(b) => serde_json::Value::Array(b.iter().map(|x| serde_json::json!(x)).collect()),
            Any::List(items) => serde_json::Value::Array(items.iter().map(Any::to_json).collect()),
            Any::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for Any {
    fn from(v: bool) -> Self {
        Any::Bool(v)
    }
}

impl From<i64> for Any {
    fn from(v: i64) -> Self {
        Any::Long(v)
    }
}

impl From<f64> for Any {
    fn from(v: f64) -> Self {
        Any::Double(v)
    }
}

impl From<&str> for Any {
    fn from(v: &str) -> Self {
        Any::String(v.to_owned())
    }
}

impl From<String> for Any {
    fn from(v: String) -> Self {
        Any::String(v)
    }
}

/// Write-side cell. The `Any` variant stores a plain value; the remaining
/// variants create a nested shared structure owned by the written cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Any(Any),
    /// New nested text, seeded with the given string.
    Text(String),
    /// New nested array, seeded with the given cells.
    Array(Vec<Input>),
    /// New nested map, seeded with the given entries.
    Map(BTreeMap<String, Input>),
    /// New nested XML text, seeded with the given string.
    XmlText(String),
    /// New nested XML element with the given tag.
    XmlElement(String),
    /// New nested XML fragment.
    XmlFragment,
}

impl Input {
    pub fn null() -> Self {
        Input::Any(Any::Null)
    }

    pub fn bool(value: bool) -> Self {
        Input::Any(Any::Bool(value))
    }

    pub fn long(value: i64) -> Self {
        Input::Any(Any::Long(value))
    }

    pub fn double(value: f64) -> Self {
        Input::Any(Any::Double(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Input::Any(Any::String(value.into()))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Input::Any(Any::Bytes(value.into()))
    }

    pub fn collection(values: impl IntoIterator<Item = Any>) -> Self {
        Input::Any(Any::List(values.into_iter().collect()))
    }

    pub fn object(entries: impl IntoIterator<Item = (String, Any)>) -> Self {
        Input::Any(Any::Map(entries.into_iter().collect()))
    }
}

impl From<Any> for Input {
    fn from(v: Any) -> Self {
        Input::Any(v)
    }
}

impl From<bool> for Input {
    fn from(v: bool) -> Self {
        Input::Any(Any::Bool(v))
    }
}

impl From<i64> for Input {
    fn from(v: i64) -> Self {
        Input::Any(Any::Long(v))
    }
}

impl From<f64> for Input {
    fn from(v: f64) -> Self {
        Input::Any(Any::Double(v))
    }
}

impl From<&str> for Input {
    fn from(v: &str) -> Self {
        Input::Any(Any::String(v.to_owned()))
    }
}

impl From<String> for Input {
    fn from(v: String) -> Self {
        Input::Any(Any::String(v))
    }
}

/// Read-side cell. Reading never mutates; branch variants are live handles
/// into the owning document.
#[derive(Debug, Clone)]
pub enum Output {
    Any(Any),
    Text(Text),
    Array(Array),
    Map(Map),
    XmlText(XmlText),
    XmlElement(XmlElement),
    XmlFragment(XmlFragment),
}

impl Output {
    pub fn as_any(&self) -> Option<&Any> {
        match self {
            Output::Any(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_any().and_then(Any::as_str)
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Output::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Output::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Output::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_xml_text(&self) -> Option<&XmlText> {
        match self {
            Output::XmlText(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_xml_element(&self) -> Option<&XmlElement> {
        match self {
            Output::XmlElement(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_xml_fragment(&self) -> Option<&XmlFragment> {
        match self {
            Output::XmlFragment(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_keeps_integer_identity() {
        let json = serde_json::json!({"a": 1, "b": 1.5, "c": [true, null, "x"]});
        let any = Any::from_json(&json);
        assert_eq!(
            any,
            Any::Map(BTreeMap::from([
                ("a".into(), Any::Long(1)),
                ("b".into(), Any::Double(1.5)),
                (
                    "c".into(),
                    Any::List(vec![Any::Bool(true), Any::Null, Any::String("x".into())])
                ),
            ]))
        );
        assert_eq!(any.to_json(), json);
    }

    #[test]
    fn input_constructors_wrap_any() {
        assert_eq!(Input::long(3), Input::Any(Any::Long(3)));
        assert_eq!(Input::string("s"), Input::Any(Any::String("s".into())));
        assert_eq!(Input::from(2.0), Input::Any(Any::Double(2.0)));
    }
}
