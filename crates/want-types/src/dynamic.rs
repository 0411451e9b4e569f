//! The untyped parameter/state map and its safe typed coercions (spec §4.A).
//!
//! Wants exchange state and parameters as dynamic, YAML/JSON-shaped values.
//! Internally we carry a tagged variant rather than `serde_json::Value`
//! directly so that equality and deep-merge (used by `MergeState`, see
//! `want-core::want`) are total and don't depend on JSON number formatting.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamic value flowing through Want params/state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dynamic {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Dynamic>),
    Map(BTreeMap<String, Dynamic>),
}

impl Default for Dynamic {
    fn default() -> Self {
        Dynamic::Null
    }
}

impl fmt::Display for Dynamic {
    /// String rendering used for the differential "has this value changed"
    /// comparisons in `StoreState`/history-merging — numeric round-trips
    /// (`1` vs `1.0`) must compare equal, so integers render without a
    /// trailing `.0` and floats that happen to be whole also drop it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dynamic::Null => write!(f, "null"),
            Dynamic::Bool(b) => write!(f, "{b}"),
            Dynamic::Int(i) => write!(f, "{i}"),
            Dynamic::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Dynamic::String(s) => write!(f, "{s}"),
            Dynamic::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(","))
            }
            Dynamic::Map(map) => {
                let rendered: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}:{v}"))
                    .collect();
                write!(f, "{{{}}}", rendered.join(","))
            }
        }
    }
}

impl From<serde_json::Value> for Dynamic {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Dynamic::Null,
            serde_json::Value::Bool(b) => Dynamic::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Dynamic::Int(i)
                } else {
                    Dynamic::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Dynamic::String(s),
            serde_json::Value::Array(items) => {
                Dynamic::List(items.into_iter().map(Dynamic::from).collect())
            }
            serde_json::Value::Object(map) => Dynamic::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Dynamic::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Dynamic> for serde_json::Value {
    fn from(value: Dynamic) -> Self {
        match value {
            Dynamic::Null => serde_json::Value::Null,
            Dynamic::Bool(b) => serde_json::Value::Bool(b),
            Dynamic::Int(i) => serde_json::Value::Number(i.into()),
            Dynamic::Float(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Dynamic::String(s) => serde_json::Value::String(s),
            Dynamic::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Dynamic::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for Dynamic {
    fn from(s: &str) -> Self {
        Dynamic::String(s.to_string())
    }
}

impl From<String> for Dynamic {
    fn from(s: String) -> Self {
        Dynamic::String(s)
    }
}

impl From<bool> for Dynamic {
    fn from(b: bool) -> Self {
        Dynamic::Bool(b)
    }
}

impl From<i64> for Dynamic {
    fn from(i: i64) -> Self {
        Dynamic::Int(i)
    }
}

impl From<f64> for Dynamic {
    fn from(n: f64) -> Self {
        Dynamic::Float(n)
    }
}

pub type DynamicMap = BTreeMap<String, Dynamic>;

/// Coerce to `i64`; accepts integer and floating-point inputs, truncating.
pub fn as_int(v: &Dynamic) -> (i64, bool) {
    match v {
        Dynamic::Int(i) => (*i, true),
        Dynamic::Float(n) => (*n as i64, true),
        _ => (0, false),
    }
}

pub fn as_int_with_default(v: &Dynamic, default: i64) -> i64 {
    let (value, ok) = as_int(v);
    if ok {
        value
    } else {
        default
    }
}

/// Coerce to `f64`; accepts integer and floating-point inputs.
pub fn as_float(v: &Dynamic) -> (f64, bool) {
    match v {
        Dynamic::Float(n) => (*n, true),
        Dynamic::Int(i) => (*i as f64, true),
        _ => (0.0, false),
    }
}

pub fn as_float_with_default(v: &Dynamic, default: f64) -> f64 {
    let (value, ok) = as_float(v);
    if ok {
        value
    } else {
        default
    }
}

pub fn as_string(v: &Dynamic) -> (String, bool) {
    match v {
        Dynamic::String(s) => (s.clone(), true),
        _ => (String::new(), false),
    }
}

pub fn as_string_with_default(v: &Dynamic, default: &str) -> String {
    let (value, ok) = as_string(v);
    if ok {
        value
    } else {
        default.to_string()
    }
}

pub fn as_bool(v: &Dynamic) -> (bool, bool) {
    match v {
        Dynamic::Bool(b) => (*b, true),
        _ => (false, false),
    }
}

pub fn as_bool_with_default(v: &Dynamic, default: bool) -> bool {
    let (value, ok) = as_bool(v);
    if ok {
        value
    } else {
        default
    }
}

pub fn as_map(v: &Dynamic) -> (DynamicMap, bool) {
    match v {
        Dynamic::Map(m) => (m.clone(), true),
        _ => (DynamicMap::new(), false),
    }
}

pub fn as_map_with_default(v: &Dynamic, default: DynamicMap) -> DynamicMap {
    let (value, ok) = as_map(v);
    if ok {
        value
    } else {
        default
    }
}

pub fn as_array(v: &Dynamic) -> (Vec<Dynamic>, bool) {
    match v {
        Dynamic::List(items) => (items.clone(), true),
        _ => (Vec::new(), false),
    }
}

pub fn as_array_with_default(v: &Dynamic, default: Vec<Dynamic>) -> Vec<Dynamic> {
    let (value, ok) = as_array(v);
    if ok {
        value
    } else {
        default
    }
}

/// Equality used by the differential state/history checks: string
/// renderings, not structural equality, so `Int(1)` and `Float(1.0)`
/// compare equal the way the engine's history-merging relies on.
pub fn render_eq(a: &Dynamic, b: &Dynamic) -> bool {
    a.to_string() == b.to_string()
}

/// Deep merge used by `Want::merge_state`: when both sides are maps, merge
/// key by key; otherwise the incoming value overwrites.
pub fn deep_merge(base: &mut Dynamic, incoming: &Dynamic) {
    match (base, incoming) {
        (Dynamic::Map(base_map), Dynamic::Map(incoming_map)) => {
            for (k, v) in incoming_map {
                match base_map.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, incoming_value) => {
            *base_slot = incoming_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_round_trip_as_equal_strings() {
        let i = Dynamic::Int(1);
        let f = Dynamic::Float(1.0);
        assert_eq!(i.to_string(), f.to_string());
    }

    #[test]
    fn as_int_truncates_float() {
        let (v, ok) = as_int(&Dynamic::Float(3.9));
        assert!(ok);
        assert_eq!(v, 3);
    }

    #[test]
    fn as_int_fails_on_string() {
        let (v, ok) = as_int(&Dynamic::String("nope".into()));
        assert!(!ok);
        assert_eq!(v, 0);
    }

    #[test]
    fn deep_merge_combines_disjoint_submaps() {
        let mut base = Dynamic::Map(BTreeMap::new());
        let first: Dynamic = serde_json::from_str(
            r#"{"data_by_channel": {"0": {"Evidence": "a"}}}"#,
        )
        .unwrap();
        let second: Dynamic = serde_json::from_str(
            r#"{"data_by_channel": {"1": {"Description": "b"}}}"#,
        )
        .unwrap();
        deep_merge(&mut base, &first);
        deep_merge(&mut base, &second);

        let (map, _) = as_map(&base);
        let (channels, ok) = as_map(map.get("data_by_channel").unwrap());
        assert!(ok);
        assert!(channels.contains_key("0"));
        assert!(channels.contains_key("1"));
    }

    #[test]
    fn deep_merge_overwrites_scalars() {
        let mut base = Dynamic::Int(1);
        deep_merge(&mut base, &Dynamic::Int(2));
        assert_eq!(base, Dynamic::Int(2));
    }
}
