// Canonical JSON value model shared by the wire-format adapters.
//
// Providers disagree on numeric width, field order and how `null` is
// spelled across their SSE payloads; this type gives the rest of the
// crate one JSON currency to convert into/out of instead of leaning on
// `serde_json::Value` at every seam, which is fine for app code but
// leaks serde_json's map ordering and number-widening quirks into a
// library's public API.

use serde::de::{self, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A JSON value, represented as a tagged union rather than as
/// `serde_json::Value` so integers and floats stay distinguishable and
/// object field order is preserved exactly as received.
#[derive(Debug, Clone)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(Vec<(String, JsonValue)>),
}

#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl JsonValue {
    /// Fast path for decoding a complete, self-contained JSON document
    /// from raw bytes (an SSE `data:` payload, an HTTP response body).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JsonError> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_serde_value(raw))
    }

    pub fn from_str(s: &str) -> Result<Self, JsonError> {
        Self::from_bytes(s.as_bytes())
    }

    /// Project a `serde_json::Value` into this type directly, without a
    /// byte round-trip.
    pub fn from_serde(v: serde_json::Value) -> Self {
        Self::from_serde_value(v)
    }

    fn from_serde_value(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => JsonValue::Null,
            serde_json::Value::Bool(b) => JsonValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    JsonValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&f) {
                        JsonValue::Int(f as i64)
                    } else {
                        JsonValue::Float(f)
                    }
                } else {
                    JsonValue::Float(0.0)
                }
            }
            serde_json::Value::String(s) => JsonValue::String(s),
            serde_json::Value::Array(a) => {
                JsonValue::Array(a.into_iter().map(Self::from_serde_value).collect())
            }
            serde_json::Value::Object(o) => JsonValue::Object(
                o.into_iter()
                    .map(|(k, v)| (k, Self::from_serde_value(v)))
                    .collect(),
            ),
        }
    }

    /// Project into a `serde_json::Value`, for call sites (e.g. the MCP
    /// wire layer) that need to hand a payload to a `serde_json`-based
    /// API rather than encode/decode through bytes.
    pub fn to_serde_value(&self) -> serde_json::Value {
        match self {
            JsonValue::Null => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(*b),
            JsonValue::Int(i) => serde_json::Value::Number((*i).into()),
            JsonValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            JsonValue::String(s) => serde_json::Value::String(s.clone()),
            JsonValue::Array(a) => {
                serde_json::Value::Array(a.iter().map(Self::to_serde_value).collect())
            }
            JsonValue::Object(o) => serde_json::Value::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), v.to_serde_value()))
                    .collect(),
            ),
        }
    }

    /// Serialize to bytes in the order fields were constructed, i.e.
    /// `decode(encode(v)) == v` holds even for object field order.
    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_serde_value()).unwrap_or_default()
    }

    /// Canonical form: object keys sorted recursively. Used anywhere a
    /// stable byte representation is required (request signing).
    pub fn canonicalize(&self) -> JsonValue {
        match self {
            JsonValue::Array(a) => JsonValue::Array(a.iter().map(Self::canonicalize).collect()),
            JsonValue::Object(o) => {
                let mut entries: Vec<(String, JsonValue)> =
                    o.iter().map(|(k, v)| (k.clone(), v.canonicalize())).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                JsonValue::Object(entries)
            }
            other => other.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Int(i) => Some(*i),
            JsonValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Int(i) => Some(*i as f64),
            JsonValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            JsonValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, JsonValue)]> {
        match self {
            JsonValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        match self {
            JsonValue::Object(o) => o.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&JsonValue> {
        match self {
            JsonValue::Array(a) => a.get(i),
            _ => None,
        }
    }

    pub fn object(entries: impl IntoIterator<Item = (impl Into<String>, JsonValue)>) -> Self {
        JsonValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// Object equality is key-set equality plus pointwise value equality,
// independent of insertion order; array order is significant.
impl PartialEq for JsonValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsonValue::Null, JsonValue::Null) => true,
            (JsonValue::Bool(a), JsonValue::Bool(b)) => a == b,
            (JsonValue::Int(a), JsonValue::Int(b)) => a == b,
            (JsonValue::Float(a), JsonValue::Float(b)) => a == b,
            (JsonValue::String(a), JsonValue::String(b)) => a == b,
            (JsonValue::Array(a), JsonValue::Array(b)) => a == b,
            (JsonValue::Object(a), JsonValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            _ => false,
        }
    }
}

impl From<&str> for JsonValue {
    fn from(s: &str) -> Self {
        JsonValue::String(s.to_string())
    }
}

impl From<String> for JsonValue {
    fn from(s: String) -> Self {
        JsonValue::String(s)
    }
}

impl From<i64> for JsonValue {
    fn from(i: i64) -> Self {
        JsonValue::Int(i)
    }
}

impl From<f64> for JsonValue {
    fn from(f: f64) -> Self {
        JsonValue::Float(f)
    }
}

impl From<bool> for JsonValue {
    fn from(b: bool) -> Self {
        JsonValue::Bool(b)
    }
}

// The cascading decode path: any struct that derives Serialize/Deserialize
// and embeds a `JsonValue` field gets it decoded through here, instead of
// only supporting the `from_bytes` fast path at the outermost layer.
impl Serialize for JsonValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JsonValue::Null => serializer.serialize_unit(),
            JsonValue::Bool(b) => serializer.serialize_bool(*b),
            JsonValue::Int(i) => serializer.serialize_i64(*i),
            JsonValue::Float(f) => serializer.serialize_f64(*f),
            JsonValue::String(s) => serializer.serialize_str(s),
            JsonValue::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            JsonValue::Object(o) => {
                let mut map = serializer.serialize_map(Some(o.len()))?;
                for (k, v) in o {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for JsonValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct JsonValueVisitor;

        impl<'de> Visitor<'de> for JsonValueVisitor {
            type Value = JsonValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON value")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(JsonValue::Null)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(JsonValue::Null)
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(JsonValue::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(JsonValue::Int(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(JsonValue::Int(v as i64))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(JsonValue::Float(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(JsonValue::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(JsonValue::String(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(JsonValue::Array(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((k, v)) = map.next_entry()? {
                    entries.push((k, v));
                }
                Ok(JsonValue::Object(entries))
            }
        }

        deserializer.deserialize_any(JsonValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let src = JsonValue::object([
            ("name", JsonValue::from("claude")),
            ("max_tokens", JsonValue::from(1024_i64)),
            ("stream", JsonValue::from(true)),
        ]);
        let bytes = src.to_vec();
        let decoded = JsonValue::from_bytes(&bytes).unwrap();
        assert_eq!(src, decoded);
    }

    #[test]
    fn cascades_through_serde_derive() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            payload: JsonValue,
        }

        let w = Wrapper {
            payload: JsonValue::from("hello"),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload, JsonValue::String("hello".into()));
    }

    #[test]
    fn canonicalize_sorts_object_keys() {
        let v = JsonValue::object([("b", JsonValue::from(1_i64)), ("a", JsonValue::from(2_i64))]);
        let canon = v.canonicalize();
        let keys: Vec<&str> = canon.as_object().unwrap().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn distinguishes_int_from_float() {
        // Whole-valued floats fold into Int at the decode boundary; only a
        // fractional part keeps a value tagged as Float.
        let v = JsonValue::from_str("1.0").unwrap();
        assert!(matches!(v, JsonValue::Int(_)));
        let v = JsonValue::from_str("1.5").unwrap();
        assert!(matches!(v, JsonValue::Float(_)));
        let v = JsonValue::from_str("1").unwrap();
        assert!(matches!(v, JsonValue::Int(_)));
    }

    #[test]
    fn object_equality_ignores_key_order() {
        let a = JsonValue::object([("a", JsonValue::from(1_i64)), ("b", JsonValue::from(2_i64))]);
        let b = JsonValue::object([("b", JsonValue::from(2_i64)), ("a", JsonValue::from(1_i64))]);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_array_and_empty_object_are_unequal() {
        assert_ne!(JsonValue::Array(vec![]), JsonValue::Object(vec![]));
    }

    #[test]
    fn integer_and_float_are_unequal_for_same_value() {
        assert_ne!(JsonValue::Int(1), JsonValue::Float(1.0));
    }

    #[test]
    fn accessors_on_wrong_variant_return_none() {
        let v = JsonValue::from("text");
        assert!(v.as_i64().is_none());
        assert!(v.as_array().is_none());
        assert!(v.get("key").is_none());
    }
}
