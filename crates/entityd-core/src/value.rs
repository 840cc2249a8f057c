//! Attribute values.
//!
//! Every attribute on an [`EntityUpdate`](crate::EntityUpdate) carries an
//! [`AttrValue`]: a small, self-describing union of the value kinds the wire
//! format can express. The variants map one-to-one onto msgpack's type
//! system (nil, bool, integers, float, string, raw bytes, array, map), so an
//! attribute that fits in an `AttrValue` is guaranteed to serialize.
//!
//! Collectors mostly build values through the `From` conversions:
//!
//! ```rust
//! use entityd_core::AttrValue;
//!
//! let a: AttrValue = "db01.example.com".into();
//! let b: AttrValue = 8080.into();
//! let c: AttrValue = vec![AttrValue::from("eth0"), AttrValue::from("eth1")].into();
//! ```
//!
//! REST-sourced collectors can convert straight from decoded JSON via
//! `From<serde_json::Value>`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single attribute value.
///
/// Integers normalise towards `Int`: unsigned sources only produce `UInt`
/// when the value does not fit in an `i64`, which keeps encode/decode
/// round-trips exact.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Canonical text rendering used for identity derivation.
    ///
    /// This rendering is part of every UEID ever issued, so it is fixed for
    /// all time:
    ///
    /// - `Null` → `null`, `Bool` → `true`/`false`
    /// - integers → decimal, `Float` → Rust's `f64` `Display` output
    /// - `Str` → the string verbatim
    /// - `Bytes` → lowercase hex
    /// - `List` → `[` + element renderings joined by `,` + `]`
    /// - `Map` → `{` + `key=value` pairs in key order joined by `,` + `}`
    pub fn canonical_text(&self) -> String {
        match self {
            AttrValue::Null => "null".to_string(),
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::UInt(u) => u.to_string(),
            AttrValue::Float(f) => f.to_string(),
            AttrValue::Str(s) => s.clone(),
            AttrValue::Bytes(b) => hex::encode(b),
            AttrValue::List(items) => {
                let parts: Vec<String> = items.iter().map(AttrValue::canonical_text).collect();
                format!("[{}]", parts.join(","))
            }
            AttrValue::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value.canonical_text()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

// ─── Conversions ─────────────────────────────────────────────────────────────

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v.into())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(v.into())
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => AttrValue::Int(i),
            Err(_) => AttrValue::UInt(v),
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        AttrValue::Bytes(v)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(v: Vec<AttrValue>) -> Self {
        AttrValue::List(v)
    }
}

impl From<BTreeMap<String, AttrValue>> for AttrValue {
    fn from(v: BTreeMap<String, AttrValue>) -> Self {
        AttrValue::Map(v)
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => AttrValue::Null,
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    AttrValue::UInt(u)
                } else {
                    AttrValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => AttrValue::Str(s),
            serde_json::Value::Array(items) => {
                AttrValue::List(items.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(entries) => AttrValue::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, AttrValue::from(value)))
                    .collect(),
            ),
        }
    }
}

// ─── Serde ───────────────────────────────────────────────────────────────────

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttrValue::Null => serializer.serialize_unit(),
            AttrValue::Bool(b) => serializer.serialize_bool(*b),
            AttrValue::Int(i) => serializer.serialize_i64(*i),
            AttrValue::UInt(u) => serializer.serialize_u64(*u),
            AttrValue::Float(f) => serializer.serialize_f64(*f),
            AttrValue::Str(s) => serializer.serialize_str(s),
            AttrValue::Bytes(b) => serializer.serialize_bytes(b),
            AttrValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            AttrValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct AttrValueVisitor;

impl<'de> Visitor<'de> for AttrValueVisitor {
    type Value = AttrValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an attribute value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<AttrValue, E> {
        Ok(AttrValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<AttrValue, E> {
        Ok(AttrValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<AttrValue, D::Error> {
        deserializer.deserialize_any(AttrValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<AttrValue, E> {
        Ok(AttrValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<AttrValue, E> {
        Ok(AttrValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<AttrValue, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => AttrValue::Int(i),
            Err(_) => AttrValue::UInt(v),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<AttrValue, E> {
        Ok(AttrValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<AttrValue, E> {
        Ok(AttrValue::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<AttrValue, E> {
        Ok(AttrValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<AttrValue, E> {
        Ok(AttrValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<AttrValue, E> {
        Ok(AttrValue::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<AttrValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(AttrValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AttrValue, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, AttrValue>()? {
            entries.insert(key, value);
        }
        Ok(AttrValue::Map(entries))
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<AttrValue, D::Error> {
        deserializer.deserialize_any(AttrValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_scalars() {
        assert_eq!(AttrValue::Null.canonical_text(), "null");
        assert_eq!(AttrValue::Bool(true).canonical_text(), "true");
        assert_eq!(AttrValue::Int(-3).canonical_text(), "-3");
        assert_eq!(AttrValue::Float(1.5).canonical_text(), "1.5");
        assert_eq!(AttrValue::from("h1").canonical_text(), "h1");
        assert_eq!(AttrValue::Bytes(vec![0xde, 0xad]).canonical_text(), "dead");
    }

    #[test]
    fn canonical_text_nested() {
        let list = AttrValue::from(vec![AttrValue::from(1), AttrValue::from("a")]);
        assert_eq!(list.canonical_text(), "[1,a]");

        let mut entries = BTreeMap::new();
        entries.insert("b".to_string(), AttrValue::from(2));
        entries.insert("a".to_string(), AttrValue::from(1));
        assert_eq!(AttrValue::from(entries).canonical_text(), "{a=1,b=2}");
    }

    #[test]
    fn unsigned_normalises_to_int() {
        assert_eq!(AttrValue::from(7u64), AttrValue::Int(7));
        assert!(matches!(AttrValue::from(u64::MAX), AttrValue::UInt(_)));
    }

    #[test]
    fn from_json_value() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"name": "web", "ports": [80, 443], "ready": true}"#).unwrap();
        let value = AttrValue::from(json);
        let AttrValue::Map(entries) = value else {
            panic!("expected a map");
        };
        assert_eq!(entries["name"], AttrValue::from("web"));
        assert_eq!(
            entries["ports"],
            AttrValue::List(vec![AttrValue::Int(80), AttrValue::Int(443)])
        );
        assert_eq!(entries["ready"], AttrValue::Bool(true));
    }
}
