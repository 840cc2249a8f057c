//! Wire encoding of entity updates.
//!
//! Every message the sender pushes carries two frames: the protocol
//! version tag [`PROTOCOL_VERSION`] and a msgpack map describing one
//! update. Live entities serialize their full shape — attributes with
//! values and traits (or a deletion marker), parent and child UEIDs —
//! while tombstones carry only identity, timing and `exists: false`.
//!
//! Encoding uses named (map-style) msgpack so the payload is
//! self-describing; [`decode`] reverses it, mostly for tests and tooling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use entityd_core::{AttrValue, EntityUpdate};

/// First frame of every message.
pub const PROTOCOL_VERSION: &[u8] = b"streamapi/5";

/// Errors from the wire codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The update could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The payload could not be parsed.
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireAttr<'a> {
    Value {
        value: &'a AttrValue,
        traits: Vec<&'a str>,
    },
    Deleted {
        deleted: bool,
    },
}

#[derive(Serialize)]
struct LiveWire<'a> {
    #[serde(rename = "type")]
    etype: &'a str,
    ueid: String,
    timestamp: f64,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    attrs: BTreeMap<&'a str, WireAttr<'a>>,
    parents: Vec<String>,
    children: Vec<String>,
}

#[derive(Serialize)]
struct TombstoneWire<'a> {
    #[serde(rename = "type")]
    etype: &'a str,
    ueid: String,
    timestamp: f64,
    ttl: u32,
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
}

/// Encodes one update as the msgpack payload frame.
pub fn encode(update: &EntityUpdate) -> Result<Vec<u8>, CodecError> {
    if !update.exists() {
        let wire = TombstoneWire {
            etype: update.etype(),
            ueid: update.ueid().to_string(),
            timestamp: update.timestamp(),
            ttl: update.ttl(),
            exists: false,
            label: update.label(),
        };
        return Ok(rmp_serde::to_vec_named(&wire)?);
    }

    let mut attrs: BTreeMap<&str, WireAttr> = BTreeMap::new();
    for (name, attr) in update.attrs.iter() {
        attrs.insert(
            name,
            WireAttr::Value {
                value: attr.value(),
                traits: attr.traits().collect(),
            },
        );
    }
    for name in update.attrs.deleted() {
        attrs.insert(name, WireAttr::Deleted { deleted: true });
    }

    let wire = LiveWire {
        etype: update.etype(),
        ueid: update.ueid().to_string(),
        timestamp: update.timestamp(),
        ttl: update.ttl(),
        label: update.label(),
        attrs,
        parents: update.parents.iter().map(|u| u.to_string()).collect(),
        children: update.children.iter().map(|u| u.to_string()).collect(),
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// One attribute as decoded from the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DecodedAttr {
    /// A value-bearing attribute.
    Value {
        /// The attribute value.
        value: AttrValue,
        /// The attribute's trait tags.
        traits: Vec<String>,
    },
    /// A deletion marker.
    Deleted {
        /// Always true on the wire.
        deleted: bool,
    },
}

/// A payload frame, decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedUpdate {
    /// The entity type.
    #[serde(rename = "type")]
    pub etype: String,
    /// The 32-character hex UEID.
    pub ueid: String,
    /// Observation time, wall-clock seconds.
    pub timestamp: f64,
    /// Time-to-live in seconds.
    pub ttl: u32,
    /// Present (and false) only on tombstones.
    #[serde(default)]
    pub exists: Option<bool>,
    /// The display label, if any.
    #[serde(default)]
    pub label: Option<String>,
    /// The attribute map; absent on tombstones.
    #[serde(default)]
    pub attrs: BTreeMap<String, DecodedAttr>,
    /// Parent UEIDs; absent on tombstones.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Child UEIDs; absent on tombstones.
    #[serde(default)]
    pub children: Vec<String>,
}

/// Decodes a payload frame.
pub fn decode(payload: &[u8]) -> Result<DecodedUpdate, CodecError> {
    Ok(rmp_serde::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use entityd_core::{Ueid, traits};

    use super::*;

    #[test]
    fn live_update_round_trips() {
        let mut update = EntityUpdate::new("Host");
        update.set_label("db01");
        update.attrs.set("fqdn", "db01.example.com", &[traits::ENTITY_ID, traits::INDEX]);
        update.attrs.set("uptime", 3600, &[traits::UNIT_SECONDS]);
        update.attrs.set("load", 0.25, &[]);
        update.attrs.set("alive", true, &[]);
        update.attrs.set("blob", vec![1u8, 2, 3], &[]);
        update
            .attrs
            .set("disks", vec![AttrValue::from("sda"), AttrValue::from("sdb")], &[]);
        update.attrs.delete("stale");
        update.parents.add(Ueid::from_bytes([1; 16]));
        update.children.add(Ueid::from_bytes([2; 16]));

        let decoded = decode(&encode(&update).unwrap()).unwrap();

        assert_eq!(decoded.etype, "Host");
        assert_eq!(decoded.ueid, update.ueid().to_string());
        assert_eq!(decoded.timestamp, update.timestamp());
        assert_eq!(decoded.ttl, 120);
        assert_eq!(decoded.exists, None);
        assert_eq!(decoded.label.as_deref(), Some("db01"));
        assert_eq!(decoded.parents, vec![Ueid::from_bytes([1; 16]).to_string()]);
        assert_eq!(decoded.children, vec![Ueid::from_bytes([2; 16]).to_string()]);

        assert_eq!(
            decoded.attrs["fqdn"],
            DecodedAttr::Value {
                value: AttrValue::from("db01.example.com"),
                traits: vec![traits::ENTITY_ID.to_string(), traits::INDEX.to_string()],
            }
        );
        assert_eq!(
            decoded.attrs["uptime"],
            DecodedAttr::Value {
                value: AttrValue::Int(3600),
                traits: vec![traits::UNIT_SECONDS.to_string()],
            }
        );
        assert_eq!(
            decoded.attrs["blob"],
            DecodedAttr::Value {
                value: AttrValue::Bytes(vec![1, 2, 3]),
                traits: vec![],
            }
        );
        assert_eq!(decoded.attrs["stale"], DecodedAttr::Deleted { deleted: true });
    }

    #[test]
    fn tombstone_is_minimal() {
        let ueid = Ueid::from_bytes([9; 16]);
        let mut tombstone = EntityUpdate::with_ueid("Foo", ueid);
        tombstone.delete();

        let decoded = decode(&encode(&tombstone).unwrap()).unwrap();
        assert_eq!(decoded.etype, "Foo");
        assert_eq!(decoded.ueid, ueid.to_string());
        assert_eq!(decoded.exists, Some(false));
        assert_eq!(decoded.label, None);
        assert!(decoded.attrs.is_empty());
        assert!(decoded.parents.is_empty());
        assert!(decoded.children.is_empty());
    }

    #[test]
    fn label_is_omitted_when_unset() {
        let update = EntityUpdate::new("Host");
        let decoded = decode(&encode(&update).unwrap()).unwrap();
        assert_eq!(decoded.label, None);
    }
}
