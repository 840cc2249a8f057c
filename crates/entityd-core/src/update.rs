//! Entity updates.
//!
//! An [`EntityUpdate`] is one observation of one entity at one point in
//! time: its type, identifying and descriptive attributes, relations to
//! other entities, and a liveness flag. Collectors build updates, the
//! monitor merges and tracks them, and the sender encodes them for the
//! model builder.
//!
//! ```rust
//! use entityd_core::{EntityUpdate, traits};
//!
//! let mut host = EntityUpdate::new("Host");
//! host.attrs.set("fqdn", "db01.example.com", &[traits::ENTITY_ID, traits::INDEX]);
//! host.attrs.set("uptime", 86_400, &[traits::METRIC_COUNTER, traits::UNIT_SECONDS]);
//! host.set_label("db01.example.com");
//! assert_eq!(host.ueid().to_string().len(), 32);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ueid::Ueid;
use crate::value::AttrValue;

/// Default time-to-live for an update, in seconds.
pub const DEFAULT_TTL: u32 = 120;

// ─── Attributes ──────────────────────────────────────────────────────────────

/// A value-bearing attribute: the value plus its trait tags.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAttr {
    value: AttrValue,
    traits: BTreeSet<String>,
}

impl UpdateAttr {
    /// The attribute value.
    pub fn value(&self) -> &AttrValue {
        &self.value
    }

    /// The attribute's trait tags, in sorted order.
    pub fn traits(&self) -> impl Iterator<Item = &str> {
        self.traits.iter().map(String::as_str)
    }

    /// Whether the attribute carries the given trait.
    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.contains(name)
    }
}

/// One attribute slot: either a value or a deletion marker, never both.
#[derive(Debug, Clone, PartialEq)]
enum AttrSlot {
    Set(UpdateAttr),
    Deleted,
}

/// The attribute table of an update.
///
/// Each name holds either a value (with traits) or a deletion marker.
/// Setting a name replaces whatever was there before; so does deleting it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateAttrs {
    slots: BTreeMap<String, AttrSlot>,
}

impl UpdateAttrs {
    /// Sets an attribute, replacing any previous value, traits or deletion
    /// marker under the same name.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttrValue>,
        traits: &[&str],
    ) {
        self.slots.insert(
            name.into(),
            AttrSlot::Set(UpdateAttr {
                value: value.into(),
                traits: traits.iter().map(|t| t.to_string()).collect(),
            }),
        );
    }

    /// Marks an attribute as deleted, discarding any value it held.
    pub fn delete(&mut self, name: impl Into<String>) {
        self.slots.insert(name.into(), AttrSlot::Deleted);
    }

    /// Removes a name entirely, leaving neither value nor deletion marker.
    pub fn clear(&mut self, name: &str) {
        self.slots.remove(name);
    }

    /// Looks up a value-bearing attribute.
    pub fn get(&self, name: &str) -> Option<&UpdateAttr> {
        match self.slots.get(name) {
            Some(AttrSlot::Set(attr)) => Some(attr),
            _ => None,
        }
    }

    /// Whether the name carries a deletion marker.
    pub fn is_deleted(&self, name: &str) -> bool {
        matches!(self.slots.get(name), Some(AttrSlot::Deleted))
    }

    /// Iterates the value-bearing attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UpdateAttr)> {
        self.slots.iter().filter_map(|(name, slot)| match slot {
            AttrSlot::Set(attr) => Some((name.as_str(), attr)),
            AttrSlot::Deleted => None,
        })
    }

    /// Iterates the deleted attribute names in name order.
    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|(name, slot)| match slot {
            AttrSlot::Deleted => Some(name.as_str()),
            AttrSlot::Set(_) => None,
        })
    }

    /// Number of names present, counting deletion markers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table holds no names at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn overlay(&mut self, other: UpdateAttrs) {
        self.slots.extend(other.slots);
    }
}

// ─── Relations ───────────────────────────────────────────────────────────────

/// A set of related entity ids, used for both parents and children.
///
/// Relations hold UEIDs only; adding an [`EntityUpdate`] extracts its id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationSet {
    ueids: BTreeSet<Ueid>,
}

impl RelationSet {
    /// Adds a relation, accepting a [`Ueid`] or an `&EntityUpdate`.
    pub fn add(&mut self, relation: impl Into<Ueid>) {
        self.ueids.insert(relation.into());
    }

    /// Whether the set contains the given id.
    pub fn contains(&self, ueid: &Ueid) -> bool {
        self.ueids.contains(ueid)
    }

    /// Iterates the ids in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Ueid> {
        self.ueids.iter()
    }

    /// Number of related ids.
    pub fn len(&self) -> usize {
        self.ueids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ueids.is_empty()
    }

    fn merge(&mut self, other: RelationSet) {
        self.ueids.extend(other.ueids);
    }
}

// ─── EntityUpdate ────────────────────────────────────────────────────────────

/// One observation of one entity at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    etype: String,
    label: Option<String>,
    timestamp: f64,
    ttl: u32,
    exists: bool,
    ueid: Option<Ueid>,
    /// The attribute table.
    pub attrs: UpdateAttrs,
    /// UEIDs of this entity's parents.
    pub parents: RelationSet,
    /// UEIDs of this entity's children.
    pub children: RelationSet,
}

impl EntityUpdate {
    /// Creates a live update of the given entity type, timestamped now.
    pub fn new(etype: impl Into<String>) -> Self {
        EntityUpdate {
            etype: etype.into(),
            label: None,
            timestamp: now(),
            ttl: DEFAULT_TTL,
            exists: true,
            ueid: None,
            attrs: UpdateAttrs::default(),
            parents: RelationSet::default(),
            children: RelationSet::default(),
        }
    }

    /// Creates an update with an explicitly pinned UEID.
    ///
    /// The pinned id is never recomputed from attributes; this is how the
    /// monitor builds tombstones that keep the identity of the entity they
    /// replace.
    pub fn with_ueid(etype: impl Into<String>, ueid: Ueid) -> Self {
        let mut update = EntityUpdate::new(etype);
        update.ueid = Some(ueid);
        update
    }

    /// The entity type, e.g. `"Host"` or `"Kubernetes:Pod"`.
    pub fn etype(&self) -> &str {
        &self.etype
    }

    /// The human-readable label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Sets the display label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Wall-clock seconds at which the observation was made.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Seconds the downstream model may consider this entity live without a
    /// refresh.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Overrides the default time-to-live.
    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    /// False once the update has been turned into a tombstone.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Marks the entity as gone. The UEID is unaffected.
    pub fn delete(&mut self) {
        self.exists = false;
    }

    /// The update's unique entity id.
    ///
    /// Derived from the type and the `entity:id` attributes unless an
    /// explicit id was pinned at construction.
    pub fn ueid(&self) -> Ueid {
        match self.ueid {
            Some(ueid) => ueid,
            None => Ueid::derive(&self.etype, &self.attrs),
        }
    }

    /// Overlays `other` onto this update: its attributes (values and
    /// deletion markers alike) replace same-named ones here, and its
    /// relations are unioned in. Later writers win per attribute name.
    pub fn merge(&mut self, other: EntityUpdate) {
        if other.label.is_some() {
            self.label = other.label;
        }
        self.attrs.overlay(other.attrs);
        self.parents.merge(other.parents);
        self.children.merge(other.children);
    }
}

impl From<&EntityUpdate> for Ueid {
    fn from(update: &EntityUpdate) -> Ueid {
        update.ueid()
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
