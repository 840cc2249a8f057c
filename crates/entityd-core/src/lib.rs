//! # entityd-core
//!
//! The entity model of the entityd monitoring agent.
//!
//! Everything the agent knows about the world is expressed as a stream of
//! [`EntityUpdate`]s: typed observations with attributes, parent/child
//! relations and a deterministic identity. This crate defines those values
//! and nothing else — it has no opinion about how updates are collected,
//! merged or transmitted.
//!
//! - [`EntityUpdate`] — one observation of one entity at one time, with its
//!   attribute table ([`UpdateAttrs`]) and relation sets ([`RelationSet`]).
//! - [`AttrValue`] — the msgpack-compatible value union attributes carry.
//! - [`Ueid`] — the 16-byte identity derived from an update's type and its
//!   `entity:id` attributes.
//! - [`traits`] — the well-known attribute trait tags.

pub mod traits;
mod ueid;
mod update;
mod value;

pub use ueid::{ParseUeidError, Ueid};
pub use update::{DEFAULT_TTL, EntityUpdate, RelationSet, UpdateAttr, UpdateAttrs};
pub use value::AttrValue;
