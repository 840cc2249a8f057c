//! # entityd
//!
//! A host-resident topology and telemetry agent. entityd periodically
//! discovers the infrastructure entities living on the machine it runs on
//! — hosts, processes, containers, orchestrator resources — expresses them
//! as a stream of typed [`EntityUpdate`]s with deterministic identity
//! ([`Ueid`]) and parent/child relations, and pushes that stream to a
//! remote model builder over an authenticated message transport.
//!
//! ## Architecture
//!
//! Everything beyond the collection engine is a plugin bound to named hook
//! points:
//!
//! ```text
//! ┌────────────┐   entityd_find_entity    ┌─────────────────┐
//! │  Monitor   │─────────────────────────▶│   Collectors    │
//! │ (60s tick) │◀─────────────────────────│ (host, k8s, …)  │
//! └─────┬──────┘      EntityUpdates       └─────────────────┘
//!       │ merge · tombstone · track
//!       │ entityd_send_entity
//! ┌─────▼──────┐   streamapi/5 + msgpack  ┌─────────────────┐
//! │   Sender   │─────────────────────────▶│     modeld      │
//! └────────────┘    curve-authed push     └─────────────────┘
//! ```
//!
//! The crates compose bottom-up: [`entityd_core`] is the entity model,
//! [`entityd_framework`] the plugin manager and session plumbing,
//! [`entityd_transport`] the wire codec and sender, and
//! [`entityd_runtime`] the builtin plugins plus process bootstrap. This
//! crate re-exports the lot and ships the `entityd` and `entityd-health`
//! binaries.

pub use entityd_core::*;
pub use entityd_framework as framework;
pub use entityd_runtime as runtime;
pub use entityd_transport as transport;
