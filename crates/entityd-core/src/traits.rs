//! Well-known attribute trait tags.
//!
//! Traits are free-form strings the downstream model uses to pick
//! renderers, units and index behaviour. The agent treats them opaquely,
//! with one exception: [`ENTITY_ID`] marks the attributes that feed UEID
//! derivation. The constants here only exist so collectors spell the common
//! tags consistently.

/// The attribute contributes to the entity's UEID.
pub const ENTITY_ID: &str = "entity:id";
/// The attribute value is itself a UEID.
pub const ENTITY_UEID: &str = "entity:ueid";
/// The attribute should be indexed for lookups.
pub const INDEX: &str = "index";

/// A monotonically increasing counter.
pub const METRIC_COUNTER: &str = "metric:counter";
/// A point-in-time gauge.
pub const METRIC_GAUGE: &str = "metric:gauge";

pub const UNIT_BYTES: &str = "unit:bytes";
pub const UNIT_SECONDS: &str = "unit:seconds";
pub const UNIT_PERCENT: &str = "unit:percent";

/// A duration rather than a point in time.
pub const TIME_DURATION: &str = "time:duration";
/// An RFC 3339 timestamp.
pub const TIME_RFC3339: &str = "time:rfc3339";
/// An RFC 3339 timestamp (chronological ordering hint).
pub const CHRONO_RFC3339: &str = "chrono:rfc3339";

pub const URI: &str = "uri";
pub const IPADDR_V4: &str = "ipaddr:v4";
pub const IPADDR_V6: &str = "ipaddr:v6";
