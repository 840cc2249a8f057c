//! # entityd-transport
//!
//! The emission pipeline of the entityd agent: msgpack wire encoding,
//! curve certificate handling, and the [`EntitySender`] plugin that pushes
//! updates to the model builder over an authenticated, fire-and-forget
//! PUSH socket.
//!
//! Wire shape: every message is two frames — the `streamapi/5` protocol
//! tag, then a msgpack map with the update's type, UEID, timestamp, ttl
//! and (for live entities) attributes and relations. See [`codec`].

pub mod codec;
pub mod keys;
mod optimiser;
mod sender;

pub use codec::{CodecError, DecodedAttr, DecodedUpdate, PROTOCOL_VERSION};
pub use keys::{Certificate, CurveKeys, KeyError};
pub use sender::{EntitySender, SendError};
