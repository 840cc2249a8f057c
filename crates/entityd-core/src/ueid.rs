//! Unique Entity IDs.
//!
//! A [`Ueid`] names one entity for its whole lifetime: it is derived from the
//! entity's type and its identifying attributes only, so two observations of
//! the same entity always hash to the same id, no matter which host or
//! process produced them.

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::update::UpdateAttrs;

/// A 16-byte unique entity identifier.
///
/// Rendered as 32 lowercase hex characters on the wire and in the key-value
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ueid([u8; Ueid::LEN]);

impl Ueid {
    /// Length of the identifier in bytes.
    pub const LEN: usize = 16;

    /// Wraps raw identifier bytes.
    pub fn from_bytes(bytes: [u8; Ueid::LEN]) -> Self {
        Ueid(bytes)
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; Ueid::LEN] {
        &self.0
    }

    /// Derives the identifier for an entity of type `etype` with the given
    /// attribute table.
    ///
    /// Attributes whose traits include `entity:id` each contribute a
    /// `name=value` token, with the value rendered by
    /// [`AttrValue::canonical_text`](crate::AttrValue::canonical_text). The
    /// tokens are sorted, joined with `|` behind the type, and hashed with
    /// SHA-1; the first 16 digest bytes form the id. Deleted attribute
    /// markers never contribute.
    pub fn derive(etype: &str, attrs: &UpdateAttrs) -> Self {
        let mut tokens: Vec<String> = attrs
            .iter()
            .filter(|(_, attr)| attr.has_trait(crate::traits::ENTITY_ID))
            .map(|(name, attr)| format!("{}={}", name, attr.value().canonical_text()))
            .collect();
        tokens.sort();

        let mut hasher = Sha1::new();
        hasher.update(etype.as_bytes());
        hasher.update(b"|");
        hasher.update(tokens.join("|").as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; Ueid::LEN];
        bytes.copy_from_slice(&digest[..Ueid::LEN]);
        Ueid(bytes)
    }
}

impl fmt::Display for Ueid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Error parsing a hex-rendered UEID.
#[derive(Debug, Error)]
#[error("invalid ueid: {reason}")]
pub struct ParseUeidError {
    reason: String,
}

impl FromStr for Ueid {
    type Err = ParseUeidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|err| ParseUeidError {
            reason: err.to_string(),
        })?;
        let bytes: [u8; Ueid::LEN] = decoded.try_into().map_err(|_| ParseUeidError {
            reason: format!("expected {} hex characters", Ueid::LEN * 2),
        })?;
        Ok(Ueid(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let ueid = Ueid::from_bytes([0xab; 16]);
        let rendered = ueid.to_string();
        assert_eq!(rendered.len(), 32);
        assert_eq!(rendered, "ab".repeat(16));
        assert_eq!(rendered.parse::<Ueid>().unwrap(), ueid);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("zz".repeat(16).parse::<Ueid>().is_err());
        assert!("abcd".parse::<Ueid>().is_err());
    }
}
