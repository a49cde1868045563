//! At-rest payload encoding.
//!
//! The codec name is stored with every tombstone; restore refuses to decode a
//! payload written by a different codec.

use std::fmt::Debug;

use crate::error::Result;

pub trait Codec: Send + Sync + Debug {
    /// Name persisted in the `codec` column.
    fn name(&self) -> &'static str;

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>>;

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>>;
}

/// Stores payloads verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn encode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_lossless() {
        let codec = IdentityCodec;
        let bytes = [0u8, 159, 146, 150, 255];
        assert_eq!(codec.decode(&codec.encode(&bytes).unwrap()).unwrap(), bytes);
        assert_eq!(codec.name(), "identity");
    }
}
