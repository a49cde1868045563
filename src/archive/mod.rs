//! Archive API: store, restore and link tombstones.

pub mod codec;
pub mod detect;
pub mod service;

pub use codec::{Codec, IdentityCodec};
pub use service::{
    ArchiveService, RestoreReceipt, RestoreService, Restored, StoreReceipt, StoreRequest,
};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
