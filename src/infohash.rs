//! Derivation of the DHT lookup key from a passphrase.
//!
//! Every process sharing a passphrase must land on the bit-identical
//! 20-byte infohash, since that key is what siblings announce and search
//! under on the Mainline DHT. The derivation is therefore part of the
//! interop contract and must not change.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Key type under which siblings announce themselves (Mainline uses SHA-1
/// sized keys).
pub type InfoHash = [u8; 20];

/// Derive the DHT infohash for a passphrase.
///
/// The passphrase is hashed with SHA-256 and only the first half of that
/// digest is hashed again with SHA-1 to produce the 20-byte key. The
/// infohash is visible to anyone watching the DHT, so it must not let an
/// observer with a rainbow table walk back to the passphrase; the
/// truncated double hash gives a second preimage layer while staying
/// deterministic across implementations.
pub fn derive_infohash(passphrase: &[u8]) -> InfoHash {
    let digest = Sha256::digest(passphrase);
    Sha1::digest(&digest[..16]).into()
}
