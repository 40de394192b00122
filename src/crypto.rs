//! Authentication primitives for the challenge/response protocol.
//!
//! The only trust boundary in the system is here: a candidate address
//! from the DHT is believed to be a sibling iff it can return
//! HMAC-SHA256(passphrase, nonce) for a nonce we just generated. The DHT
//! itself is untrusted and anyone can answer a lookup.
//!
//! ## Process context
//!
//! The passphrase, the per-process dedupe ID and the self-connection
//! switch are not globals; they live in an [`AuthContext`] built once at
//! startup and passed into every component. Two discoverers in the same
//! process therefore carry distinct dedupe IDs.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::frames::{DEDUPE_LEN, MAC_LEN, NONCE_LEN};

type HmacSha256 = Hmac<Sha256>;

/// The system CSPRNG refused to produce bytes. Aborts the current
/// verification attempt only; the pipeline keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngError {
    pub code: Option<u32>,
}

impl std::fmt::Display for RngError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "system CSPRNG unavailable (error code {})", code),
            None => write!(f, "system CSPRNG unavailable"),
        }
    }
}

impl std::error::Error for RngError {}

impl From<rand::Error> for RngError {
    fn from(err: rand::Error) -> Self {
        Self { code: err.code().map(|c| c.get()) }
    }
}

/// Process-scoped authentication material shared by the verifier and the
/// responder. Read-only after construction and freely shareable across
/// tasks.
pub struct AuthContext {
    passphrase: Vec<u8>,
    dedupe: [u8; DEDUPE_LEN],
    allow_self_connection: bool,
}

impl AuthContext {
    /// Build the context for this process, drawing a fresh dedupe ID from
    /// the system CSPRNG.
    pub fn new(passphrase: impl Into<Vec<u8>>) -> Result<Self, RngError> {
        let mut dedupe = [0u8; DEDUPE_LEN];
        OsRng.try_fill_bytes(&mut dedupe)?;
        Ok(Self {
            passphrase: passphrase.into(),
            dedupe,
            allow_self_connection: false,
        })
    }

    /// Let the responder answer challenges carrying its own dedupe ID.
    /// Only useful when exercising a responder from within the same
    /// context, e.g. loopback tests.
    pub fn with_self_connection_allowed(mut self) -> Self {
        self.allow_self_connection = true;
        self
    }

    /// The shared secret. Never logged, never transmitted.
    pub fn passphrase(&self) -> &[u8] {
        &self.passphrase
    }

    pub fn dedupe(&self) -> [u8; DEDUPE_LEN] {
        self.dedupe
    }

    pub fn self_connection_allowed(&self) -> bool {
        self.allow_self_connection
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The passphrase must not leak through Debug formatting.
        f.debug_struct("AuthContext")
            .field("dedupe", &hex::encode(self.dedupe))
            .field("allow_self_connection", &self.allow_self_connection)
            .finish_non_exhaustive()
    }
}

/// Draw a fresh challenge nonce from the system CSPRNG.
pub fn fresh_nonce() -> Result<[u8; NONCE_LEN], RngError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce)?;
    Ok(nonce)
}

/// HMAC-SHA256 over a challenge nonce, keyed by the passphrase.
pub fn compute_mac(passphrase: &[u8], nonce: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new_from_slice(passphrase)
        .expect("HMAC accepts keys of any length");
    mac.update(nonce);
    mac.finalize().into_bytes().into()
}

/// Check a received tag against the expected MAC in constant time.
pub fn verify_mac(passphrase: &[u8], nonce: &[u8], tag: &[u8; MAC_LEN]) -> bool {
    let expected = compute_mac(passphrase, nonce);
    expected.as_slice().ct_eq(tag.as_slice()).into()
}
