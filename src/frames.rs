//! Wire frames for the challenge/response protocol.
//!
//! Both frames are fixed-width with no length prefix or delimiter; the
//! bytes below are the compatibility contract between implementations.
//!
//! ```text
//! Challenge (36 bytes)                Response (34 bytes)
//! ┌────────┬────────┬─────────┐       ┌──────┬──────────────┐
//! │ magic  │ dedupe │ nonce   │       │ port │ HMAC-SHA256  │
//! │ 6 B    │ 10 B   │ 20 B    │       │ u16  │ 32 B         │
//! └────────┴────────┴─────────┘       └──────┴──────────────┘
//! ```
//!
//! Multi-byte integers are little-endian. A short frame is a hard parse
//! failure. Oversize input is rejected for responses; for challenges the
//! UDP receive path hands in whole datagrams, so only the leading 36
//! bytes are parsed and any trailer is ignored.

/// Magic bytes identifying challenge frames. Unrelated DHT clients
/// routinely probe announced infohashes; anything without this prefix is
/// not speaking our protocol.
pub const MAGIC_HEADER: [u8; 6] = *b"wherez";

/// Width of the per-process dedupe ID.
pub const DEDUPE_LEN: usize = 10;

/// Width of the random challenge nonce.
pub const NONCE_LEN: usize = 20;

/// Width of the HMAC-SHA256 tag.
pub const MAC_LEN: usize = 32;

/// Total challenge frame size: magic(6) + dedupe(10) + nonce(20).
pub const CHALLENGE_LEN: usize = 36;

/// Total response frame size: port(2) + mac(32).
pub const RESPONSE_LEN: usize = 34;

/// Challenge sent by a verifier to a candidate peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    /// Sender's process-scoped dedupe ID, so a responder can recognize
    /// its own reflected challenges.
    pub dedupe: [u8; DEDUPE_LEN],
    /// Random nonce the responder must sign.
    pub nonce: [u8; NONCE_LEN],
}

impl Challenge {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHALLENGE_LEN);
        buf.extend_from_slice(&MAGIC_HEADER);
        buf.extend_from_slice(&self.dedupe);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    /// Parse the leading [`CHALLENGE_LEN`] bytes. Returns `None` on short
    /// input or a foreign magic header; both are dropped silently by
    /// callers.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < CHALLENGE_LEN {
            return None;
        }
        if data[0..6] != MAGIC_HEADER {
            return None;
        }
        Some(Self {
            dedupe: data[6..16].try_into().ok()?,
            nonce: data[16..36].try_into().ok()?,
        })
    }
}

/// Signed reply from a responder: the advertised application port and an
/// HMAC-SHA256 tag over the challenge nonce, keyed by the passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub port: u16,
    pub mac: [u8; MAC_LEN],
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESPONSE_LEN);
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf.extend_from_slice(&self.mac);
        buf
    }

    /// Parse an exactly [`RESPONSE_LEN`]-byte frame. Anything shorter or
    /// longer is malformed.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != RESPONSE_LEN {
            return None;
        }
        Some(Self {
            port: u16::from_le_bytes(data[0..2].try_into().ok()?),
            mac: data[2..34].try_into().ok()?,
        })
    }
}
