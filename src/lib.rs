//! # Wherez - Passphrase-Scoped Peer Discovery
//!
//! Wherez lets processes that share a passphrase find each other across
//! the public Mainline BitTorrent DHT. Every holder of the passphrase
//! derives the same 20-byte infohash, announces itself under it, and
//! learns the addresses of siblings announced there.
//!
//! The DHT is public and untrusted, so an address coming out of it is
//! only a *candidate*. Each candidate must answer an HMAC challenge
//! keyed by the passphrase before it is surfaced as a [`Peer`]:
//!
//! ```text
//! passphrase ──► infohash ──► DHT ──► candidates ──► verifier ──► peers
//!                                          ▲
//!                      remote responder ───┘  (challenge/response)
//! ```
//!
//! Example applications: locating internal service peers (DNS, LDAP,
//! coordination services) by function, or letting a lost device phone
//! home to any sibling that shares its secret.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `infohash` | Deterministic DHT key derivation from the passphrase |
//! | `frames` | Fixed-width challenge/response wire frames |
//! | `crypto` | Auth context, nonce generation, HMAC compute/verify |
//! | `verifier` | Client role: challenge one candidate, accept/reject |
//! | `responder` | Server role: answer challenges on TCP and UDP |
//! | `dht` | DHT collaborator trait and the Mainline adapter |
//! | `discoverer` | The pipeline tying everything together |
//!
//! ## Quick Start
//!
//! ```ignore
//! use wherez::{Discoverer, DiscoveryConfig, MainlineClient};
//!
//! let config = DiscoveryConfig::new(40000, b"my-shared-secret".to_vec())
//!     .with_app_port(31337);
//! let dht = MainlineClient::new(40000, 1, true);
//!
//! let discoverer = Discoverer::start(config, dht).await?;
//! let mut peers = discoverer.peers().await.unwrap();
//! while let Some(peer) = peers.recv().await {
//!     println!("sibling at {}", peer);
//! }
//! ```
//!
//! ## Trust Model
//!
//! - Anyone can observe the infohash and the fact that siblings exist;
//!   membership is not confidential.
//! - Only passphrase holders can produce a valid response MAC; peers
//!   are symmetrically trusted and replay among them is not defended.
//! - The responder never explains why it dropped a frame: a prober
//!   gets no oracle.

pub mod crypto;
pub mod dht;
pub mod discoverer;
pub mod frames;
pub mod infohash;
pub mod responder;
pub mod verifier;

pub use crypto::AuthContext;
pub use dht::{Dht, MainlineClient};
pub use discoverer::{
    Discoverer, DiscoveryConfig, Peer, DEFAULT_BOOTSTRAP_NODE, PROBE_INTERVAL,
};
pub use frames::{Challenge, Response};
pub use infohash::{derive_infohash, InfoHash};
pub use responder::Responder;
pub use verifier::{Transport, Verifier, VerifyError, DEFAULT_TIMEOUT};
