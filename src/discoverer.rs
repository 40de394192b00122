//! Discovery pipeline: from a passphrase to a stream of verified peers.
//!
//! A [`Discoverer`] wires the components together. It derives the
//! infohash, starts the responder when this process advertises itself,
//! drives the DHT collaborator, and fans every candidate address out to
//! its own verification task. Only candidates that pass the
//! challenge/response come out the other end, as [`Peer`] values on the
//! stream returned by [`Discoverer::peers`].
//!
//! Peers are emitted in verification-completion order, which is
//! unrelated to the order candidates arrive from the DHT. The same
//! address can be emitted more than once if the DHT keeps returning it;
//! deduplication belongs to the consumer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::crypto::AuthContext;
use crate::dht::Dht;
use crate::infohash::{derive_infohash, InfoHash};
use crate::responder::Responder;
use crate::verifier::Verifier;

/// How often the probe loop re-requests peers for the infohash. The DHT
/// client treats a request as a no-op while it is already satisfied, so
/// this is cheap; it exists to pick up churn.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Default node used to join the DHT network.
pub const DEFAULT_BOOTSTRAP_NODE: &str = "router.bittorrent.com:6881";

const PEERS_CHANNEL_CAPACITY: usize = 32;

/// Configuration for a [`Discoverer`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port used for discovery (the DHT client and the responder share
    /// it). Must be reachable from the network for siblings to find us.
    pub port: u16,
    /// Port of the local application being advertised. `None` means
    /// passive mode: we look for siblings but never announce and never
    /// answer challenges.
    pub app_port: Option<u16>,
    /// The shared secret scoping the discovery group.
    pub passphrase: Vec<u8>,
    /// Hint for how aggressively the DHT should search.
    pub min_peers: usize,
    /// Node used to join the DHT network.
    pub bootstrap: String,
}

impl DiscoveryConfig {
    pub fn new(port: u16, passphrase: impl Into<Vec<u8>>) -> Self {
        Self {
            port,
            app_port: None,
            passphrase: passphrase.into(),
            min_peers: 1,
            bootstrap: DEFAULT_BOOTSTRAP_NODE.to_string(),
        }
    }

    /// Advertise the local application on `app_port` and answer
    /// challenges.
    pub fn with_app_port(mut self, app_port: u16) -> Self {
        self.app_port = Some(app_port);
        self
    }

    pub fn with_min_peers(mut self, min_peers: usize) -> Self {
        self.min_peers = min_peers;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = bootstrap.into();
        self
    }
}

/// A verified sibling: it answered a challenge with a valid MAC, and
/// its application listens on `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Runs the discovery pipeline. Dropping the discoverer does not stop
/// it; the pipeline is built to live for the whole process, with
/// [`shutdown`](Discoverer::shutdown) available for tests and graceful
/// teardown.
pub struct Discoverer {
    infohash: InfoHash,
    responder: Option<Responder>,
    peers_rx: Mutex<Option<mpsc::Receiver<Peer>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Discoverer {
    /// Start discovering siblings, using `dht` as the candidate source.
    ///
    /// Fatal errors are a failed responder bind while advertising and a
    /// broken authentication context; everything after startup recovers
    /// per-candidate.
    pub async fn start<D: Dht>(config: DiscoveryConfig, dht: D) -> Result<Self> {
        let infohash = derive_infohash(&config.passphrase);
        info!(infohash = %hex::encode(infohash), "derived discovery infohash");

        let ctx = Arc::new(
            AuthContext::new(config.passphrase.clone())
                .context("could not initialize authentication context")?,
        );

        let responder = match config.app_port {
            Some(app_port) => {
                let listen = format!("0.0.0.0:{}", config.port);
                let responder = Responder::bind(&listen, app_port, ctx.clone())
                    .await
                    .context("could not start authentication responder")?;
                Some(responder)
            }
            None => None,
        };
        let announce = responder.is_some();

        let dht = Arc::new(dht);
        dht.add_bootstrap_node(&config.bootstrap).await;
        let mut results = dht
            .take_results()
            .await
            .context("DHT result stream was already taken")?;

        let mut tasks = Vec::new();

        // DHT driver.
        let driver = dht.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = driver.run().await {
                warn!(%err, "DHT driver stopped");
            }
        }));

        // Candidate consumer: every address gets its own verification
        // task so a slow or silent candidate never holds up the rest.
        let (peers_tx, peers_rx) = mpsc::channel(PEERS_CHANNEL_CAPACITY);
        let verifier = Verifier::new(ctx);
        tasks.push(tokio::spawn(async move {
            while let Some(batch) = results.recv().await {
                for candidate in batch {
                    let verifier = verifier.clone();
                    let peers_tx = peers_tx.clone();
                    tokio::spawn(async move {
                        match verifier.verify(&candidate).await {
                            Ok(response) => {
                                if let Some(peer) = peer_from(&candidate, response.port) {
                                    info!(%peer, "verified sibling");
                                    let _ = peers_tx.send(peer).await;
                                }
                            }
                            Err(err) => {
                                info!(candidate = %candidate, %err, "discarding candidate");
                            }
                        }
                    });
                }
            }
            // The DHT stream ended. The last peers_tx clones die with
            // the in-flight verifications, closing the output stream.
        }));

        // Probe loop: keep asking for the infohash so churn is noticed.
        let prober = dht.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(PROBE_INTERVAL);
            loop {
                ticker.tick().await;
                prober.request_peers(infohash, announce).await;
            }
        }));

        Ok(Self {
            infohash,
            responder,
            peers_rx: Mutex::new(Some(peers_rx)),
            tasks,
        })
    }

    /// The infohash this discoverer announces and searches under.
    pub fn infohash(&self) -> InfoHash {
        self.infohash
    }

    /// The responder, when this process is advertising.
    pub fn responder(&self) -> Option<&Responder> {
        self.responder.as_ref()
    }

    /// Take the stream of verified peers. Yields `None` after the first
    /// call: there is exactly one consumer.
    pub async fn peers(&self) -> Option<mpsc::Receiver<Peer>> {
        self.peers_rx.lock().await.take()
    }

    /// Tear the pipeline down and close the peer stream.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(responder) = &self.responder {
            responder.shutdown();
        }
    }
}

/// Rebuild a peer from the candidate's host and the application port the
/// response advertised. The candidate resolved during verification, so
/// this only fails on addresses we could never display anyway.
fn peer_from(candidate: &str, app_port: u16) -> Option<Peer> {
    let (host, _) = candidate.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some(Peer { host: host.to_string(), port: app_port })
}
