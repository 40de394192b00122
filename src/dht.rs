//! DHT collaborator boundary.
//!
//! The discovery pipeline does not implement a DHT; it consumes one
//! through the [`Dht`] trait and only ever sees batches of unverified
//! `host:port` candidate strings. Keeping the collaborator behind a trait
//! lets the pipeline and its tests run against an in-process stub while
//! production binds to the Mainline BitTorrent network through
//! [`MainlineClient`], an adapter over the `btdht` crate.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use btdht::MainlineDht;
use futures_util::StreamExt;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::infohash::InfoHash;

/// Capacity of the candidate-batch channel between the DHT driver and
/// the pipeline's consumer task.
const RESULTS_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the peer-request command channel. The probe loop fires
/// every few seconds; a full channel just means a request is already
/// pending, so overflow is silently dropped.
const SEARCH_CHANNEL_CAPACITY: usize = 8;

/// A DHT client as the discovery pipeline sees it: something that can be
/// seeded with a bootstrap node, driven, asked for peers under an
/// infohash, and drained of candidate addresses.
///
/// Everything a `Dht` yields is untrusted; candidates go through the
/// verifier before anyone calls them a peer.
#[async_trait]
pub trait Dht: Send + Sync + 'static {
    /// Seed the routing table with a known node, `host:port`. Called
    /// before [`run`](Dht::run).
    async fn add_bootstrap_node(&self, addr: &str);

    /// Drive the DHT until shutdown. Long-running; the pipeline spawns
    /// this onto its own task.
    async fn run(&self) -> Result<()>;

    /// Ask the DHT for peers announced under `infohash`, announcing
    /// ourselves alongside when `announce` is set. Safe to call
    /// repeatedly; an already-busy client treats this as a no-op.
    async fn request_peers(&self, infohash: InfoHash, announce: bool);

    /// Take the stream of candidate batches, each entry a `host:port`
    /// string. Yields `None` after the first call: there is exactly one
    /// consumer.
    async fn take_results(&self) -> Option<mpsc::Receiver<Vec<String>>>;
}

/// Production [`Dht`] over the Mainline BitTorrent network, backed by
/// the `btdht` crate.
pub struct MainlineClient {
    port: u16,
    min_peers: usize,
    announce: bool,
    bootstrap: StdMutex<Vec<String>>,
    results_tx: mpsc::Sender<Vec<String>>,
    results_rx: Mutex<Option<mpsc::Receiver<Vec<String>>>>,
    search_tx: mpsc::Sender<(InfoHash, bool)>,
    search_rx: Mutex<Option<mpsc::Receiver<(InfoHash, bool)>>>,
    search_in_flight: Arc<AtomicBool>,
}

impl MainlineClient {
    /// Set up a client that will listen on `port`. `min_peers` is the
    /// caller's hint for how aggressively to keep searching; `announce`
    /// decides whether we advertise ourselves under requested infohashes.
    pub fn new(port: u16, min_peers: usize, announce: bool) -> Self {
        let (results_tx, results_rx) = mpsc::channel(RESULTS_CHANNEL_CAPACITY);
        let (search_tx, search_rx) = mpsc::channel(SEARCH_CHANNEL_CAPACITY);
        Self {
            port,
            min_peers,
            announce,
            bootstrap: StdMutex::new(Vec::new()),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
            search_tx,
            search_rx: Mutex::new(Some(search_rx)),
            search_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Dht for MainlineClient {
    async fn add_bootstrap_node(&self, addr: &str) {
        if let Ok(mut bootstrap) = self.bootstrap.lock() {
            bootstrap.push(addr.to_string());
        }
    }

    async fn run(&self) -> Result<()> {
        let mut search_rx = self
            .search_rx
            .lock()
            .await
            .take()
            .context("DHT driver is already running")?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("could not bind DHT socket on {}", bind_addr))?;

        let routers = self
            .bootstrap
            .lock()
            .map(|bootstrap| bootstrap.clone())
            .unwrap_or_default();

        let dht = MainlineDht::builder()
            .add_routers(routers)
            .set_read_only(!self.announce)
            .start(socket)
            .context("could not start Mainline DHT node")?;

        info!(port = self.port, min_peers = self.min_peers, "connecting to the DHT network");
        if !dht.bootstrapped().await {
            warn!("DHT bootstrap incomplete, continuing with available contacts");
        }

        while let Some((infohash, announce)) = search_rx.recv().await {
            // One lookup at a time. The probe loop re-requests on a
            // timer, so a request arriving mid-search is redundant.
            if self.search_in_flight.swap(true, Ordering::SeqCst) {
                continue;
            }
            debug!(infohash = %hex::encode(infohash), announce, "starting DHT lookup");

            let mut peers = dht.search(btdht::InfoHash::from(infohash), announce);
            let results_tx = self.results_tx.clone();
            let in_flight = self.search_in_flight.clone();
            tokio::spawn(async move {
                while let Some(addr) = peers.next().await {
                    if results_tx.send(vec![addr.to_string()]).await.is_err() {
                        break;
                    }
                }
                in_flight.store(false, Ordering::SeqCst);
            });
        }

        Ok(())
    }

    async fn request_peers(&self, infohash: InfoHash, announce: bool) {
        // A full channel means a request is already queued; dropping
        // this one keeps the probe loop a cheap no-op.
        let _ = self.search_tx.try_send((infohash, announce));
    }

    async fn take_results(&self) -> Option<mpsc::Receiver<Vec<String>>> {
        self.results_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn results_can_only_be_taken_once() {
        let client = MainlineClient::new(0, 1, false);
        assert!(client.take_results().await.is_some());
        assert!(client.take_results().await.is_none());
    }

    #[tokio::test]
    async fn request_peers_never_blocks() {
        let client = MainlineClient::new(0, 1, false);
        // Far more requests than the command channel holds; extras must
        // be dropped, not awaited.
        for _ in 0..100 {
            client.request_peers([7u8; 20], true).await;
        }
    }
}
