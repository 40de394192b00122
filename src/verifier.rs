//! Client role of the challenge/response protocol.
//!
//! A [`Verifier`] takes one candidate `host:port` address from the DHT
//! and decides whether a sibling is really there: it sends a fresh
//! challenge, waits up to the configured deadline for the signed
//! response, and checks the MAC. Exactly one datagram goes out and at
//! most one comes back; there is no retransmission. Candidates are
//! independent, so the pipeline runs one verification task per candidate
//! concurrently.
//!
//! UDP is the primary transport. [`Transport::Tcp`] speaks the identical
//! frame bytes over a short-lived connection for interop with older
//! responders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::crypto::{fresh_nonce, verify_mac, AuthContext, RngError};
use crate::frames::{Challenge, Response, RESPONSE_LEN};

/// Default receive deadline for one verification round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

/// Transport used for a verification exchange. The frame bytes are
/// identical on both; UDP is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Why a candidate was rejected. Per-candidate failures are recoverable:
/// the pipeline logs them and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Address does not parse or does not resolve.
    InvalidAddr,
    /// Socket setup failure.
    CouldNotConnect,
    /// Write failure on the challenge.
    CouldNotSend,
    /// No reply before the deadline, or the read failed.
    DidNotRespond,
    /// Reply was the wrong size or otherwise malformed.
    IsNotPeer,
    /// Reply parsed but the MAC does not match.
    DidNotVerify,
    /// Could not generate the challenge nonce.
    Rng(RngError),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::InvalidAddr => write!(f, "invalid address or resolution error"),
            VerifyError::CouldNotConnect => write!(f, "could not connect"),
            VerifyError::CouldNotSend => write!(f, "could not send to remote peer"),
            VerifyError::DidNotRespond => write!(f, "remote peer did not respond"),
            VerifyError::IsNotPeer => write!(f, "could not understand remote peer response"),
            VerifyError::DidNotVerify => write!(f, "did not pass the challenge/response"),
            VerifyError::Rng(err) => write!(f, "could not generate challenge: {}", err),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Conducts challenge/response exchanges against candidate peers.
#[derive(Clone)]
pub struct Verifier {
    ctx: Arc<AuthContext>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(ctx: Arc<AuthContext>) -> Self {
        Self { ctx, timeout: DEFAULT_TIMEOUT }
    }

    /// Override the receive deadline. Tests tighten this; production
    /// keeps [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verify a candidate over UDP, the primary transport.
    ///
    /// On success the returned [`Response`] carries the application port
    /// the sibling is advertising.
    pub async fn verify(&self, address: &str) -> Result<Response, VerifyError> {
        self.verify_with(Transport::Udp, address).await
    }

    /// Verify a candidate over TCP. Same frames, kept for interop with
    /// responders that predate the UDP path.
    pub async fn verify_tcp(&self, address: &str) -> Result<Response, VerifyError> {
        self.verify_with(Transport::Tcp, address).await
    }

    pub async fn verify_with(
        &self,
        transport: Transport,
        address: &str,
    ) -> Result<Response, VerifyError> {
        debug!(address, ?transport, "verifying candidate");

        let challenge = self.fresh_challenge()?;
        let target = resolve(address).await?;

        let reply = match transport {
            Transport::Udp => self.exchange_udp(target, &challenge.to_bytes()).await?,
            Transport::Tcp => self.exchange_tcp(target, &challenge.to_bytes()).await?,
        };

        let response = Response::from_bytes(&reply).ok_or(VerifyError::IsNotPeer)?;
        if !verify_mac(self.ctx.passphrase(), &challenge.nonce, &response.mac) {
            return Err(VerifyError::DidNotVerify);
        }

        debug!(address, app_port = response.port, "candidate verified");
        Ok(response)
    }

    fn fresh_challenge(&self) -> Result<Challenge, VerifyError> {
        let nonce = fresh_nonce().map_err(VerifyError::Rng)?;
        Ok(Challenge { dedupe: self.ctx.dedupe(), nonce })
    }

    async fn exchange_udp(
        &self,
        target: SocketAddr,
        frame: &[u8],
    ) -> Result<Vec<u8>, VerifyError> {
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|_| VerifyError::CouldNotConnect)?;
        socket
            .connect(target)
            .await
            .map_err(|_| VerifyError::CouldNotConnect)?;

        socket.send(frame).await.map_err(|_| VerifyError::CouldNotSend)?;

        // A response is exactly 34 bytes; anything that does not fit is
        // not a response. Truncation by the small buffer shows up as a
        // wrong-size reply below.
        let mut buf = [0u8; 2 * RESPONSE_LEN];
        let n = match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => return Err(VerifyError::DidNotRespond),
        };
        Ok(buf[..n].to_vec())
    }

    async fn exchange_tcp(
        &self,
        target: SocketAddr,
        frame: &[u8],
    ) -> Result<Vec<u8>, VerifyError> {
        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|_| VerifyError::CouldNotConnect)?;
        stream
            .write_all(frame)
            .await
            .map_err(|_| VerifyError::CouldNotSend)?;

        let mut buf = [0u8; RESPONSE_LEN];
        match timeout(self.timeout, stream.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf.to_vec()),
            Ok(Err(_)) | Err(_) => Err(VerifyError::DidNotRespond),
        }
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, VerifyError> {
    lookup_host(address)
        .await
        .map_err(|_| VerifyError::InvalidAddr)?
        .next()
        .ok_or(VerifyError::InvalidAddr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::compute_mac;

    fn test_verifier(passphrase: &[u8]) -> Verifier {
        let ctx = Arc::new(AuthContext::new(passphrase.to_vec()).unwrap());
        Verifier::new(ctx).with_timeout(Duration::from_millis(200))
    }

    /// One-shot UDP responder driven by the real crypto, answering with a
    /// caller-supplied passphrase and port.
    async fn one_shot_udp_responder(passphrase: Vec<u8>, port: u16) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            let challenge = Challenge::from_bytes(&buf[..n]).unwrap();
            let response = Response {
                port,
                mac: compute_mac(&passphrase, &challenge.nonce),
            };
            socket.send_to(&response.to_bytes(), from).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn unresolvable_address_is_invalid_addr() {
        let verifier = test_verifier(b"p");
        let err = verifier.verify("definitely-not-a-host:port").await.unwrap_err();
        assert_eq!(err, VerifyError::InvalidAddr);
    }

    #[tokio::test]
    async fn silent_peer_is_did_not_respond() {
        // Bound but never reads: the deadline has to fire.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let verifier = test_verifier(b"p");
        let err = verifier.verify(&addr.to_string()).await.unwrap_err();
        assert_eq!(err, VerifyError::DidNotRespond);
    }

    #[tokio::test]
    async fn garbage_reply_is_not_peer() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, from) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(b"nonsense", from).await.unwrap();
        });

        let verifier = test_verifier(b"p");
        let err = verifier.verify(&addr.to_string()).await.unwrap_err();
        assert_eq!(err, VerifyError::IsNotPeer);
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_verification() {
        let addr = one_shot_udp_responder(b"other-passphrase".to_vec(), 1234).await;

        let verifier = test_verifier(b"my-passphrase");
        let err = verifier.verify(&addr.to_string()).await.unwrap_err();
        assert_eq!(err, VerifyError::DidNotVerify);
    }

    #[tokio::test]
    async fn honest_udp_responder_is_accepted() {
        let addr = one_shot_udp_responder(b"shared".to_vec(), 31337).await;

        let verifier = test_verifier(b"shared");
        let response = verifier.verify(&addr.to_string()).await.unwrap();
        assert_eq!(response.port, 31337);
    }

    #[tokio::test]
    async fn honest_tcp_responder_is_accepted() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; crate::frames::CHALLENGE_LEN];
            stream.read_exact(&mut buf).await.unwrap();
            let challenge = Challenge::from_bytes(&buf).unwrap();
            let response = Response {
                port: 8080,
                mac: compute_mac(b"shared", &challenge.nonce),
            };
            stream.write_all(&response.to_bytes()).await.unwrap();
        });

        let verifier = test_verifier(b"shared");
        let response = verifier.verify_tcp(&addr.to_string()).await.unwrap();
        assert_eq!(response.port, 8080);
    }

    #[tokio::test]
    async fn refused_tcp_connection_is_could_not_connect() {
        // Bind then drop, so the port is very likely unbound.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let verifier = test_verifier(b"p");
        let err = verifier.verify_tcp(&addr.to_string()).await.unwrap_err();
        assert_eq!(err, VerifyError::CouldNotConnect);
    }
}
