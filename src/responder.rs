//! Server role of the challenge/response protocol.
//!
//! A [`Responder`] listens on one port over both TCP and UDP and answers
//! every well-formed challenge with a signed response carrying the
//! advertised application port. It runs only when the process is
//! advertising itself.
//!
//! Request handling is deliberately mute: frames that are short, carry a
//! foreign magic header, or echo our own dedupe ID are dropped without
//! any reply. Most inbound traffic is unrelated DHT clients probing a
//! freshly announced infohash, and an attacker probing the port must not
//! get an oracle out of us.
//!
//! The UDP receive path reuses a fixed pool of buffers so a datagram
//! flood cannot grow memory; when the pool runs dry, datagrams are
//! drained and dropped until a handler returns its buffer.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::crypto::{compute_mac, AuthContext};
use crate::frames::{Challenge, Response, CHALLENGE_LEN};

/// Number of reusable UDP receive buffers.
pub const UDP_POOL_BUFFERS: usize = 100;

/// Size of each UDP receive buffer. Datagrams up to this size are
/// accepted; only the leading challenge bytes are parsed.
pub const UDP_BUF_LEN: usize = 4096;

/// Listens for challenges on TCP and UDP and emits signed responses.
///
/// Binding happens in [`Responder::bind`]; a bind failure is fatal to the
/// caller and a successfully bound responder serves until the process
/// exits (or [`shutdown`](Responder::shutdown) in tests). There is no
/// second-start path.
pub struct Responder {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    tcp_task: JoinHandle<()>,
    udp_task: JoinHandle<()>,
}

impl Responder {
    /// Bind `addr` for both TCP and UDP and start serving.
    ///
    /// `app_port` is the port of the local application being advertised;
    /// it is copied verbatim into every response.
    pub async fn bind(addr: &str, app_port: u16, ctx: Arc<AuthContext>) -> Result<Self> {
        let tcp = TcpListener::bind(addr)
            .await
            .with_context(|| format!("could not listen on TCP {}", addr))?;
        let udp = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("could not listen on UDP {}", addr))?;

        let tcp_addr = tcp.local_addr()?;
        let udp_addr = udp.local_addr()?;
        info!(%tcp_addr, %udp_addr, app_port, "authentication responder listening");

        let tcp_task = tokio::spawn(serve_tcp(tcp, app_port, ctx.clone()));
        let udp_task = tokio::spawn(serve_udp(Arc::new(udp), app_port, ctx));

        Ok(Self { tcp_addr, udp_addr, tcp_task, udp_task })
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Stop both listeners. Normal operation never calls this; the
    /// responder lives as long as the process.
    pub fn shutdown(&self) {
        self.tcp_task.abort();
        self.udp_task.abort();
    }
}

async fn serve_tcp(listener: TcpListener, app_port: u16, ctx: Arc<AuthContext>) {
    loop {
        let (stream, from) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                debug!(%err, "TCP accept failed, stopping listener");
                return;
            }
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_tcp_conn(stream, app_port, &ctx).await {
                trace!(%from, %err, "dropped TCP exchange");
            }
        });
    }
}

/// One frame in, at most one frame out; the connection closes when this
/// returns.
async fn handle_tcp_conn(
    mut stream: TcpStream,
    app_port: u16,
    ctx: &AuthContext,
) -> std::io::Result<()> {
    let mut frame = [0u8; CHALLENGE_LEN];
    stream.read_exact(&mut frame).await?;
    if let Some(response) = answer_challenge(ctx, app_port, &frame) {
        stream.write_all(&response).await?;
    }
    Ok(())
}

async fn serve_udp(socket: Arc<UdpSocket>, app_port: u16, ctx: Arc<AuthContext>) {
    let pool = BufferPool::new(UDP_POOL_BUFFERS, UDP_BUF_LEN);
    let mut scratch = vec![0u8; UDP_BUF_LEN];
    loop {
        match pool.acquire() {
            Some(mut buf) => {
                let (n, from) = match socket.recv_from(buf.as_mut()).await {
                    Ok(received) => received,
                    Err(err) => {
                        debug!(%err, "UDP receive failed, stopping listener");
                        return;
                    }
                };
                let socket = socket.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Some(response) = answer_challenge(&ctx, app_port, &buf.as_ref()[..n]) {
                        // Datagram sends are atomic; concurrent handlers
                        // may write to the shared socket without locking.
                        let _ = socket.send_to(&response, from).await;
                    }
                    // `buf` returns to the pool when the guard drops.
                });
            }
            None => {
                trace!("UDP buffer pool exhausted, dropping datagram");
                if socket.recv_from(&mut scratch).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Decide whether a challenge frame deserves a response, and build it.
///
/// Returns `None` for every frame that must be dropped: short or
/// oversize-beyond-parse input, a foreign magic header, or our own
/// dedupe ID reflected back at us (unless self-connection is allowed).
fn answer_challenge(ctx: &AuthContext, app_port: u16, frame: &[u8]) -> Option<Vec<u8>> {
    let challenge = Challenge::from_bytes(frame)?;

    if !ctx.self_connection_allowed() && challenge.dedupe == ctx.dedupe() {
        trace!("challenge carries our own dedupe ID, dropping");
        return None;
    }

    let response = Response {
        port: app_port,
        mac: compute_mac(ctx.passphrase(), &challenge.nonce),
    };
    Some(response.to_bytes())
}

/// Fixed-capacity pool of reusable receive buffers.
///
/// `acquire` either hands out a buffer or reports exhaustion; it never
/// allocates past the configured capacity and never blocks. Buffers come
/// back via the [`PooledBuf`] guard, exactly once per acquire on every
/// exit path.
struct BufferPool {
    free: Arc<StdMutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    fn new(count: usize, buf_len: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; buf_len]).collect();
        Self { free: Arc::new(StdMutex::new(free)) }
    }

    fn acquire(&self) -> Option<PooledBuf> {
        let buf = self.free.lock().ok()?.pop()?;
        Some(PooledBuf { buf, free: Arc::clone(&self.free) })
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

struct PooledBuf {
    buf: Vec<u8>,
    free: Arc<StdMutex<Vec<Vec<u8>>>>,
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        if let Ok(mut free) = self.free.lock() {
            free.push(buf);
        }
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsMut<[u8]> for PooledBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}
