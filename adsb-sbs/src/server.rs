//! SBS server: publishes BaseStation lines to connected TCP clients.
//!
//! A one-way publisher. Every accepted peer is registered by socket
//! address and gets its own writer task; anything a peer sends is logged
//! and discarded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SbsError};

pub const DEFAULT_BACKLOG: u32 = 100;

struct Peer {
    /// Distinguishes reconnects that reuse an address.
    id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    cancel_token: CancellationToken,
}

type PeerMap = Arc<Mutex<HashMap<SocketAddr, Peer>>>;

fn lock(peers: &PeerMap) -> MutexGuard<'_, HashMap<SocketAddr, Peer>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Server {
    host: String,
    requested_port: u16,
    backlog: u32,
    port: Option<u16>,
    peers: PeerMap,
    unexpected_data: Arc<AtomicU64>,
    cancel_token: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// A stopped server. `port` 0 asks the OS for an ephemeral port.
    pub fn new(host: &str, port: u16, backlog: u32) -> Self {
        Server {
            host: host.to_string(),
            requested_port: port,
            backlog,
            port: None,
            peers: Arc::new(Mutex::new(HashMap::new())),
            unexpected_data: Arc::new(AtomicU64::new(0)),
            cancel_token: CancellationToken::new(),
            accept_task: None,
        }
    }

    /// Bind, listen and start accepting peers.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(SbsError::AlreadyRunning("Server"));
        }
        let addr = lookup_host((self.host.as_str(), self.requested_port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no IPv4 address for {}", self.host),
                )
            })?;

        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.backlog)?;

        // the bound port differs from the requested one when it was 0
        let local = listener.local_addr()?;
        self.port = Some(local.port());
        info!("SBS server listening on {local}");

        self.cancel_token = CancellationToken::new();
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.peers.clone(),
            self.unexpected_data.clone(),
            self.cancel_token.clone(),
        )));
        Ok(())
    }

    /// Close every peer and the listener.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("Accept task ended abnormally: {e}");
            }
        }
        lock(&self.peers).clear();
    }

    /// Port in use once started.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        let mut peers: Vec<_> = lock(&self.peers).keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    /// Close the connection to one peer. Returns false if it is unknown.
    pub fn disconnect_peer(&self, addr: SocketAddr) -> bool {
        match lock(&self.peers).remove(&addr) {
            Some(peer) => {
                peer.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of times a peer sent data to this publish-only server.
    pub fn unexpected_data_count(&self) -> u64 {
        self.unexpected_data.load(Ordering::Relaxed)
    }

    /// Send `msg` to one peer, or to all peers when `peer` is `None`.
    ///
    /// The bytes are written as given; include the `\r\n` delimiter.
    pub fn send_message(&self, msg: &[u8], peer: Option<SocketAddr>) -> Result<()> {
        let peers = lock(&self.peers);
        if peers.is_empty() {
            return Err(SbsError::NoPeers);
        }

        match peer {
            Some(addr) => {
                let target = peers.get(&addr).ok_or(SbsError::UnknownPeer(addr))?;
                if target.tx.send(msg.to_vec()).is_err() {
                    debug!("Peer {addr} went away before send");
                }
            }
            None => {
                for (addr, target) in peers.iter() {
                    if target.tx.send(msg.to_vec()).is_err() {
                        debug!("Peer {addr} went away before send");
                    }
                }
            }
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: PeerMap,
    unexpected_data: Arc<AtomicU64>,
    cancel_token: CancellationToken,
) {
    let mut next_id = 0u64;
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("SBS server stopped accepting");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Peer connected: {addr}");
                    let (tx, rx) = mpsc::unbounded_channel();
                    let peer_token = cancel_token.child_token();
                    next_id += 1;
                    lock(&peers).insert(
                        addr,
                        Peer {
                            id: next_id,
                            tx,
                            cancel_token: peer_token.clone(),
                        },
                    );
                    tokio::spawn(peer_task(
                        stream,
                        addr,
                        next_id,
                        rx,
                        peer_token,
                        peers.clone(),
                        unexpected_data.clone(),
                    ));
                }
                Err(e) => error!("Accept failed: {e}"),
            }
        }
    }
}

async fn peer_task(
    stream: TcpStream,
    addr: SocketAddr,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel_token: CancellationToken,
    peers: PeerMap,
    unexpected_data: Arc<AtomicU64>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            outgoing = rx.recv() => match outgoing {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!("Write to {addr} failed: {e}");
                        break;
                    }
                }
                None => break,
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    unexpected_data.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Received unexpected data from client {addr}: {}",
                        String::from_utf8_lossy(&buf[..n])
                    );
                }
                Err(e) => {
                    debug!("Read from {addr} failed: {e}");
                    break;
                }
            },
        }
    }

    // only deregister this connection, not a newer one reusing the address
    let mut peers = lock(&peers);
    if peers.get(&addr).is_some_and(|peer| peer.id == id) {
        peers.remove(&addr);
    }
    debug!("Peer disconnected: {addr}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
