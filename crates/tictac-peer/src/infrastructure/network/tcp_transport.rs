//! TCP line transport built on tokio.
//!
//! Architecture:
//! - `start_listening` binds synchronously (so a bind failure is returned to
//!   the caller) and spawns an accept loop.  The first inbound connection is
//!   installed; any later one is accepted and dropped at once.
//! - `start_connecting` spawns a connect attempt.
//! - An installed connection gets one reader task (bytes → [`LineFramer`] →
//!   `LineReceived` events) and one writer task draining an unbounded queue
//!   of outbound lines.
//! - Every listen, connect and disconnect bumps a generation counter.  Tasks
//!   tag their events with the generation they were started under, and
//!   events from an older generation are discarded.  A torn-down connection
//!   therefore never leaks late events into the next one.
//! - `disconnect_all` queues [`TransportEvent::Closed`] while still holding
//!   the lock that bumped the generation, which marks the boundary in the
//!   event stream for the session.
//!
//! The writer task is not aborted on teardown: dropping the queue's sender
//! lets it write whatever is still queued (e.g. `ROLE_CONFLICT`) and then
//! shut the stream down.
//!
//! All methods must be called from within a tokio runtime.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tictac_core::protocol::framing::frame_line;
use tictac_core::LineFramer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::application::ports::{LineTransport, TransportError, TransportEvent};

/// Size of the per-read buffer.
const READ_BUF_SIZE: usize = 4096;
/// Pause after a failed `accept()` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    acceptor: Option<JoinHandle<()>>,
    connector: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Inner {
    /// Stops all tasks, drops the outbound queue and starts a new generation.
    fn teardown(&mut self) -> u64 {
        self.generation += 1;
        for handle in [
            self.acceptor.take(),
            self.connector.take(),
            self.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        self.outbound = None;
        self.generation
    }
}

/// State shared between the transport handle and its tasks.
struct Shared {
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_event(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Sends `event` only if `generation` is still current.
    fn emit_if_current(&self, generation: u64, event: TransportEvent) -> bool {
        let inner = self.lock();
        inner.generation == generation && self.send_event(event)
    }

    /// Installs `stream` as the active connection.
    ///
    /// Returns `false` (and drops the stream, closing it) if the generation is
    /// stale or a connection is already active.
    fn install(self: &Arc<Self>, generation: u64, stream: TcpStream, peer: SocketAddr) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.outbound.is_some() {
            return false;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle's algorithm");
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, rx));
        inner.reader = Some(tokio::spawn(read_loop(
            Arc::clone(self),
            read_half,
            generation,
        )));
        inner.outbound = Some(tx);

        info!(%peer, "peer connected");
        // Sent while still holding the lock, so it precedes any line the
        // reader produces.
        self.send_event(TransportEvent::Connected { peer });
        true
    }

    /// Tears down after the connection or the connect attempt ended on its own.
    fn connection_lost(&self, generation: u64, error: Option<String>) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        // The caller is the reader or connector task itself; detach rather
        // than abort it.
        inner.reader = None;
        inner.connector = None;
        inner.teardown();
        if let Some(message) = error {
            self.send_event(TransportEvent::Error(message));
        }
        self.send_event(TransportEvent::Disconnected);
    }
}

/// Production [`LineTransport`] over a single TCP stream.
pub struct TcpTransport {
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Creates an idle transport and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            events: tx,
        });
        (Self { shared }, rx)
    }

    fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
        let bind_failed = |source| TransportError::BindFailed { addr, source };
        let listener = std::net::TcpListener::bind(addr).map_err(bind_failed)?;
        listener.set_nonblocking(true).map_err(bind_failed)?;
        TcpListener::from_std(listener).map_err(bind_failed)
    }
}

impl LineTransport for TcpTransport {
    fn start_listening(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let listener = Self::bind(addr)?;
        let port = listener.local_addr().map_or(addr.port(), |a| a.port());

        let mut inner = self.shared.lock();
        let generation = inner.teardown();
        info!(%addr, port, "listening");
        self.shared.send_event(TransportEvent::Listening { port });
        inner.acceptor = Some(tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            generation,
        )));
        Ok(())
    }

    fn start_connecting(&self, addr: SocketAddr) {
        let mut inner = self.shared.lock();
        let generation = inner.teardown();
        let shared = Arc::clone(&self.shared);
        inner.connector = Some(tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if !shared.install(generation, stream, addr) {
                        debug!(%addr, "discarding stale outbound connection");
                    }
                }
                Err(source) => {
                    let err = TransportError::ConnectFailed { addr, source };
                    warn!("{err}");
                    shared.connection_lost(generation, Some(err.to_string()));
                }
            }
        }));
    }

    fn send_line(&self, line: &str) {
        let inner = self.shared.lock();
        match &inner.outbound {
            Some(tx) => {
                if tx.send(line.to_string()).is_err() {
                    debug!(line, "writer task gone; dropping line");
                }
            }
            None => trace!(line, "not connected; dropping line"),
        }
    }

    fn disconnect_all(&self) {
        let mut inner = self.shared.lock();
        inner.teardown();
        debug!("transport torn down");
        self.shared.send_event(TransportEvent::Closed);
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().outbound.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.lock().teardown();
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, generation: u64) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if !shared.install(generation, stream, peer) {
                    info!(%peer, "rejecting extra inbound connection");
                }
            }
            Err(e) => {
                warn!(error = %e, "accept error");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, generation: u64) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("peer closed the connection");
                break None;
            }
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    trace!(%line, "line received");
                    if !shared.emit_if_current(generation, TransportEvent::LineReceived(line)) {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "read error on peer connection");
                break Some(TransportError::Io(e).to_string());
            }
        }
    };
    shared.connection_lost(generation, error);
}

async fn write_loop(mut writer: OwnedWriteHalf, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_all(&frame_line(&line)).await {
            warn!(error = %e, "write error on peer connection");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        trace!(error = %e, "shutdown after final write failed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
