//! In-memory transport pair.
//!
//! # Why a loopback transport?
//!
//! Real sockets make protocol tests slow and order-sensitive.  A
//! [`LoopbackTransport`] pair delivers each sent line straight into the other
//! endpoint's event queue, so two sessions can be driven step by step from a
//! single test thread without a runtime.
//!
//! The two endpoints are pre-wired: the link comes up as soon as both have
//! asked for it, whether by listening or by connecting.  That lets tests
//! reproduce situations a real deployment only reaches by misconfiguration,
//! such as two peers holding the same role.
//!
//! # Usage in tests
//!
//! ```ignore
//! let ((a, a_events), (b, b_events)) = LoopbackTransport::pair();
//! a.start_listening("0.0.0.0:5050".parse()?)?;
//! b.start_connecting("127.0.0.1:5050".parse()?);
//! // Both queues now hold `Connected`.
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::application::ports::{LineTransport, TransportError, TransportEvent};

/// Base port of the fake endpoint addresses reported in `Connected` events.
const ENDPOINT_BASE_PORT: u16 = 49152;

#[derive(Debug, Default)]
struct LinkState {
    /// Which endpoints have asked for the link.
    requested: [bool; 2],
    connected: bool,
}

/// One endpoint of an in-memory line link.
pub struct LoopbackTransport {
    side: usize,
    link: Arc<Mutex<LinkState>>,
    queues: [mpsc::UnboundedSender<TransportEvent>; 2],
}

impl LoopbackTransport {
    /// Creates two connected endpoints, each with its own event receiver.
    #[allow(clippy::type_complexity)]
    pub fn pair() -> (
        (Self, mpsc::UnboundedReceiver<TransportEvent>),
        (Self, mpsc::UnboundedReceiver<TransportEvent>),
    ) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(LinkState::default()));
        let queues = [tx_a, tx_b];
        let a = Self {
            side: 0,
            link: Arc::clone(&link),
            queues: queues.clone(),
        };
        let b = Self {
            side: 1,
            link,
            queues,
        };
        ((a, rx_a), (b, rx_b))
    }

    /// The fake address of endpoint `side`.
    pub fn endpoint_addr(side: usize) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, ENDPOINT_BASE_PORT + side as u16))
    }

    fn other(&self) -> usize {
        1 - self.side
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, side: usize, event: TransportEvent) {
        if self.queues[side].send(event).is_err() {
            trace!(side, "loopback receiver dropped");
        }
    }

    fn request_link(&self) {
        let mut state = self.state();
        state.requested[self.side] = true;
        if state.requested == [true, true] && !state.connected {
            state.connected = true;
            trace!("loopback link up");
            self.deliver(
                self.side,
                TransportEvent::Connected {
                    peer: Self::endpoint_addr(self.other()),
                },
            );
            self.deliver(
                self.other(),
                TransportEvent::Connected {
                    peer: Self::endpoint_addr(self.side),
                },
            );
        }
    }
}

impl LineTransport for LoopbackTransport {
    fn start_listening(&self, addr: SocketAddr) -> Result<(), TransportError> {
        self.deliver(self.side, TransportEvent::Listening { port: addr.port() });
        self.request_link();
        Ok(())
    }

    fn start_connecting(&self, _addr: SocketAddr) {
        self.request_link();
    }

    fn send_line(&self, line: &str) {
        if self.state().connected {
            self.deliver(self.other(), TransportEvent::LineReceived(line.to_string()));
        } else {
            trace!(line, "loopback not connected; dropping line");
        }
    }

    fn disconnect_all(&self) {
        let mut state = self.state();
        state.requested[self.side] = false;
        if state.connected {
            state.connected = false;
            state.requested[self.other()] = false;
            self.deliver(self.other(), TransportEvent::Disconnected);
        }
        self.deliver(self.side, TransportEvent::Closed);
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }
}
