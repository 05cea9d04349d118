//! Runtime actor: the single task that owns a [`Session`].
//!
//! # Why an actor? (for beginners)
//!
//! The session is a plain `&mut self` state machine.  Instead of sharing it
//! behind a lock, one tokio task owns it and `select!`s over three channels:
//!
//! ```text
//!  TcpTransport ──TransportEvent──┐
//!  TokioStartScheduler ──Fired────┼──▶ PeerRuntime ──▶ Session ──SessionEvent──▶ UI
//!  PeerHandle ──PeerCommand───────┘
//! ```
//!
//! Each input is handled to completion (including its outbound lines) before
//! the next one is taken, and deferred work queued by the session (the
//! role-conflict teardown) is flushed right after.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tictac_core::Role;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::ports::TransportEvent;
use crate::application::session::{Session, SessionConfig, SessionError};
use crate::application::view::{SessionEvent, SessionView};
use crate::infrastructure::coin::RandomCoin;
use crate::infrastructure::network::TcpTransport;
use crate::infrastructure::timer::{StartTimerFired, TokioStartScheduler};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Presentation commands, one per session operation.
#[derive(Debug)]
pub enum PeerCommand {
    SelectRole(Role),
    SetPeerAddress(SocketAddr),
    Connect,
    Disconnect,
    Move { row: usize, col: usize },
    Rematch,
    NewLocalGame,
    /// Replies with a snapshot of the session.
    Snapshot(oneshot::Sender<SessionView>),
    /// Disconnects and stops the actor.
    Shutdown,
}

/// Errors returned by [`PeerHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("peer runtime has stopped")]
    Stopped,
}

/// Cloneable sender side of a running [`PeerRuntime`].
#[derive(Debug, Clone)]
pub struct PeerHandle {
    commands: mpsc::Sender<PeerCommand>,
}

impl PeerHandle {
    /// Queues `command` for the actor.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Stopped`] if the actor has exited.
    pub async fn send(&self, command: PeerCommand) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    /// Fetches a snapshot of the session.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Stopped`] if the actor has exited.
    pub async fn snapshot(&self) -> Result<SessionView, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(PeerCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Asks the actor to disconnect and stop.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Stopped`] if the actor has already exited.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(PeerCommand::Shutdown).await
    }
}

/// Owns a session and feeds it transport, timer and command inputs.
pub struct PeerRuntime {
    session: Session,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    timer_events: mpsc::UnboundedReceiver<StartTimerFired>,
    commands: mpsc::Receiver<PeerCommand>,
}

impl PeerRuntime {
    /// Wraps `session` and returns the actor with a handle to drive it.
    pub fn new(
        session: Session,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        timer_events: mpsc::UnboundedReceiver<StartTimerFired>,
    ) -> (Self, PeerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let runtime = Self {
            session,
            transport_events,
            timer_events,
            commands: rx,
        };
        (runtime, PeerHandle { commands: tx })
    }

    /// Runs until [`PeerCommand::Shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        info!("peer runtime started");
        loop {
            tokio::select! {
                Some(event) = self.transport_events.recv() => {
                    debug!(?event, "transport event");
                    self.session.handle_transport_event(event);
                }
                Some(fired) = self.timer_events.recv() => {
                    self.session.on_start_timer(fired.epoch);
                }
                command = self.commands.recv() => match command {
                    None | Some(PeerCommand::Shutdown) => break,
                    Some(command) => self.apply(command),
                },
                else => break,
            }
            self.session.flush_deferred();
        }
        self.session.disconnect();
        info!("peer runtime stopped");
    }

    fn apply(&mut self, command: PeerCommand) {
        debug!(?command, "command");
        let result = match command {
            PeerCommand::SelectRole(role) => self.session.select_role(role),
            PeerCommand::SetPeerAddress(addr) => self.session.set_peer_address(addr),
            PeerCommand::Connect => self.session.connect(),
            PeerCommand::Disconnect => {
                self.session.disconnect();
                Ok(())
            }
            PeerCommand::Move { row, col } => self.session.request_move(row, col).map(|_| ()),
            PeerCommand::Rematch => self.session.request_rematch(),
            PeerCommand::NewLocalGame => {
                self.session.new_local_game();
                Ok(())
            }
            PeerCommand::Snapshot(reply) => {
                if reply.send(self.session.view()).is_err() {
                    debug!("snapshot requester went away");
                }
                Ok(())
            }
            PeerCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn report(&self, err: &SessionError) {
        warn!(error = %err, "command rejected");
        self.session.report_error(err);
    }
}

/// Builds a TCP-backed session with a tokio timer and a random coin, and
/// spawns its runtime on the current tokio runtime.
pub fn spawn_tcp_peer(
    config: SessionConfig,
) -> (
    PeerHandle,
    mpsc::UnboundedReceiver<SessionEvent>,
    JoinHandle<()>,
) {
    let (transport, transport_events) = TcpTransport::new();
    let (scheduler, timer_events) = TokioStartScheduler::new();
    let (session, session_events) = Session::new(
        config,
        Arc::new(transport),
        Arc::new(scheduler),
        Arc::new(RandomCoin),
    );
    let (runtime, handle) = PeerRuntime::new(session, transport_events, timer_events);
    let task = tokio::spawn(runtime.run());
    (handle, session_events, task)
}
