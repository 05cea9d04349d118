//! Session: the per-peer protocol state machine.
//!
//! One `Session` runs on each peer.  Both peers run identical code and derive
//! the same game state from the same sequence of protocol lines.  The session
//! reacts to three kinds of input, one at a time:
//!
//! - presentation commands (`select_role`, `connect`, `request_move`, …),
//! - [`TransportEvent`]s from the [`LineTransport`],
//! - start-timer firings from the [`StartScheduler`].
//!
//! Every reaction may mutate the board, send lines to the peer, and emit
//! [`SessionEvent`]s for the presentation layer.
//!
//! # Handshake
//!
//! ```text
//!   First (X, listens)                       Second (O, connects)
//!   ── raw connection up ─────────────────────────────────────────
//!   ROLE X  ───────────────────────────────▶
//!           ◀───────────────────────────────  ROLE O
//!   roles differ → arm start delay           roles differ → wait for START
//!   … delay elapses …
//!   START O ───────────────────────────────▶
//!   board reset, O to move                   board reset, O to move
//! ```
//!
//! When both peers announce the same role each side raises a role conflict,
//! the side that noticed first replies `ROLE_CONFLICT`, and both tear the
//! connection down.  The teardown is deferred: it runs from
//! [`Session::flush_deferred`] once the current input has been fully handled.
//!
//! # Rematch
//!
//! Each side sends `REMATCH` at most once per round.  The side that sees both
//! its own and the peer's request clears both flags.  On the first peer that
//! means deciding the next starting mark immediately and sending `START`; the
//! second peer resets its board and waits for that `START`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tictac_core::{
    decode_line, encode_line, BoardError, Mark, PeerMessage, Position, Role, Round, RoundOutcome,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::ports::{
    CoinFlip, ConnectionState, LineTransport, StartScheduler, TransportError, TransportEvent,
};
use super::view::{SessionEvent, SessionPhase, SessionView};

/// Default TCP port shared by both peers.
pub const DEFAULT_PORT: u16 = 5050;
/// Lowest port a user may configure.
pub const MIN_PORT: u16 = 1024;
/// Delay between a verified handshake and the starting-player decision.
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(5);

/// Returns `true` for ports in the user-configurable range `1024..=65535`.
pub fn is_valid_port(port: u16) -> bool {
    port >= MIN_PORT
}

/// Errors returned by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `connect` was called before a role was selected.
    #[error("select a role before connecting")]
    RoleNotSet,

    /// The command is not allowed while a connection is active or pending.
    #[error("already connected or connecting")]
    AlreadyConnected,

    /// The peer holds the turn.
    #[error("it is not your turn")]
    NotYourTurn,

    /// The starting mark for this round has not been decided yet.
    #[error("waiting for the round to start")]
    AwaitingStart,

    /// The board rejected the placement.
    #[error(transparent)]
    Board(#[from] BoardError),

    /// A rematch is only possible once per side after a round has ended.
    #[error("rematch is not available right now")]
    RematchUnavailable,

    /// The port is outside the user-configurable range.
    #[error("port {0} is outside the allowed range 1024-65535")]
    InvalidPort(u16),

    /// The transport failed synchronously (e.g. bind failure).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Addresses and timings used by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Address the second peer connects to; its port is also the listen port.
    pub peer_addr: SocketAddr,
    /// Interface the first peer listens on.
    pub bind_address: IpAddr,
    /// Delay before the first peer decides the starting mark.
    pub start_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            start_delay: DEFAULT_START_DELAY,
        }
    }
}

impl SessionConfig {
    /// The address the first peer binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.peer_addr.port())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StartState {
    decided: bool,
    mark: Option<Mark>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RematchState {
    local: bool,
    remote: bool,
}

/// The protocol state machine of one peer.
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn LineTransport>,
    scheduler: Arc<dyn StartScheduler>,
    coin: Arc<dyn CoinFlip>,
    events: mpsc::UnboundedSender<SessionEvent>,

    role: Option<Role>,
    phase: SessionPhase,
    connection: ConnectionState,
    round: Round,
    whose_turn: Option<Mark>,
    start: StartState,
    rematch: RematchState,
    /// Bumped on every handshake and disconnect; timer firings carrying an
    /// older epoch are ignored.
    start_epoch: u64,
    /// Set by a role conflict; executed by [`Session::flush_deferred`].
    teardown_pending: bool,
    /// `disconnect_all` calls whose `Closed` has not arrived yet.  Until it
    /// does, every transport event belongs to a link this session dropped.
    closes_pending: u32,
    /// Network error reported for the live link, shown once it goes down.
    link_error: Option<String>,
    status: String,
}

impl Session {
    /// Creates a session and returns it together with its event receiver.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn LineTransport>,
        scheduler: Arc<dyn StartScheduler>,
        coin: Arc<dyn CoinFlip>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            transport,
            scheduler,
            coin,
            events: tx,
            role: None,
            phase: SessionPhase::Idle,
            connection: ConnectionState::Disconnected,
            round: Round::new(),
            whose_turn: Some(Mark::X),
            start: StartState::default(),
            rematch: RematchState::default(),
            start_epoch: 0,
            teardown_pending: false,
            closes_pending: 0,
            link_error: None,
            status: String::new(),
        };
        (session, rx)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn whose_turn(&self) -> Option<Mark> {
        self.whose_turn
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// `true` when this peer may place a mark now.
    pub fn is_my_turn(&self) -> bool {
        match (self.connection, self.role) {
            (ConnectionState::Connected { .. }, Some(role)) => {
                self.phase == SessionPhase::Playing && self.whose_turn == Some(role.mark())
            }
            (ConnectionState::Disconnected, _) => {
                self.whose_turn.is_some() && !self.round.is_over()
            }
            _ => false,
        }
    }

    /// Takes a read-only snapshot for the presentation layer.
    pub fn view(&self) -> SessionView {
        SessionView {
            role: self.role,
            phase: self.phase,
            connection: self.connection,
            board: self.round.board().clone(),
            outcome: self.round.outcome(),
            whose_turn: self.whose_turn,
            my_turn: self.is_my_turn(),
            starting_mark: self.start.mark,
            start_decided: self.start.decided,
            rematch_requested_by_local: self.rematch.local,
            rematch_requested_by_remote: self.rematch.remote,
            status: self.status.clone(),
            peer_addr: self.config.peer_addr,
        }
    }

    // ── Presentation commands ─────────────────────────────────────────────────

    /// Selects the role used for the next connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyConnected`] while a connection is active
    /// or pending.
    pub fn select_role(&mut self, role: Role) -> Result<(), SessionError> {
        if self.link_active() {
            return Err(SessionError::AlreadyConnected);
        }
        info!(%role, "role selected");
        self.role = Some(role);
        if self.phase == SessionPhase::Idle {
            self.set_phase(SessionPhase::RoleSelected);
        }
        self.set_status(format!("You are {role}. Connect to start."));
        Ok(())
    }

    /// Changes the peer address (and, through its port, the listen port).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPort`] for ports below 1024 and
    /// [`SessionError::AlreadyConnected`] while a connection is active.
    pub fn set_peer_address(&mut self, addr: SocketAddr) -> Result<(), SessionError> {
        if self.link_active() {
            return Err(SessionError::AlreadyConnected);
        }
        if !is_valid_port(addr.port()) {
            return Err(SessionError::InvalidPort(addr.port()));
        }
        debug!(%addr, "peer address updated");
        self.config.peer_addr = addr;
        Ok(())
    }

    /// Listens (first peer) or connects (second peer).
    ///
    /// # Errors
    ///
    /// - [`SessionError::RoleNotSet`] if no role is selected.
    /// - [`SessionError::AlreadyConnected`] if a connection is active or pending.
    /// - [`SessionError::Transport`] if the listening socket cannot be bound.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let role = self.role.ok_or(SessionError::RoleNotSet)?;
        if self.link_active() {
            return Err(SessionError::AlreadyConnected);
        }
        self.teardown_pending = false;
        self.link_error = None;

        match role {
            Role::First => {
                let addr = self.config.listen_addr();
                if let Err(e) = self.transport.start_listening(addr) {
                    warn!(%addr, error = %e, "failed to start listening");
                    self.set_status(format!("Network Error: {e}"));
                    return Err(e.into());
                }
                info!(%addr, "listening for peer");
                self.set_connection(ConnectionState::Listening { port: addr.port() });
                self.set_status(format!("Listening on port {}", addr.port()));
            }
            Role::Second => {
                let addr = self.config.peer_addr;
                info!(%addr, "connecting to peer");
                self.set_connection(ConnectionState::Connecting);
                self.set_status(format!("Connecting to {addr}..."));
                self.transport.start_connecting(addr);
            }
        }
        self.set_phase(SessionPhase::AwaitingPeer);
        Ok(())
    }

    /// Tears down any connection or acceptor.
    ///
    /// Safe to call at any time.  Transport events queued before the
    /// matching `Closed` acknowledgement are discarded, so a `connect` issued
    /// right after is not disturbed by the old link.
    pub fn disconnect(&mut self) {
        debug!("disconnect requested");
        self.teardown_pending = false;
        self.link_error = None;
        self.closes_pending += 1;
        self.transport.disconnect_all();
        self.drop_connection();
    }

    /// Places this peer's mark at (`row`, `col`).
    ///
    /// Networked, the move is allowed only on this peer's turn and is sent to
    /// the peer before the outcome is acted on.  Without a connection marks
    /// simply alternate.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Board`] for out-of-range or occupied cells, or a
    ///   finished round.
    /// - [`SessionError::NotYourTurn`] when the peer holds the turn.
    /// - [`SessionError::AwaitingStart`] before the starting mark is known.
    pub fn request_move(&mut self, row: usize, col: usize) -> Result<RoundOutcome, SessionError> {
        let pos = Position::new(row, col)?;
        match self.connection {
            ConnectionState::Connected { .. } => self.place_networked(pos),
            ConnectionState::Disconnected => self.place_local(pos),
            ConnectionState::Listening { .. } | ConnectionState::Connecting => {
                Err(SessionError::AwaitingStart)
            }
        }
    }

    /// Requests a new round.
    ///
    /// Without a connection this resets the board at once with a random
    /// starting mark.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RematchUnavailable`] when connected and the
    /// round is still running, or when this side already asked.
    pub fn request_rematch(&mut self) -> Result<(), SessionError> {
        if !self.connection.is_connected() {
            if self.link_active() {
                return Err(SessionError::RematchUnavailable);
            }
            info!("starting a new local round");
            self.reset_round();
            return Ok(());
        }
        if self.phase != SessionPhase::RoundOver || self.rematch.local {
            return Err(SessionError::RematchUnavailable);
        }

        info!("requesting rematch");
        self.rematch.local = true;
        self.send(PeerMessage::Rematch);
        self.emit_rematch();
        if self.rematch.remote {
            self.begin_rematch();
        } else {
            self.set_status("Waiting for opponent...");
        }
        Ok(())
    }

    /// Drops any connection, clears the role and starts a local round.
    pub fn new_local_game(&mut self) {
        if self.link_active() {
            self.disconnect();
        }
        info!("new local game");
        self.role = None;
        self.start = StartState::default();
        self.rematch = RematchState::default();
        self.reset_round();
    }

    /// Emits a presentation-facing error notification.
    pub fn report_error(&self, err: &SessionError) {
        self.emit(SessionEvent::Error(err.to_string()));
    }

    // ── Transport and timer inputs ────────────────────────────────────────────

    /// Reacts to one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.closes_pending > 0 && event != TransportEvent::Closed {
            debug!(?event, "dropping event from a torn-down link");
            return;
        }
        match event {
            TransportEvent::Listening { port } => {
                if !matches!(self.connection, ConnectionState::Listening { .. }) {
                    debug!(port, "ignoring listening event: not listening");
                    return;
                }
                self.set_connection(ConnectionState::Listening { port });
                self.set_status(format!("Listening on port {port}"));
            }
            TransportEvent::Connected { peer } => self.on_connected(peer),
            TransportEvent::LineReceived(line) => self.on_line(&line),
            TransportEvent::Error(message) => {
                warn!(%message, "network error");
                if self.link_active() {
                    // The transport follows up with `Disconnected`.
                    self.link_error = Some(message.clone());
                }
                self.set_status(format!("Network Error: {message}"));
                self.emit(SessionEvent::Error(message));
            }
            TransportEvent::Disconnected => {
                self.drop_connection();
                self.emit(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
            }
            TransportEvent::Closed => {
                self.closes_pending = self.closes_pending.saturating_sub(1);
                if self.closes_pending == 0 && !self.link_active() {
                    self.emit(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
                }
            }
        }
    }

    /// Reacts to the start delay elapsing.
    pub fn on_start_timer(&mut self, epoch: u64) {
        if epoch != self.start_epoch {
            debug!(epoch, current = self.start_epoch, "ignoring stale start timer");
            return;
        }
        if self.phase != SessionPhase::Starting || !self.connection.is_connected() {
            debug!(phase = %self.phase, "ignoring start timer outside the starting phase");
            return;
        }
        self.decide_starting_player();
    }

    /// Runs work deferred while handling the previous input.
    ///
    /// Call after every input; currently this performs the teardown queued by
    /// a role conflict.
    pub fn flush_deferred(&mut self) {
        if self.teardown_pending {
            debug!("running deferred teardown");
            self.disconnect();
        }
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    fn on_connected(&mut self, peer: SocketAddr) {
        if !matches!(
            self.connection,
            ConnectionState::Listening { .. } | ConnectionState::Connecting
        ) {
            debug!(%peer, connection = %self.connection, "ignoring unexpected connected event");
            return;
        }
        let Some(role) = self.role else {
            warn!(%peer, "connected without a role; dropping connection");
            self.teardown_pending = true;
            return;
        };

        info!(%peer, "raw connection established; verifying roles");
        self.set_connection(ConnectionState::Connected { peer });
        self.start = StartState::default();
        self.rematch = RematchState::default();
        self.start_epoch += 1;
        self.set_turn(None);
        self.set_phase(SessionPhase::Verifying);
        self.set_status("Verifying roles...");
        self.send(PeerMessage::Role(role.mark()));
    }

    fn on_peer_role(&mut self, theirs: Mark) {
        let Some(role) = self.role else { return };
        if self.phase != SessionPhase::Verifying {
            debug!(%theirs, phase = %self.phase, "ignoring ROLE outside verification");
            return;
        }
        if theirs == role.mark() {
            self.send(PeerMessage::RoleConflict);
            self.raise_role_conflict();
        } else {
            self.on_roles_verified(role);
        }
    }

    fn raise_role_conflict(&mut self) {
        let Some(role) = self.role else { return };
        let mark = role.mark();
        warn!(%mark, "role conflict: both peers selected the same role");
        self.teardown_pending = true;
        self.emit(SessionEvent::RoleConflict { mark });
        self.set_status(format!("Role conflict: both players selected {mark}"));
    }

    fn on_roles_verified(&mut self, role: Role) {
        info!("roles verified");
        self.set_phase(SessionPhase::Starting);
        self.set_status(format!(
            "Connection established! Game starts in {} seconds...",
            self.config.start_delay.as_secs()
        ));
        if role.decides_start() {
            self.start_epoch += 1;
            debug!(epoch = self.start_epoch, delay = ?self.config.start_delay, "arming start timer");
            self.scheduler
                .schedule_start(self.start_epoch, self.config.start_delay);
        }
    }

    // ── Starting player ───────────────────────────────────────────────────────

    fn decide_starting_player(&mut self) {
        let Some(role) = self.role else { return };
        if !role.decides_start() {
            warn!("only the first peer decides the starting mark");
            return;
        }
        if self.start.decided {
            debug!("starting mark already decided for this round");
            return;
        }
        let mark = self.coin.starting_mark();
        info!(%mark, "starting mark decided");
        self.start = StartState {
            decided: true,
            mark: Some(mark),
        };
        self.send(PeerMessage::Start(mark));
        self.reset_round();
    }

    fn on_start(&mut self, mark: Mark) {
        let Some(role) = self.role else { return };
        if role.decides_start() {
            warn!(%mark, "ignoring START: this peer decides the starting mark");
            return;
        }
        if self.start.decided || self.phase != SessionPhase::Starting {
            warn!(%mark, phase = %self.phase, "ignoring unexpected START");
            return;
        }
        info!(%mark, "starting mark received");
        self.start = StartState {
            decided: true,
            mark: Some(mark),
        };
        self.reset_round();
    }

    /// Clears the board and hands the turn to the starting mark.
    ///
    /// Networked rounds wait for the starting-mark decision; local rounds draw
    /// a fresh random start.
    fn reset_round(&mut self) {
        self.round.reset();
        self.emit(SessionEvent::BoardReset);

        let starting = if self.connection.is_connected() {
            self.start.mark.filter(|_| self.start.decided)
        } else {
            Some(self.coin.starting_mark())
        };

        self.set_turn(starting);
        match starting {
            Some(mark) => {
                self.set_phase(SessionPhase::Playing);
                self.set_status(format!("Turn: {mark}"));
            }
            None => {
                self.set_phase(SessionPhase::Starting);
                self.set_status("Starting new round...");
            }
        }
    }

    // ── Moves ─────────────────────────────────────────────────────────────────

    fn place_networked(&mut self, pos: Position) -> Result<RoundOutcome, SessionError> {
        let role = self.role.ok_or(SessionError::RoleNotSet)?;
        match self.phase {
            SessionPhase::Playing => {}
            SessionPhase::RoundOver => return Err(BoardError::RoundOver.into()),
            _ => return Err(SessionError::AwaitingStart),
        }
        let mine = role.mark();
        if self.whose_turn != Some(mine) {
            return Err(SessionError::NotYourTurn);
        }

        let outcome = self.round.place(pos, mine)?;
        debug!(%pos, mark = %mine, "local move");
        self.emit(SessionEvent::CellChanged {
            position: pos,
            mark: mine,
        });
        self.send(PeerMessage::Move(pos));

        if outcome.is_terminal() {
            if outcome.winner().is_some() {
                self.send(PeerMessage::Win);
            }
            self.finish_round(outcome);
        } else {
            self.pass_turn_to(mine.opponent());
        }
        Ok(outcome)
    }

    fn place_local(&mut self, pos: Position) -> Result<RoundOutcome, SessionError> {
        if self.round.is_over() {
            return Err(BoardError::RoundOver.into());
        }
        let mark = self.whose_turn.ok_or(SessionError::AwaitingStart)?;

        let outcome = self.round.place(pos, mark)?;
        debug!(%pos, %mark, "local-play move");
        self.emit(SessionEvent::CellChanged {
            position: pos,
            mark,
        });

        if outcome.is_terminal() {
            self.finish_round(outcome);
        } else {
            self.set_phase(SessionPhase::Playing);
            self.pass_turn_to(mark.opponent());
        }
        Ok(outcome)
    }

    fn on_remote_move(&mut self, pos: Position) {
        let Some(role) = self.role else { return };
        if self.phase != SessionPhase::Playing {
            debug!(%pos, phase = %self.phase, "ignoring MOVE outside play");
            return;
        }
        // Only two marks exist, so the peer's mark is the one we do not hold.
        let theirs = role.mark().opponent();
        let outcome = match self.round.place(pos, theirs) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%pos, error = %e, "ignoring MOVE");
                return;
            }
        };
        debug!(%pos, mark = %theirs, "peer move");
        self.emit(SessionEvent::CellChanged {
            position: pos,
            mark: theirs,
        });

        if outcome.is_terminal() {
            self.finish_round(outcome);
        } else {
            self.pass_turn_to(role.mark());
        }
    }

    fn on_remote_win(&mut self) {
        let Some(role) = self.role else { return };
        if self.round.is_over() {
            debug!("WIN received; outcome already known");
            return;
        }
        if self.phase != SessionPhase::Playing {
            debug!(phase = %self.phase, "ignoring WIN outside play");
            return;
        }
        let outcome = self.round.recheck(role.mark().opponent());
        if outcome.is_terminal() {
            self.finish_round(outcome);
        } else {
            debug!("WIN received but the peer holds no complete line");
        }
    }

    fn pass_turn_to(&mut self, mark: Mark) {
        self.set_turn(Some(mark));
        self.set_status(format!("Turn: {mark}"));
    }

    fn finish_round(&mut self, outcome: RoundOutcome) {
        info!(?outcome, "round finished");
        self.set_turn(None);
        self.set_phase(SessionPhase::RoundOver);
        self.emit(SessionEvent::RoundFinished(outcome));

        let networked_mark = self
            .role
            .filter(|_| self.connection.is_connected())
            .map(Role::mark);
        let status = match (outcome, networked_mark) {
            (RoundOutcome::Win { mark, .. }, Some(mine)) if mark == mine => "You WIN!".to_string(),
            (RoundOutcome::Win { .. }, Some(_)) => "You LOSE!".to_string(),
            (RoundOutcome::Win { mark, .. }, None) => format!("{mark} wins!"),
            (RoundOutcome::Draw, _) => "It's a draw!".to_string(),
            (RoundOutcome::InProgress, _) => return,
        };
        self.set_status(status);
    }

    // ── Rematch and reset ─────────────────────────────────────────────────────

    fn on_remote_rematch(&mut self) {
        if self.rematch.remote {
            debug!("ignoring duplicate REMATCH");
            return;
        }
        info!("peer requested rematch");
        self.rematch.remote = true;
        self.emit_rematch();
        if self.rematch.local {
            self.begin_rematch();
        } else {
            self.set_status("Opponent requests rematch!");
        }
    }

    fn begin_rematch(&mut self) {
        info!("both peers requested a rematch");
        self.rematch = RematchState::default();
        self.emit_rematch();
        self.start = StartState::default();
        match self.role {
            Some(role) if role.decides_start() => self.decide_starting_player(),
            _ => self.reset_round(),
        }
    }

    fn on_reset(&mut self) {
        info!("peer forced a board reset");
        self.rematch = RematchState::default();
        self.emit_rematch();
        self.reset_round();
    }

    // ── Lines ─────────────────────────────────────────────────────────────────

    fn on_line(&mut self, line: &str) {
        if self.teardown_pending {
            debug!(line, "dropping line: teardown pending");
            return;
        }
        if !self.connection.is_connected() {
            debug!(line, "dropping line: not connected");
            return;
        }
        let msg = match decode_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(line, error = %e, "dropping malformed line");
                return;
            }
        };
        trace!(%msg, "received");

        match msg {
            PeerMessage::Role(theirs) => self.on_peer_role(theirs),
            PeerMessage::RoleConflict => self.raise_role_conflict(),
            PeerMessage::Start(mark) => self.on_start(mark),
            PeerMessage::Move(pos) => self.on_remote_move(pos),
            PeerMessage::Win => self.on_remote_win(),
            PeerMessage::Reset => self.on_reset(),
            PeerMessage::Rematch => self.on_remote_rematch(),
        }
    }

    fn send(&self, msg: PeerMessage) {
        let line = encode_line(&msg);
        trace!(%line, "sending");
        self.transport.send_line(&line);
    }

    // ── State helpers ─────────────────────────────────────────────────────────

    fn link_active(&self) -> bool {
        self.connection != ConnectionState::Disconnected
    }

    fn resting_phase(&self) -> SessionPhase {
        if self.role.is_some() {
            SessionPhase::RoleSelected
        } else {
            SessionPhase::Idle
        }
    }

    /// Forgets all connection-scoped state.  No-op when nothing is active.
    fn drop_connection(&mut self) {
        self.start_epoch += 1;
        if !self.link_active() {
            return;
        }
        info!(connection = %self.connection, "connection closed");
        self.connection = ConnectionState::Disconnected;
        self.teardown_pending = false;
        self.start = StartState::default();
        self.rematch = RematchState::default();
        // Play continues locally from the current board.
        let turn = if self.round.is_over() {
            None
        } else {
            Some(self.whose_turn.unwrap_or(Mark::X))
        };
        self.set_turn(turn);
        self.set_phase(self.resting_phase());
        match self.link_error.take() {
            Some(message) => self.set_status(format!("Network Error: {message}")),
            None => self.set_status("Disconnected"),
        }
    }

    fn set_turn(&mut self, turn: Option<Mark>) {
        self.whose_turn = turn;
        self.emit(SessionEvent::TurnChanged(turn));
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "phase changed");
            self.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    fn set_connection(&mut self, connection: ConnectionState) {
        if self.connection != connection {
            self.connection = connection;
            self.emit(SessionEvent::ConnectionChanged(connection));
        }
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.emit(SessionEvent::StatusChanged(self.status.clone()));
    }

    fn emit_rematch(&self) {
        self.emit(SessionEvent::RematchChanged {
            local: self.rematch.local,
            remote: self.rematch.remote,
        });
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("session event receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::application::ports::{MockCoinFlip, MockStartScheduler};

    // ── Recording transport ───────────────────────────────────────────────────

    /// Records every call instead of touching the network.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        listens: Mutex<Vec<SocketAddr>>,
        connects: Mutex<Vec<SocketAddr>>,
        disconnects: AtomicUsize,
        fail_bind: bool,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl LineTransport for RecordingTransport {
        fn start_listening(&self, addr: SocketAddr) -> Result<(), TransportError> {
            if self.fail_bind {
                return Err(TransportError::BindFailed {
                    addr,
                    source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
                });
            }
            self.listens.lock().unwrap().push(addr);
            Ok(())
        }

        fn start_connecting(&self, addr: SocketAddr) {
            self.connects.lock().unwrap().push(addr);
        }

        fn send_line(&self, line: &str) {
            self.sent.lock().unwrap().push(line.to_string());
        }

        fn disconnect_all(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn peer_addr() -> SocketAddr {
        "127.0.0.1:6060".parse().unwrap()
    }

    fn permissive_scheduler() -> MockStartScheduler {
        let mut scheduler = MockStartScheduler::new();
        scheduler.expect_schedule_start().return_const(());
        scheduler
    }

    fn coin_returning(mark: Mark) -> MockCoinFlip {
        let mut coin = MockCoinFlip::new();
        coin.expect_starting_mark().return_const(mark);
        coin
    }

    fn make_session(
        transport: Arc<RecordingTransport>,
        scheduler: MockStartScheduler,
        coin: MockCoinFlip,
    ) -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
        Session::new(
            SessionConfig::default(),
            transport as Arc<dyn LineTransport>,
            Arc::new(scheduler),
            Arc::new(coin),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    /// Drives a session through a successful handshake as `role`.
    fn verified_session(
        role: Role,
        scheduler: MockStartScheduler,
        coin: MockCoinFlip,
    ) -> (Session, Arc<RecordingTransport>, mpsc::UnboundedReceiver<SessionEvent>) {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, mut rx) = make_session(Arc::clone(&transport), scheduler, coin);
        session.select_role(role).unwrap();
        session.connect().unwrap();
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        let theirs = role.mark().opponent();
        session.handle_transport_event(TransportEvent::LineReceived(format!("ROLE {theirs}")));
        drain(&mut rx);
        (session, transport, rx)
    }

    /// A second-role session that has received `START <mark>`.
    fn playing_second(start: Mark) -> (Session, Arc<RecordingTransport>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (mut session, transport, mut rx) =
            verified_session(Role::Second, MockStartScheduler::new(), MockCoinFlip::new());
        session.handle_transport_event(TransportEvent::LineReceived(format!("START {start}")));
        drain(&mut rx);
        (session, transport, rx)
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    #[test]
    fn test_connect_without_role_is_rejected() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());

        // Act
        let result = session.connect();

        // Assert
        assert!(matches!(result, Err(SessionError::RoleNotSet)));
        assert!(transport.listens.lock().unwrap().is_empty());
        assert!(transport.connects.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_role_listens_on_configured_port() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::First).unwrap();

        // Act
        session.connect().unwrap();

        // Assert
        let listens = transport.listens.lock().unwrap().clone();
        assert_eq!(listens, vec!["0.0.0.0:5050".parse::<SocketAddr>().unwrap()]);
        assert_eq!(session.phase(), SessionPhase::AwaitingPeer);
        assert_eq!(session.status(), "Listening on port 5050");
    }

    #[test]
    fn test_second_role_connects_to_peer_address() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.set_peer_address(peer_addr()).unwrap();
        session.select_role(Role::Second).unwrap();

        session.connect().unwrap();

        assert_eq!(transport.connects.lock().unwrap().clone(), vec![peer_addr()]);
        assert_eq!(session.connection(), ConnectionState::Connecting);
    }

    #[test]
    fn test_bind_failure_is_reported_and_session_stays_role_selected() {
        // Arrange
        let transport = Arc::new(RecordingTransport {
            fail_bind: true,
            ..Default::default()
        });
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::First).unwrap();

        // Act
        let result = session.connect();

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::BindFailed { .. }))
        ));
        assert_eq!(session.phase(), SessionPhase::RoleSelected);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert!(session.status().starts_with("Network Error: bind failed"));
    }

    #[test]
    fn test_set_peer_address_rejects_privileged_port() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(transport, MockStartScheduler::new(), MockCoinFlip::new());

        let result = session.set_peer_address("127.0.0.1:80".parse().unwrap());

        assert!(matches!(result, Err(SessionError::InvalidPort(80))));
        assert_eq!(session.config().peer_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_changing_role_while_connected_is_rejected() {
        let (mut session, _transport, _rx) =
            verified_session(Role::Second, MockStartScheduler::new(), MockCoinFlip::new());
        assert!(matches!(
            session.select_role(Role::First),
            Err(SessionError::AlreadyConnected)
        ));
        assert_eq!(session.role(), Some(Role::Second));
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    #[test]
    fn test_connected_sends_own_role_and_enters_verifying() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::Second).unwrap();
        session.connect().unwrap();

        // Act
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });

        // Assert
        assert_eq!(transport.sent(), vec!["ROLE O"]);
        assert_eq!(session.phase(), SessionPhase::Verifying);
        assert_eq!(session.status(), "Verifying roles...");
    }

    #[test]
    fn test_same_role_replies_conflict_and_defers_teardown() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, mut rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::First).unwrap();
        session.connect().unwrap();
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        drain(&mut rx);

        // Act
        session.handle_transport_event(TransportEvent::LineReceived("ROLE X".into()));

        // Assert – conflict raised, teardown not yet run
        assert_eq!(transport.sent(), vec!["ROLE X", "ROLE_CONFLICT"]);
        assert!(drain(&mut rx).contains(&SessionEvent::RoleConflict { mark: Mark::X }));
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 0);

        session.flush_deferred();
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.phase(), SessionPhase::RoleSelected);
    }

    #[test]
    fn test_lines_after_conflict_are_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::Second).unwrap();
        session.connect().unwrap();
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });

        session.handle_transport_event(TransportEvent::LineReceived("ROLE_CONFLICT".into()));
        session.handle_transport_event(TransportEvent::LineReceived("START X".into()));

        assert_eq!(transport.sent(), vec!["ROLE O"]);
        assert_eq!(session.phase(), SessionPhase::Verifying);
        assert_eq!(session.view().starting_mark, None);
    }

    #[test]
    fn test_first_role_arms_start_timer_on_verified_handshake() {
        // Arrange
        let mut scheduler = MockStartScheduler::new();
        scheduler
            .expect_schedule_start()
            .withf(|_, delay| *delay == DEFAULT_START_DELAY)
            .times(1)
            .return_const(());

        // Act
        let (session, _transport, _rx) =
            verified_session(Role::First, scheduler, MockCoinFlip::new());

        // Assert
        assert_eq!(session.phase(), SessionPhase::Starting);
        assert_eq!(
            session.status(),
            "Connection established! Game starts in 5 seconds..."
        );
    }

    #[test]
    fn test_second_role_never_arms_start_timer() {
        let mut scheduler = MockStartScheduler::new();
        scheduler.expect_schedule_start().times(0);

        let (session, _transport, _rx) =
            verified_session(Role::Second, scheduler, MockCoinFlip::new());

        assert_eq!(session.phase(), SessionPhase::Starting);
    }

    #[test]
    fn test_start_timer_decides_once_and_broadcasts_start() {
        // Arrange
        let epoch = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&epoch);
        let mut scheduler = MockStartScheduler::new();
        scheduler
            .expect_schedule_start()
            .times(1)
            .returning(move |e, _| *captured.lock().unwrap() = Some(e));
        let mut coin = MockCoinFlip::new();
        coin.expect_starting_mark().times(1).return_const(Mark::O);
        let (mut session, transport, _rx) = verified_session(Role::First, scheduler, coin);
        let epoch = epoch.lock().unwrap().expect("timer armed");

        // Act – a duplicate firing must not decide twice
        session.on_start_timer(epoch);
        session.on_start_timer(epoch);

        // Assert
        assert_eq!(transport.sent(), vec!["ROLE X", "START O"]);
        assert_eq!(session.phase(), SessionPhase::Playing);
        assert_eq!(session.whose_turn(), Some(Mark::O));
        assert!(!session.is_my_turn());
    }

    #[test]
    fn test_stale_start_timer_is_ignored() {
        let mut coin = MockCoinFlip::new();
        coin.expect_starting_mark().times(0);
        let (mut session, transport, _rx) =
            verified_session(Role::First, permissive_scheduler(), coin);

        session.on_start_timer(0);

        assert_eq!(transport.sent(), vec!["ROLE X"]);
        assert_eq!(session.phase(), SessionPhase::Starting);
    }

    #[test]
    fn test_second_role_ignores_start_timer() {
        let mut coin = MockCoinFlip::new();
        coin.expect_starting_mark().times(0);
        let (mut session, transport, _rx) =
            verified_session(Role::Second, MockStartScheduler::new(), coin);

        for epoch in 0..4 {
            session.on_start_timer(epoch);
        }

        assert_eq!(transport.sent(), vec!["ROLE O"]);
    }

    // ── Moves ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_local_move_sends_move_and_passes_turn() {
        // Arrange
        let (mut session, transport, _rx) = playing_second(Mark::O);

        // Act
        let outcome = session.request_move(1, 2).unwrap();

        // Assert
        assert_eq!(outcome, RoundOutcome::InProgress);
        assert_eq!(transport.sent().last().map(String::as_str), Some("MOVE 1 2"));
        assert_eq!(session.whose_turn(), Some(Mark::X));
        assert!(matches!(
            session.request_move(0, 0),
            Err(SessionError::NotYourTurn)
        ));
    }

    #[test]
    fn test_move_before_start_is_rejected() {
        let (mut session, transport, _rx) =
            verified_session(Role::Second, MockStartScheduler::new(), MockCoinFlip::new());

        let result = session.request_move(0, 0);

        assert!(matches!(result, Err(SessionError::AwaitingStart)));
        assert_eq!(transport.sent(), vec!["ROLE O"]);
    }

    #[test]
    fn test_remote_move_places_inferred_opponent_mark() {
        // Arrange – X starts, so the peer (X) moves first
        let (mut session, _transport, mut rx) = playing_second(Mark::X);

        // Act
        session.handle_transport_event(TransportEvent::LineReceived("MOVE 2 1".into()));

        // Assert
        let pos = Position::new(2, 1).unwrap();
        assert_eq!(session.round().board().get(pos).mark(), Some(Mark::X));
        assert!(drain(&mut rx).contains(&SessionEvent::CellChanged {
            position: pos,
            mark: Mark::X
        }));
        assert!(session.is_my_turn());
    }

    #[test]
    fn test_out_of_range_remote_move_is_ignored_silently() {
        let (mut session, _transport, mut rx) = playing_second(Mark::X);

        session.handle_transport_event(TransportEvent::LineReceived("MOVE 5 5".into()));

        assert_eq!(session.round().board().filled_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_winning_move_sends_move_then_win() {
        // Arrange – O to move; O already holds (0,0) and (0,1)
        let (mut session, transport, _rx) = playing_second(Mark::O);
        session.request_move(0, 0).unwrap();
        session.handle_transport_event(TransportEvent::LineReceived("MOVE 1 0".into()));
        session.request_move(0, 1).unwrap();
        session.handle_transport_event(TransportEvent::LineReceived("MOVE 1 1".into()));

        // Act
        let outcome = session.request_move(0, 2).unwrap();

        // Assert
        assert_eq!(outcome.winner(), Some(Mark::O));
        let sent = transport.sent();
        assert_eq!(&sent[sent.len() - 2..], ["MOVE 0 2", "WIN"]);
        assert_eq!(session.phase(), SessionPhase::RoundOver);
        assert_eq!(session.status(), "You WIN!");
    }

    #[test]
    fn test_local_play_alternates_without_role_gating() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), coin_returning(Mark::O));
        session.new_local_game();

        // Act
        session.request_move(0, 0).unwrap();
        session.request_move(1, 1).unwrap();

        // Assert
        let board = session.round().board();
        assert_eq!(board.get(Position::new(0, 0).unwrap()).mark(), Some(Mark::O));
        assert_eq!(board.get(Position::new(1, 1).unwrap()).mark(), Some(Mark::X));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_local_win_reports_winning_mark() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(transport, MockStartScheduler::new(), coin_returning(Mark::X));
        session.new_local_game();
        for (r, c) in [(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)] {
            session.request_move(r, c).unwrap();
        }
        assert_eq!(session.status(), "X wins!");
        assert!(matches!(
            session.request_move(2, 2),
            Err(SessionError::Board(BoardError::RoundOver))
        ));
    }

    // ── Rematch ───────────────────────────────────────────────────────────────

    fn finished_second() -> (Session, Arc<RecordingTransport>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (mut session, transport, mut rx) = playing_second(Mark::X);
        for line in ["MOVE 0 0", "MOVE 0 1", "MOVE 0 2", "WIN"] {
            // The peer plays X along the top row; we do not respond.
            session.handle_transport_event(TransportEvent::LineReceived(line.into()));
            if !session.round().is_over() && session.is_my_turn() {
                let free = Position::all()
                    .find(|p| p.row() == 2 && session.round().board().get(*p).is_empty())
                    .unwrap();
                session.request_move(free.row(), free.col()).unwrap();
            }
        }
        drain(&mut rx);
        (session, transport, rx)
    }

    #[test]
    fn test_remote_win_freezes_round_as_loss() {
        let (session, _transport, _rx) = finished_second();
        assert_eq!(session.phase(), SessionPhase::RoundOver);
        assert_eq!(session.round().outcome().winner(), Some(Mark::X));
        assert_eq!(session.status(), "You LOSE!");
    }

    #[test]
    fn test_rematch_request_is_sent_once_per_round() {
        // Arrange
        let (mut session, transport, _rx) = finished_second();

        // Act
        session.request_rematch().unwrap();
        let second = session.request_rematch();

        // Assert
        assert!(matches!(second, Err(SessionError::RematchUnavailable)));
        let rematches = transport.sent().iter().filter(|l| *l == "REMATCH").count();
        assert_eq!(rematches, 1);
        assert_eq!(session.status(), "Waiting for opponent...");
    }

    #[test]
    fn test_rematch_during_play_is_rejected() {
        let (mut session, transport, _rx) = playing_second(Mark::X);
        assert!(matches!(
            session.request_rematch(),
            Err(SessionError::RematchUnavailable)
        ));
        assert!(!transport.sent().contains(&"REMATCH".to_string()));
    }

    #[test]
    fn test_second_role_rematch_waits_for_start() {
        // Arrange
        let (mut session, _transport, _rx) = finished_second();
        session.handle_transport_event(TransportEvent::LineReceived("REMATCH".into()));
        assert_eq!(session.status(), "Opponent requests rematch!");

        // Act
        session.request_rematch().unwrap();

        // Assert – flags cleared, board reset, waiting for START
        let view = session.view();
        assert!(!view.rematch_requested_by_local && !view.rematch_requested_by_remote);
        assert_eq!(view.board.filled_count(), 0);
        assert_eq!(view.phase, SessionPhase::Starting);
        assert_eq!(view.whose_turn, None);

        session.handle_transport_event(TransportEvent::LineReceived("START O".into()));
        assert_eq!(session.phase(), SessionPhase::Playing);
        assert!(session.is_my_turn());
    }

    #[test]
    fn test_reset_clears_board_and_rematch_flags() {
        let (mut session, _transport, _rx) = finished_second();
        session.request_rematch().unwrap();

        session.handle_transport_event(TransportEvent::LineReceived("RESET".into()));

        let view = session.view();
        assert_eq!(view.board.filled_count(), 0);
        assert!(!view.rematch_requested_by_local);
        // The start decided for this round still applies.
        assert_eq!(view.whose_turn, Some(Mark::X));
        assert_eq!(view.phase, SessionPhase::Playing);
    }

    // ── Disconnect ────────────────────────────────────────────────────────────

    #[test]
    fn test_disconnect_when_idle_keeps_role_and_board() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, mut rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::First).unwrap();
        session.request_move(1, 1).unwrap();
        let before = session.view();
        drain(&mut rx);

        // Act
        session.disconnect();
        session.handle_transport_event(TransportEvent::Closed);

        // Assert
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ConnectionChanged(ConnectionState::Disconnected)]
        );
        assert_eq!(session.view(), before);
    }

    #[test]
    fn test_reconnect_ignores_events_queued_by_the_dropped_link() {
        // Arrange – a peer connected to the old acceptor before the disconnect
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::First).unwrap();
        session.connect().unwrap();
        session.disconnect();
        session.connect().unwrap();

        // Act – old link's events, then the acknowledgement
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        session.handle_transport_event(TransportEvent::LineReceived("ROLE O".into()));
        session.handle_transport_event(TransportEvent::Disconnected);
        session.handle_transport_event(TransportEvent::Closed);

        // Assert – still listening on the new acceptor
        assert_eq!(session.connection(), ConnectionState::Listening { port: DEFAULT_PORT });
        assert_eq!(session.phase(), SessionPhase::AwaitingPeer);
        assert!(transport.sent().is_empty());

        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        assert_eq!(session.phase(), SessionPhase::Verifying);
        assert_eq!(transport.sent(), vec!["ROLE X"]);
    }

    #[test]
    fn test_every_disconnect_waits_for_its_own_acknowledgement() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, mut rx) =
            make_session(transport, MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::Second).unwrap();
        session.disconnect();
        session.disconnect();
        session.connect().unwrap();
        drain(&mut rx);

        session.handle_transport_event(TransportEvent::Closed);
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        assert_eq!(session.connection(), ConnectionState::Connecting);

        session.handle_transport_event(TransportEvent::Closed);
        session.handle_transport_event(TransportEvent::Connected { peer: peer_addr() });
        assert!(session.connection().is_connected());
        assert!(!drain(&mut rx)
            .contains(&SessionEvent::ConnectionChanged(ConnectionState::Disconnected)));
    }

    #[test]
    fn test_read_error_status_survives_the_following_disconnect() {
        let (mut session, _transport, _rx) = playing_second(Mark::X);

        session.handle_transport_event(TransportEvent::Error("connection reset".into()));
        session.handle_transport_event(TransportEvent::Disconnected);

        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.status(), "Network Error: connection reset");
    }

    #[test]
    fn test_peer_disconnect_returns_to_role_selected() {
        let (mut session, _transport, _rx) = playing_second(Mark::X);

        session.handle_transport_event(TransportEvent::Disconnected);

        assert_eq!(session.phase(), SessionPhase::RoleSelected);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.status(), "Disconnected");
        assert_eq!(session.role(), Some(Role::Second));
    }

    #[test]
    fn test_connect_failure_returns_to_disconnected_with_error_status() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, mut rx) =
            make_session(transport, MockStartScheduler::new(), MockCoinFlip::new());
        session.select_role(Role::Second).unwrap();
        session.connect().unwrap();

        session.handle_transport_event(TransportEvent::Error("connection refused".into()));
        session.handle_transport_event(TransportEvent::Disconnected);

        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.phase(), SessionPhase::RoleSelected);
        assert_eq!(session.status(), "Network Error: connection refused");
        assert!(drain(&mut rx).contains(&SessionEvent::Error("connection refused".into())));
    }

    #[test]
    fn test_new_local_game_tears_down_connection_and_clears_role() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut session, _rx) =
            make_session(Arc::clone(&transport), MockStartScheduler::new(), coin_returning(Mark::X));
        session.select_role(Role::First).unwrap();
        session.connect().unwrap();

        session.new_local_game();

        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(session.role(), None);
        assert_eq!(session.phase(), SessionPhase::Playing);
        assert_eq!(session.whose_turn(), Some(Mark::X));
    }
}
