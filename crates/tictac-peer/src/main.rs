//! tictac-peer - headless peer-to-peer tic-tac-toe over TCP.
//!
//! Runs one peer of a networked game from the terminal.  Session events are
//! printed to stdout; commands are read line by line from stdin.  Logs go to
//! stderr so they never interleave with the event output.
//!
//! # Usage
//!
//! ```text
//! tictac-peer [OPTIONS]
//!
//! Options:
//!   --role <x|o>        Role to play (x listens, o connects)
//!   --address <IP>      Peer IP address [default: 127.0.0.1]
//!   --port <PORT>       TCP port shared by both peers [default: 5050]
//!   --config <PATH>     Config file instead of the platform default
//!   --connect           Listen or connect right after startup
//!   --local             Start a local two-player game
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable         | Description       |
//! |------------------|-------------------|
//! | `TICTAC_ROLE`    | same as `--role`    |
//! | `TICTAC_ADDRESS` | same as `--address` |
//! | `TICTAC_PORT`    | same as `--port`    |
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! # Commands
//!
//! ```text
//! role x|o    select a role
//! connect     listen (x) or connect (o)
//! move R C    place a mark at row R, column C (0-based)
//! rematch     request a rematch (or a new round in local play)
//! local       new local game (drops any connection)
//! disconnect  drop the connection
//! show        print the board and the status footer
//! save        store the current role and peer address in the config file
//! quit        exit
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tictac_core::{Role, RoundOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tictac_peer::application::session::SessionConfig;
use tictac_peer::application::view::{SessionEvent, SessionView};
use tictac_peer::infrastructure::runtime::{spawn_tcp_peer, PeerCommand};
use tictac_peer::infrastructure::storage::config::{
    load_config, load_config_from, save_config, save_config_to, ConfigError, PeerConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Peer-to-peer tic-tac-toe over TCP.
#[derive(Debug, Parser)]
#[command(
    name = "tictac-peer",
    about = "Peer-to-peer tic-tac-toe over a single TCP connection",
    version
)]
struct Cli {
    /// Role to play: `x` hosts and decides who starts, `o` connects.
    #[arg(long, env = "TICTAC_ROLE")]
    role: Option<Role>,

    /// IP address of the peer (used by the `o` side).
    #[arg(long, env = "TICTAC_ADDRESS")]
    address: Option<String>,

    /// TCP port shared by both peers (1024-65535).
    #[arg(long, env = "TICTAC_PORT")]
    port: Option<u16>,

    /// Path to a config file instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen or connect immediately after startup.
    #[arg(long)]
    connect: bool,

    /// Start a local two-player game.
    #[arg(long, conflicts_with = "connect")]
    local: bool,
}

/// Settings resolved from the config file and the CLI.
#[derive(Debug)]
struct Startup {
    session: SessionConfig,
    log_level: String,
    role: Option<Role>,
    connect: bool,
    local: bool,
}

impl Cli {
    fn load_file_config(&self) -> anyhow::Result<PeerConfig> {
        match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => match load_config() {
                Ok(cfg) => Ok(cfg),
                Err(ConfigError::NoPlatformConfigDir) => Ok(PeerConfig::default()),
                Err(e) => Err(e).context("failed to load config"),
            },
        }
    }

    /// Merges the CLI over `file` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not an IP or the port is below 1024.
    fn into_startup(self, mut file: PeerConfig) -> anyhow::Result<Startup> {
        if let Some(address) = self.address {
            file.network.address = address;
        }
        if let Some(port) = self.port {
            file.network.port = port;
        }
        let session = file
            .session_config()
            .context("invalid network settings")?;
        Ok(Startup {
            session,
            log_level: file.peer.log_level,
            role: self.role.or(file.peer.default_role),
            connect: self.connect,
            local: self.local,
        })
    }
}

// ── Interactive commands ──────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Role(Role),
    Connect,
    Disconnect,
    Move { row: usize, col: usize },
    Rematch,
    Local,
    Show,
    Save,
    Help,
    Quit,
}

/// Parses one stdin line.  Blank lines yield `Ok(None)`.
fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&word, args)) = tokens.split_first() else {
        return Ok(None);
    };
    let input = match (word.to_ascii_lowercase().as_str(), args) {
        ("role", [role]) => Input::Role(role.parse()?),
        ("connect" | "listen", []) => Input::Connect,
        ("disconnect", []) => Input::Disconnect,
        ("move", [row, col]) => Input::Move {
            row: row.parse().map_err(|_| format!("invalid row '{row}'"))?,
            col: col.parse().map_err(|_| format!("invalid column '{col}'"))?,
        },
        ("rematch", []) => Input::Rematch,
        ("local", []) => Input::Local,
        ("show" | "board", []) => Input::Show,
        ("save", []) => Input::Save,
        ("help" | "?", []) => Input::Help,
        ("quit" | "exit", []) => Input::Quit,
        _ => return Err(format!("unrecognised command '{}'; type 'help'", line.trim())),
    };
    Ok(Some(input))
}

fn print_help() {
    println!(
        "commands: role x|o, connect, move R C, rematch, local, disconnect, show, save, quit"
    );
}

/// Copies the session's role and peer address into `cfg`.
fn remember_view(cfg: &mut PeerConfig, view: &SessionView) {
    cfg.peer.default_role = view.role;
    cfg.network.address = view.peer_addr.ip().to_string();
    cfg.network.port = view.peer_addr.port();
}

/// Writes `base` updated from `view` to `path`, or to the platform path.
fn save_settings(base: &PeerConfig, view: &SessionView, path: Option<&Path>) -> anyhow::Result<()> {
    let mut cfg = base.clone();
    remember_view(&mut cfg, view);
    match path {
        Some(path) => save_config_to(&cfg, path),
        None => save_config(&cfg),
    }
    .context("failed to save config")
}

/// Renders a session event as one stdout line.
fn render_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::StatusChanged(status) => Some(format!("status: {status}")),
        SessionEvent::CellChanged { position, mark } => Some(format!("{mark} at {position}")),
        SessionEvent::BoardReset => Some("board reset".to_string()),
        SessionEvent::RoundFinished(RoundOutcome::Win { mark, line }) => {
            Some(format!("{mark} wins ({line:?})"))
        }
        SessionEvent::RoundFinished(RoundOutcome::Draw) => Some("draw".to_string()),
        SessionEvent::ConnectionChanged(state) => Some(format!("connection: {state}")),
        SessionEvent::RoleConflict { mark } => {
            Some(format!("role conflict: both peers selected {mark}"))
        }
        SessionEvent::Error(message) => Some(format!("error: {message}")),
        SessionEvent::RoundFinished(RoundOutcome::InProgress)
        | SessionEvent::TurnChanged(_)
        | SessionEvent::PhaseChanged(_)
        | SessionEvent::RematchChanged { .. } => None,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let file = cli.load_file_config()?;
    let saved = file.clone();
    let startup = cli.into_startup(file)?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&startup.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        peer = %startup.session.peer_addr,
        bind = %startup.session.bind_address,
        "tictac-peer starting"
    );

    let (handle, mut events, runtime) = spawn_tcp_peer(startup.session);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = render_event(&event) {
                println!("{line}");
            }
        }
    });

    if let Some(role) = startup.role {
        handle.send(PeerCommand::SelectRole(role)).await?;
    }
    if startup.local {
        handle.send(PeerCommand::NewLocalGame).await?;
    } else if startup.connect {
        handle.send(PeerCommand::Connect).await?;
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                let command = match parse_input(&line) {
                    Ok(None) => continue,
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(Input::Help)) => {
                        print_help();
                        continue;
                    }
                    Ok(Some(Input::Show)) => {
                        let view = handle.snapshot().await?;
                        println!("{}\n{}", view.board, view.footer());
                        continue;
                    }
                    Ok(Some(Input::Save)) => {
                        let view = handle.snapshot().await?;
                        match save_settings(&saved, &view, config_path.as_deref()) {
                            Ok(()) => println!("settings saved"),
                            Err(e) => println!("error: {e:#}"),
                        }
                        continue;
                    }
                    Ok(Some(Input::Role(role))) => PeerCommand::SelectRole(role),
                    Ok(Some(Input::Connect)) => PeerCommand::Connect,
                    Ok(Some(Input::Disconnect)) => PeerCommand::Disconnect,
                    Ok(Some(Input::Move { row, col })) => PeerCommand::Move { row, col },
                    Ok(Some(Input::Rematch)) => PeerCommand::Rematch,
                    Ok(Some(Input::Local)) => PeerCommand::NewLocalGame,
                    Err(message) => {
                        println!("error: {message}");
                        continue;
                    }
                };
                handle.send(command).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "runtime already stopped");
    }
    runtime.await.context("peer runtime task failed")?;
    info!("tictac-peer stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
