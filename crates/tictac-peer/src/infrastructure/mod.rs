//! Infrastructure layer for the peer.
//!
//! Contains OS-facing adapters: TCP sockets, the tokio start timer, the
//! random coin, config-file storage, and the runtime actor that wires them
//! to the session.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `tictac_core`, but MUST NOT be imported by the `application` layer.

pub mod coin;
pub mod network;
pub mod runtime;
pub mod storage;
pub mod timer;
