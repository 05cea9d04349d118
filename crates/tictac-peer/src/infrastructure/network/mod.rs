//! Line transports.
//!
//! - [`tcp_transport`] – the production transport over one tokio TCP stream.
//! - [`loopback`]      – an in-memory pair of endpoints for tests and demos.

pub mod loopback;
pub mod tcp_transport;

pub use loopback::LoopbackTransport;
pub use tcp_transport::TcpTransport;
