//! Protocol module containing the message types, the line codec, and the
//! stream framer.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{decode_line, encode_line, ProtocolError};
pub use framing::LineFramer;
pub use messages::*;
