//! Wire protocol for Cairn remote execution.
//!
//! Defines the message types and framing used between a build host and the
//! worker process it spawns to run a single command.

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;

pub use channel::MessageChannel;
pub use codec::RemoteCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{error_codes, RemoteMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
