use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::codec::RemoteCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{RemoteMessage, PROTOCOL_VERSION};

/// A bidirectional stream carrying framed [`RemoteMessage`]s.
#[derive(Debug)]
pub struct MessageChannel<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MessageChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &RemoteMessage) -> ProtocolResult<()> {
        trace!(message = msg.type_name(), "send");
        RemoteCodec::write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> ProtocolResult<RemoteMessage> {
        let msg = RemoteCodec::read_frame(&mut self.stream).await?;
        trace!(message = msg.type_name(), "recv");
        Ok(msg)
    }

    /// Send a request and wait for its response. An `Error` response becomes
    /// [`ProtocolError::RemoteError`].
    pub async fn request(&mut self, msg: &RemoteMessage) -> ProtocolResult<RemoteMessage> {
        self.send(msg).await?;
        match self.recv().await? {
            RemoteMessage::Error { code, message } => Err(ProtocolError::RemoteError { code, message }),
            response => Ok(response),
        }
    }

    /// Worker side of the handshake.
    pub async fn hello(&mut self) -> ProtocolResult<()> {
        match self.request(&RemoteMessage::Hello { version: PROTOCOL_VERSION }).await? {
            RemoteMessage::HelloAck { version } if version == PROTOCOL_VERSION => Ok(()),
            RemoteMessage::HelloAck { version } => Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: version,
            }),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "HelloAck",
                actual: other.type_name(),
            }),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
